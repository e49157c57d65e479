//! Test Helper Utilities
//!
//! Temporary databases, seeded sessions and a ready orchestrator.

#![allow(dead_code)]

pub mod log_capture;

pub use log_capture::{capture_logs, LogCapture};

use chrono::{DateTime, Duration, Utc};
use lsi_scoring::db::sessions::{create_session, save_responses};
use lsi_scoring::types::{
    AssessmentSession, ContextRankResponse, ItemResponse, LearningMode, ResponseSet, SessionStatus,
};
use lsi_scoring::{InstrumentDefinition, InstrumentKey, NormResolver, PipelineOrchestrator, StrategyRegistry};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub const AUDIT_SECRET: &str = "test-secret";

/// Ranks (CE, RO, AC, AE) per item; totals CE 26, RO 27, AC 35, AE 32
pub const BALANCED_ITEMS: [[i64; 4]; 12] = [
    [1, 3, 4, 2],
    [3, 2, 4, 1],
    [2, 1, 4, 3],
    [2, 1, 3, 4],
    [1, 4, 3, 2],
    [4, 3, 2, 1],
    [1, 2, 4, 3],
    [3, 2, 1, 4],
    [2, 1, 4, 3],
    [1, 2, 4, 3],
    [3, 2, 1, 4],
    [3, 4, 1, 2],
];

/// Totals CE 12, RO 24, AC 48, AE 36
pub const ABSTRACT_ITEMS: [[i64; 4]; 12] = [[1, 2, 4, 3]; 12];

/// Rank sums {20, 18, 20, 22}: W = 0.025
pub fn worked_example_contexts() -> Vec<[i64; 4]> {
    let mut rows = vec![[1, 2, 3, 4]; 4];
    rows.extend(vec![[4, 3, 2, 1]; 3]);
    rows.push([4, 1, 2, 3]);
    rows
}

/// Identical rankings: W = 1
pub fn rigid_contexts() -> Vec<[i64; 4]> {
    vec![[2, 4, 1, 3]; 8]
}

pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = lsi_common::db::init_database(&temp_dir.path().join("test_lsi.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

pub fn klsi() -> InstrumentKey {
    InstrumentKey::new("KLSI", "4.0")
}

/// Submission for the KLSI item bank and context vocabulary
pub fn submission(items: &[[i64; 4]], contexts: &[[i64; 4]]) -> ResponseSet {
    let definition = InstrumentDefinition::klsi_4_0();
    let mut responses = ResponseSet::default();

    for (index, ranks) in items.iter().enumerate() {
        for mode in LearningMode::ALL {
            responses
                .items
                .push(ItemResponse::style(index as i64 + 1, mode, ranks[mode.index()]));
        }
    }

    for (name, ranks) in definition.context_vocabulary.iter().zip(contexts) {
        for mode in LearningMode::ALL {
            responses.contexts.push(ContextRankResponse {
                context_name: name.clone(),
                mode,
                rank: ranks[mode.index()],
            });
        }
    }

    responses
}

pub fn new_session(user_id: &str, instrument: InstrumentKey, started_at: DateTime<Utc>) -> AssessmentSession {
    AssessmentSession {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        instrument,
        status: SessionStatus::Started,
        preferred_strategy: None,
        started_at,
        completed_at: None,
    }
}

/// Insert a started session with the given responses
pub async fn seed_session(
    pool: &SqlitePool,
    session: &AssessmentSession,
    responses: &ResponseSet,
) -> Uuid {
    create_session(pool, session).await.unwrap();
    save_responses(pool, session.id, responses).await.unwrap();
    session.id
}

/// Started KLSI session with the balanced submission
pub async fn seed_balanced_session(pool: &SqlitePool, user_id: &str) -> Uuid {
    let session = new_session(user_id, klsi(), Utc::now() - Duration::minutes(20));
    seed_session(pool, &session, &submission(&BALANCED_ITEMS, &worked_example_contexts())).await
}

pub fn resolver(pool: &SqlitePool) -> Arc<NormResolver> {
    Arc::new(
        NormResolver::from_settings(pool.clone(), &lsi_common::config::ScoringSettings::default())
            .unwrap(),
    )
}

pub fn orchestrator_with(pool: &SqlitePool, registry: StrategyRegistry) -> PipelineOrchestrator {
    PipelineOrchestrator::new(pool.clone(), Arc::new(registry), resolver(pool))
        .with_audit_secret(Some(AUDIT_SECRET.to_string()))
}

pub fn orchestrator(pool: &SqlitePool) -> PipelineOrchestrator {
    orchestrator_with(pool, StrategyRegistry::standard().unwrap())
}

pub async fn count_rows(pool: &SqlitePool, table: &str, session_id: Uuid) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE session_id = ?", table))
        .bind(session_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

pub const ARTIFACT_TABLES: [&str; 7] = [
    "raw_scores",
    "combination_scores",
    "style_assignments",
    "flexibility_indices",
    "scale_percentiles",
    "session_deltas",
    "scoring_audit_log",
];

/// Total rows across every artifact table and the audit log
pub async fn count_artifacts(pool: &SqlitePool, session_id: Uuid) -> i64 {
    let mut total = 0;
    for table in ARTIFACT_TABLES {
        total += count_rows(pool, table, session_id).await;
    }
    total
}

pub async fn session_status(pool: &SqlitePool, session_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM assessment_sessions WHERE id = ?")
        .bind(session_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}
