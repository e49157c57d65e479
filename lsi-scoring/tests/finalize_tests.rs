//! Finalize integration tests
//!
//! End to end: stored responses in, artifacts + audit row + completed status
//! out, all or nothing.

mod helpers;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use helpers::*;
use lsi_common::config::{ScoringSettings, AUDIT_SECRET_ENV_VAR};
use lsi_scoring::db::sessions::upsert_respondent;
use lsi_scoring::norms::{ExternalNormProvider, SqliteNormRepository};
use lsi_scoring::pipeline::audit::snapshot_digest;
use lsi_scoring::types::{Demographics, FlexibilityLevel, StyleMatch};
use lsi_scoring::{
    ConfigError, InstrumentKey, NormProvenance, NormResolver, PipelineOrchestrator, ScoringError,
    StrategyRegistry, ValidationError,
};
use serial_test::serial;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Slow provider that writes a row on every lookup
///
/// A write waits for any open finalize transaction, so a failed write means
/// the lookup ran while the write lock was held.
struct WritingProvider {
    pool: SqlitePool,
    calls: AtomicUsize,
    blocked_writes: AtomicUsize,
}

#[async_trait]
impl ExternalNormProvider for WritingProvider {
    async fn lookup(&self, _group: &str, _scale: &str, _raw_score: i32) -> Option<f64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;

        let user_id = format!("provider-{}", call);
        if upsert_respondent(&self.pool, &user_id, &Demographics::default())
            .await
            .is_err()
        {
            self.blocked_writes.fetch_add(1, Ordering::SeqCst);
        }
        None
    }
}

#[tokio::test]
async fn test_finalize_persists_every_artifact() {
    let (_dir, pool) = create_test_db().await;
    let session_id = seed_balanced_session(&pool, "user-1").await;

    let snapshot = orchestrator(&pool).finalize(session_id).await.unwrap();

    let raw = snapshot.raw_scores.unwrap();
    assert_eq!((raw.ce, raw.ro, raw.ac, raw.ae), (26, 27, 35, 32));
    assert_eq!(raw.total(), 120);

    let combination = snapshot.combination.unwrap();
    assert_eq!(combination.ac_ce, 9);
    assert_eq!(combination.ae_ro, 5);
    assert_eq!(combination.assimilating_accommodating, 4);
    assert_eq!(combination.converging_diverging, 14);
    assert_eq!(combination.balance_acce, 0);
    assert_eq!(combination.balance_aero, 1);

    let style = snapshot.style.unwrap();
    assert_eq!(style.primary, "Balancing");
    assert_eq!(style.matched_by, StyleMatch::Region);
    assert_eq!(style.intensity, 14);
    assert!(style.backup.is_some());
    assert_ne!(style.backup.as_deref(), Some("Balancing"));

    let flexibility = snapshot.flexibility.unwrap();
    assert!((flexibility.kendall_w - 0.025).abs() < 1e-12);
    assert!((flexibility.flexibility - 0.975).abs() < 1e-12);
    assert_eq!(flexibility.level, Some(FlexibilityLevel::High));

    let scales: Vec<&str> = snapshot.percentiles.iter().map(|p| p.scale.as_str()).collect();
    assert_eq!(scales, ["CE", "RO", "AC", "AE", "ACCE", "AERO"]);
    assert!(snapshot
        .percentiles
        .iter()
        .all(|p| matches!(p.provenance, NormProvenance::Appendix { .. })));

    assert!(snapshot.delta.is_none());
    assert_eq!(snapshot.plan, "pipeline:static");

    assert_eq!(count_rows(&pool, "raw_scores", session_id).await, 1);
    assert_eq!(count_rows(&pool, "combination_scores", session_id).await, 1);
    assert_eq!(count_rows(&pool, "style_assignments", session_id).await, 1);
    assert_eq!(count_rows(&pool, "flexibility_indices", session_id).await, 1);
    assert_eq!(count_rows(&pool, "scale_percentiles", session_id).await, 6);
    assert_eq!(count_rows(&pool, "session_deltas", session_id).await, 0);
    assert_eq!(count_rows(&pool, "scoring_audit_log", session_id).await, 1);
    assert_eq!(session_status(&pool, session_id).await, "completed");
}

#[tokio::test]
async fn test_audit_row_holds_digest_only() {
    let (_dir, pool) = create_test_db().await;
    let session_id = seed_balanced_session(&pool, "user-1").await;

    let snapshot = orchestrator(&pool).finalize(session_id).await.unwrap();

    let (plan, digest): (String, String) = sqlx::query_as(
        "SELECT plan, snapshot_digest FROM scoring_audit_log WHERE session_id = ?",
    )
    .bind(session_id.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(plan, snapshot.plan);
    assert_eq!(digest, snapshot_digest(Some(AUDIT_SECRET), &snapshot).unwrap());
    assert_ne!(digest, snapshot_digest(None, &snapshot).unwrap());
}

#[tokio::test]
async fn test_preferred_strategy_runs_direct() {
    let (_dir, pool) = create_test_db().await;
    let mut session = new_session("user-1", klsi(), Utc::now());
    session.preferred_strategy = Some("klsi-direct".into());
    let session_id = seed_session(
        &pool,
        &session,
        &submission(&BALANCED_ITEMS, &worked_example_contexts()),
    )
    .await;

    let snapshot = orchestrator(&pool).finalize(session_id).await.unwrap();
    assert_eq!(snapshot.plan, "strategy:klsi-direct");
    assert_eq!(snapshot.style.unwrap().primary, "Balancing");
}

#[tokio::test]
async fn test_completed_session_is_rejected() {
    let (_dir, pool) = create_test_db().await;
    let session_id = seed_balanced_session(&pool, "user-1").await;
    let orchestrator = orchestrator(&pool);

    orchestrator.finalize(session_id).await.unwrap();
    let err = orchestrator.finalize(session_id).await.unwrap_err();

    assert!(matches!(err, ScoringError::AlreadyCompleted(id) if id == session_id));
    assert_eq!(count_rows(&pool, "scoring_audit_log", session_id).await, 1);
}

#[tokio::test]
async fn test_missing_session() {
    let (_dir, pool) = create_test_db().await;
    let id = Uuid::new_v4();
    let err = orchestrator(&pool).finalize(id).await.unwrap_err();
    assert!(matches!(err, ScoringError::SessionNotFound(missing) if missing == id));
}

#[tokio::test]
async fn test_invalid_submission_writes_nothing() {
    let (_dir, pool) = create_test_db().await;
    let mut items = BALANCED_ITEMS;
    items[4] = [1, 1, 4, 4];
    let session = new_session("user-1", klsi(), Utc::now());
    let session_id = seed_session(&pool, &session, &submission(&items, &worked_example_contexts())).await;

    let err = orchestrator(&pool).finalize(session_id).await.unwrap_err();

    match err {
        ScoringError::Validation(e) => {
            assert_eq!(e, ValidationError::DuplicateRank { item: 5, rank: 1 });
            assert_eq!(e.code(), "DUPLICATE_RANK");
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(count_artifacts(&pool, session_id).await, 0);
    assert_eq!(session_status(&pool, session_id).await, "started");
}

#[tokio::test]
async fn test_missing_context_is_rejected() {
    let (_dir, pool) = create_test_db().await;
    let contexts = &worked_example_contexts()[..7];
    let session = new_session("user-1", klsi(), Utc::now());
    let session_id = seed_session(&pool, &session, &submission(&BALANCED_ITEMS, contexts)).await;

    let err = orchestrator(&pool).finalize(session_id).await.unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Validation(ValidationError::ContextCount { expected: 8, found: 7 })
    ));
    assert_eq!(count_artifacts(&pool, session_id).await, 0);
}

#[tokio::test]
async fn test_unknown_instrument_is_config_error() {
    let (_dir, pool) = create_test_db().await;
    let session = new_session("user-1", InstrumentKey::new("XYZ", "1"), Utc::now());
    let session_id = seed_session(
        &pool,
        &session,
        &submission(&BALANCED_ITEMS, &worked_example_contexts()),
    )
    .await;

    let err = orchestrator(&pool).finalize(session_id).await.unwrap_err();
    assert!(matches!(
        err,
        ScoringError::Config(ConfigError::UnknownInstrument(ref key)) if key == "XYZ@1"
    ));
    assert_eq!(session_status(&pool, session_id).await, "started");
}

#[tokio::test]
async fn test_delta_against_prior_session() {
    let (_dir, pool) = create_test_db().await;
    let orchestrator = orchestrator(&pool);

    let earlier = new_session("user-1", klsi(), Utc::now() - Duration::days(90));
    let prior_id = seed_session(&pool, &earlier, &submission(&ABSTRACT_ITEMS, &rigid_contexts())).await;
    let prior = orchestrator.finalize(prior_id).await.unwrap();
    assert_eq!(prior.style.unwrap().primary, "Deciding");
    assert!(prior.delta.is_none());

    let current_id = seed_balanced_session(&pool, "user-1").await;
    let snapshot = orchestrator.finalize(current_id).await.unwrap();

    let delta = snapshot.delta.unwrap();
    assert_eq!(delta.prior_session_id, prior_id);
    assert_eq!(delta.ac_ce, 9 - 36);
    assert_eq!(delta.ae_ro, 5 - 12);
    assert_eq!(delta.intensity, 14 - 48);
    assert!((delta.flexibility - 0.975).abs() < 1e-9);
    assert_eq!(count_rows(&pool, "session_deltas", current_id).await, 1);
}

#[tokio::test]
async fn test_delta_ignores_other_users_and_versions() {
    let (_dir, pool) = create_test_db().await;
    let orchestrator = orchestrator(&pool);

    let other_user = new_session("user-2", klsi(), Utc::now() - Duration::days(30));
    let other_id = seed_session(&pool, &other_user, &submission(&ABSTRACT_ITEMS, &rigid_contexts())).await;
    orchestrator.finalize(other_id).await.unwrap();

    let current_id = seed_balanced_session(&pool, "user-1").await;
    let snapshot = orchestrator.finalize(current_id).await.unwrap();
    assert!(snapshot.delta.is_none());
}

#[tokio::test]
async fn test_external_lookups_run_outside_the_write_transaction() {
    let (_dir, pool) = create_test_db().await;
    let provider = Arc::new(WritingProvider {
        pool: pool.clone(),
        calls: AtomicUsize::new(0),
        blocked_writes: AtomicUsize::new(0),
    });
    let resolver = NormResolver::builder(Arc::new(SqliteNormRepository::new(pool.clone())))
        .external(provider.clone())
        .build();
    let orchestrator = PipelineOrchestrator::new(
        pool.clone(),
        Arc::new(StrategyRegistry::standard().unwrap()),
        Arc::new(resolver),
    );

    let balanced = seed_balanced_session(&pool, "user-1").await;
    let abstract_session = new_session("user-2", klsi(), Utc::now());
    let abstract_id = seed_session(
        &pool,
        &abstract_session,
        &submission(&ABSTRACT_ITEMS, &rigid_contexts()),
    )
    .await;

    let (first, second) = tokio::join!(
        orchestrator.finalize(balanced),
        orchestrator.finalize(abstract_id)
    );
    first.unwrap();
    second.unwrap();

    // Six scales plus LFI per session, no raw score shared between them
    assert_eq!(provider.calls.load(Ordering::SeqCst), 14);
    assert_eq!(provider.blocked_writes.load(Ordering::SeqCst), 0);
    assert_eq!(session_status(&pool, balanced).await, "completed");
    assert_eq!(session_status(&pool, abstract_id).await, "completed");
}

#[tokio::test]
#[serial]
async fn test_audit_secret_from_environment() {
    let (_dir, pool) = create_test_db().await;
    let session_id = seed_balanced_session(&pool, "user-1").await;

    std::env::set_var(AUDIT_SECRET_ENV_VAR, "from-env");
    let settings = ScoringSettings {
        audit_secret: Some("from-file".into()),
        ..ScoringSettings::default()
    };
    let secret = settings.resolved_audit_secret();
    std::env::remove_var(AUDIT_SECRET_ENV_VAR);
    assert_eq!(secret.as_deref(), Some("from-env"));

    let orchestrator = PipelineOrchestrator::new(
        pool.clone(),
        Arc::new(StrategyRegistry::standard().unwrap()),
        resolver(&pool),
    )
    .with_audit_secret(secret);
    let snapshot = orchestrator.finalize(session_id).await.unwrap();

    let digest: String =
        sqlx::query_scalar("SELECT snapshot_digest FROM scoring_audit_log WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(digest, snapshot_digest(Some("from-env"), &snapshot).unwrap());
}
