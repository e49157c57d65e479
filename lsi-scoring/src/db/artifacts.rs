//! Artifact rows written by the pipeline stages
//!
//! Every row is immutable: a session is finalized once, so plain INSERTs are
//! used and a second write for the same session fails on the primary key.

use crate::error::ScoringResult;
use crate::types::{
    CombinationMetrics, FlexibilityIndex, RawModeScores, ScalePercentile, SessionDelta,
    StyleAssignment,
};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

pub async fn insert_raw_scores(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    raw: &RawModeScores,
    created_at: DateTime<Utc>,
) -> ScoringResult<()> {
    sqlx::query(
        "INSERT INTO raw_scores (session_id, ce, ro, ac, ae, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id.to_string())
    .bind(raw.ce)
    .bind(raw.ro)
    .bind(raw.ac)
    .bind(raw.ae)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_combination(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    metrics: &CombinationMetrics,
) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO combination_scores (
            session_id, ac_ce, ae_ro, assimilating_accommodating,
            converging_diverging, balance_acce, balance_aero
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(metrics.ac_ce)
    .bind(metrics.ae_ro)
    .bind(metrics.assimilating_accommodating)
    .bind(metrics.converging_diverging)
    .bind(metrics.balance_acce)
    .bind(metrics.balance_aero)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_style(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    style: &StyleAssignment,
) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO style_assignments (
            session_id, primary_style, backup_style, intensity, intensity_euclidean, matched_by
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(&style.primary)
    .bind(&style.backup)
    .bind(style.intensity)
    .bind(style.intensity_euclidean)
    .bind(style.matched_by.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_flexibility(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    index: &FlexibilityIndex,
) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO flexibility_indices (
            session_id, kendall_w, flexibility, percentile, level, provenance
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(index.kendall_w)
    .bind(index.flexibility)
    .bind(index.percentile)
    .bind(index.level.map(|l| l.as_str()))
    .bind(index.provenance.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn insert_percentiles(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    percentiles: &[ScalePercentile],
) -> ScoringResult<()> {
    let id = session_id.to_string();
    for entry in percentiles {
        sqlx::query(
            r#"
            INSERT INTO scale_percentiles (
                session_id, scale, raw_score, percentile, provenance, truncated
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&entry.scale)
        .bind(entry.raw_score)
        .bind(entry.percentile)
        .bind(entry.provenance.to_string())
        .bind(entry.truncated)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn insert_delta(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    delta: &SessionDelta,
) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO session_deltas (
            session_id, prior_session_id, delta_ac_ce, delta_ae_ro,
            delta_flexibility, delta_intensity
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session_id.to_string())
    .bind(delta.prior_session_id.to_string())
    .bind(delta.ac_ce)
    .bind(delta.ae_ro)
    .bind(delta.flexibility)
    .bind(delta.intensity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
