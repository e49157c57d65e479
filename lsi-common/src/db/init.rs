//! Database initialization
//!
//! Opens (or creates) the SQLite database and applies the schema. Every
//! `create_*` function is idempotent (`CREATE TABLE IF NOT EXISTS`), so
//! `create_schema` is safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Applied to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table used by the scoring engine
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Collaborator-owned input tables
    create_respondents_table(pool).await?;
    create_assessment_sessions_table(pool).await?;
    create_item_responses_table(pool).await?;
    create_context_rankings_table(pool).await?;

    // Reference data
    create_norm_conversions_table(pool).await?;
    create_pipeline_stages_table(pool).await?;

    // Finalize artifacts
    create_raw_scores_table(pool).await?;
    create_combination_scores_table(pool).await?;
    create_style_assignments_table(pool).await?;
    create_flexibility_indices_table(pool).await?;
    create_scale_percentiles_table(pool).await?;
    create_session_deltas_table(pool).await?;
    create_scoring_audit_log_table(pool).await?;

    Ok(())
}

pub async fn create_respondents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS respondents (
            user_id TEXT PRIMARY KEY,
            education_level TEXT,
            country TEXT,
            birth_date TEXT,
            gender TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_assessment_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assessment_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            instrument_code TEXT NOT NULL,
            instrument_version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'started'
                CHECK (status IN ('started', 'completed')),
            preferred_strategy TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sessions_history
        ON assessment_sessions (user_id, instrument_code, instrument_version, status, completed_at)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw submissions are stored as received; integrity is enforced by the
/// validation gate, not by constraints.
pub async fn create_item_responses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            item_number INTEGER NOT NULL,
            item_kind TEXT NOT NULL,
            mode TEXT NOT NULL,
            rank INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_context_rankings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS context_rankings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            context_name TEXT NOT NULL,
            mode TEXT NOT NULL,
            rank INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_norm_conversions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS norm_conversions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            norm_group TEXT NOT NULL,
            version TEXT NOT NULL,
            scale TEXT NOT NULL,
            raw_score INTEGER NOT NULL,
            percentile REAL NOT NULL CHECK (percentile >= 0.0 AND percentile <= 100.0),
            UNIQUE (norm_group, version, scale, raw_score)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_pipeline_stages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_stages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instrument_code TEXT NOT NULL,
            instrument_version TEXT NOT NULL,
            stage_key TEXT NOT NULL,
            execution_order INTEGER NOT NULL,
            next_key TEXT,
            UNIQUE (instrument_code, instrument_version, stage_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_raw_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_scores (
            session_id TEXT PRIMARY KEY REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            ce INTEGER NOT NULL,
            ro INTEGER NOT NULL,
            ac INTEGER NOT NULL,
            ae INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_combination_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS combination_scores (
            session_id TEXT PRIMARY KEY REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            ac_ce INTEGER NOT NULL,
            ae_ro INTEGER NOT NULL,
            assimilating_accommodating INTEGER NOT NULL,
            converging_diverging INTEGER NOT NULL,
            balance_acce INTEGER NOT NULL,
            balance_aero INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_style_assignments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS style_assignments (
            session_id TEXT PRIMARY KEY REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            primary_style TEXT NOT NULL,
            backup_style TEXT,
            intensity INTEGER NOT NULL,
            intensity_euclidean REAL NOT NULL,
            matched_by TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_flexibility_indices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flexibility_indices (
            session_id TEXT PRIMARY KEY REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            kendall_w REAL NOT NULL,
            flexibility REAL NOT NULL,
            percentile REAL,
            level TEXT,
            provenance TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_scale_percentiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scale_percentiles (
            session_id TEXT NOT NULL REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            scale TEXT NOT NULL,
            raw_score INTEGER NOT NULL,
            percentile REAL,
            provenance TEXT NOT NULL,
            truncated INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (session_id, scale)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_session_deltas_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_deltas (
            session_id TEXT PRIMARY KEY REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            prior_session_id TEXT NOT NULL,
            delta_ac_ce INTEGER NOT NULL,
            delta_ae_ro INTEGER NOT NULL,
            delta_flexibility REAL NOT NULL,
            delta_intensity INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit rows carry only the snapshot digest, never the snapshot itself
pub async fn create_scoring_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scoring_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES assessment_sessions(id) ON DELETE CASCADE,
            plan TEXT NOT NULL,
            snapshot_digest TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
