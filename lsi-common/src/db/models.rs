//! Database row models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// `assessment_sessions` row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub instrument_code: String,
    pub instrument_version: String,
    pub status: String,
    pub preferred_strategy: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// `respondents` row
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct RespondentRow {
    pub user_id: String,
    pub education_level: Option<String>,
    pub country: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
}

/// `norm_conversions` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NormConversionRow {
    pub norm_group: String,
    pub version: String,
    pub scale: String,
    pub raw_score: i64,
    pub percentile: f64,
}

/// `pipeline_stages` row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PipelineStageRow {
    pub stage_key: String,
    pub execution_order: i64,
    pub next_key: Option<String>,
}
