//! Stored norm conversion tables

use crate::error::{ScoringError, ScoringResult};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use async_trait::async_trait;
use lsi_common::db::NormConversionRow;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

/// One (scale, raw) → percentile row of a norm table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub scale: String,
    pub raw_score: i32,
    pub percentile: f64,
}

/// Full conversion table for one (group, version) slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormTable {
    pub group: String,
    pub version: String,
    pub entries: Vec<NormPoint>,
}

impl NormTable {
    /// Reject rows the database CHECK would refuse, before opening a transaction
    pub fn validate(&self) -> ScoringResult<()> {
        if self.group.trim().is_empty() || self.version.trim().is_empty() {
            return Err(invalid_input("norm table needs a group and a version"));
        }
        for entry in &self.entries {
            if !entry.percentile.is_finite() || !(0.0..=100.0).contains(&entry.percentile) {
                return Err(invalid_input(format!(
                    "{}@{} {} raw {}: percentile {} is outside 0..=100",
                    self.group, self.version, entry.scale, entry.raw_score, entry.percentile
                )));
            }
        }
        Ok(())
    }
}

fn invalid_input(message: impl Into<String>) -> ScoringError {
    ScoringError::Common(lsi_common::Error::InvalidInput(message.into()))
}

/// Batched lookup request: every combination of the listed values
#[derive(Debug, Clone, Default)]
pub struct NormBatchQuery {
    pub groups: Vec<String>,
    pub versions: Vec<String>,
    pub scales: Vec<String>,
    pub raw_scores: Vec<i32>,
}

impl NormBatchQuery {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
            || self.versions.is_empty()
            || self.scales.is_empty()
            || self.raw_scores.is_empty()
    }
}

/// Access to stored conversion tables
#[async_trait]
pub trait NormRepository: Send + Sync {
    /// All stored rows matching the query, in any order
    async fn fetch_batch(&self, query: &NormBatchQuery) -> ScoringResult<Vec<NormConversionRow>>;

    /// Percentile for one exact key
    async fn fetch_one(
        &self,
        group: &str,
        version: &str,
        scale: &str,
        raw_score: i32,
    ) -> ScoringResult<Option<f64>>;

    /// Replace the whole (group, version) slice; returns rows written
    async fn replace_table(&self, table: &NormTable) -> ScoringResult<u64>;
}

/// SQLite-backed repository over `norm_conversions`
#[derive(Clone)]
pub struct SqliteNormRepository {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteNormRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Retry window for `replace_table` under lock contention
    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }
}

fn push_in_list<'a, T>(builder: &mut QueryBuilder<'a, Sqlite>, column: &str, values: &[T])
where
    T: 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite> + Send + Clone,
{
    builder.push(" AND ").push(column).push(" IN (");
    let mut list = builder.separated(", ");
    for value in values {
        list.push_bind(value.clone());
    }
    builder.push(")");
}

#[async_trait]
impl NormRepository for SqliteNormRepository {
    async fn fetch_batch(&self, query: &NormBatchQuery) -> ScoringResult<Vec<NormConversionRow>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT norm_group, version, scale, raw_score, percentile \
             FROM norm_conversions WHERE 1 = 1",
        );
        push_in_list(&mut builder, "norm_group", &query.groups);
        push_in_list(&mut builder, "version", &query.versions);
        push_in_list(&mut builder, "scale", &query.scales);
        push_in_list(&mut builder, "raw_score", &query.raw_scores);

        let rows = builder
            .build_query_as::<NormConversionRow>()
            .fetch_all(&self.pool)
            .await?;

        debug!(
            groups = query.groups.len(),
            scales = query.scales.len(),
            rows = rows.len(),
            "Fetched norm batch"
        );
        Ok(rows)
    }

    async fn fetch_one(
        &self,
        group: &str,
        version: &str,
        scale: &str,
        raw_score: i32,
    ) -> ScoringResult<Option<f64>> {
        let percentile: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT percentile FROM norm_conversions
            WHERE norm_group = ? AND version = ? AND scale = ? AND raw_score = ?
            "#,
        )
        .bind(group)
        .bind(version)
        .bind(scale)
        .bind(raw_score)
        .fetch_optional(&self.pool)
        .await?;

        Ok(percentile)
    }

    async fn replace_table(&self, table: &NormTable) -> ScoringResult<u64> {
        table.validate()?;
        let pool = &self.pool;

        let written = retry_on_lock("replace norm table", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            sqlx::query("DELETE FROM norm_conversions WHERE norm_group = ? AND version = ?")
                .bind(&table.group)
                .bind(&table.version)
                .execute(&mut *tx)
                .await?;

            for entry in &table.entries {
                sqlx::query(
                    r#"
                    INSERT INTO norm_conversions (norm_group, version, scale, raw_score, percentile)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&table.group)
                .bind(&table.version)
                .bind(&entry.scale)
                .bind(entry.raw_score)
                .bind(entry.percentile)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<u64, ScoringError>(table.entries.len() as u64)
        })
        .await?;

        info!(
            group = %table.group,
            version = %table.version,
            rows = written,
            "Replaced norm table"
        );
        Ok(written)
    }
}
