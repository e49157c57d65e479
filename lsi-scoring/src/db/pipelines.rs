//! Stored pipeline graphs

use crate::error::ScoringResult;
use crate::instrument::InstrumentKey;
use lsi_common::db::PipelineStageRow;
use sqlx::{SqliteConnection, SqlitePool};

/// Stage rows for an instrument version, ordered by execution order
pub async fn load_stage_graph(
    conn: &mut SqliteConnection,
    instrument: &InstrumentKey,
) -> ScoringResult<Vec<PipelineStageRow>> {
    let rows = sqlx::query_as::<_, PipelineStageRow>(
        r#"
        SELECT stage_key, execution_order, next_key
        FROM pipeline_stages
        WHERE instrument_code = ? AND instrument_version = ?
        ORDER BY execution_order, stage_key
        "#,
    )
    .bind(&instrument.code)
    .bind(&instrument.version)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Replace the stored graph of an instrument version
///
/// Rows are written as given; validation happens when the graph is loaded
/// into a pipeline.
pub async fn save_stage_graph(
    pool: &SqlitePool,
    instrument: &InstrumentKey,
    rows: &[PipelineStageRow],
) -> ScoringResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM pipeline_stages WHERE instrument_code = ? AND instrument_version = ?")
        .bind(&instrument.code)
        .bind(&instrument.version)
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO pipeline_stages (
                instrument_code, instrument_version, stage_key, execution_order, next_key
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instrument.code)
        .bind(&instrument.version)
        .bind(&row.stage_key)
        .bind(row.execution_order)
        .bind(&row.next_key)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
