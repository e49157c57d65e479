//! Session, respondent and response persistence

use crate::error::{ScoringError, ScoringResult, ValidationError};
use crate::instrument::InstrumentKey;
use crate::types::{
    AssessmentSession, ContextRankResponse, Demographics, ItemKind, ItemResponse, LearningMode,
    ResponseSet, SessionStatus,
};
use chrono::{DateTime, Utc};
use lsi_common::db::{RespondentRow, SessionRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Insert a new session row
pub async fn create_session(pool: &SqlitePool, session: &AssessmentSession) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO assessment_sessions (
            id, user_id, instrument_code, instrument_version,
            status, preferred_strategy, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id.to_string())
    .bind(&session.user_id)
    .bind(&session.instrument.code)
    .bind(&session.instrument.version)
    .bind(session.status.as_str())
    .bind(&session.preferred_strategy)
    .bind(session.started_at)
    .bind(session.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or replace a respondent's demographics
pub async fn upsert_respondent(
    pool: &SqlitePool,
    user_id: &str,
    demographics: &Demographics,
) -> ScoringResult<()> {
    sqlx::query(
        r#"
        INSERT INTO respondents (user_id, education_level, country, birth_date, gender)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            education_level = excluded.education_level,
            country = excluded.country,
            birth_date = excluded.birth_date,
            gender = excluded.gender
        "#,
    )
    .bind(user_id)
    .bind(&demographics.education_level)
    .bind(&demographics.country)
    .bind(demographics.birth_date)
    .bind(&demographics.gender)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace every stored response of a session
pub async fn save_responses(
    pool: &SqlitePool,
    session_id: Uuid,
    responses: &ResponseSet,
) -> ScoringResult<()> {
    let id = session_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM item_responses WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM context_rankings WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    for item in &responses.items {
        sqlx::query(
            "INSERT INTO item_responses (session_id, item_number, item_kind, mode, rank) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(item.item_number)
        .bind(item.kind.as_str())
        .bind(item.mode.as_str())
        .bind(item.rank)
        .execute(&mut *tx)
        .await?;
    }

    for context in &responses.contexts {
        sqlx::query(
            "INSERT INTO context_rankings (session_id, context_name, mode, rank) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&context.context_name)
        .bind(context.mode.as_str())
        .bind(context.rank)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load a session by id
pub async fn load_session(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> ScoringResult<AssessmentSession> {
    let row: Option<SessionRow> = sqlx::query_as(
        r#"
        SELECT id, user_id, instrument_code, instrument_version, status,
               preferred_strategy, started_at, completed_at
        FROM assessment_sessions
        WHERE id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let row = row.ok_or(ScoringError::SessionNotFound(session_id))?;
    let status = row
        .status
        .parse::<SessionStatus>()
        .map_err(|s| ScoringError::Internal(format!("Unknown session status '{}'", s)))?;

    Ok(AssessmentSession {
        id: session_id,
        user_id: row.user_id,
        instrument: InstrumentKey::new(row.instrument_code, row.instrument_version),
        status,
        preferred_strategy: row.preferred_strategy.filter(|s| !s.trim().is_empty()),
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}

/// Demographics of a respondent; empty when none are on file
pub async fn load_demographics(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> ScoringResult<Demographics> {
    let row: Option<RespondentRow> = sqlx::query_as(
        "SELECT user_id, education_level, country, birth_date, gender FROM respondents WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row
        .map(|r| Demographics {
            education_level: r.education_level,
            country: r.country,
            birth_date: r.birth_date,
            gender: r.gender,
        })
        .unwrap_or_default())
}

fn parse_mode(value: &str) -> Result<LearningMode, ValidationError> {
    value
        .parse::<LearningMode>()
        .map_err(|_| ValidationError::UnknownMode {
            value: value.to_string(),
        })
}

/// Load every stored response of a session, in insertion order
///
/// An unrecognised mode label is reported as a validation failure.
pub async fn load_responses(
    conn: &mut SqliteConnection,
    session_id: Uuid,
) -> ScoringResult<ResponseSet> {
    let id = session_id.to_string();

    let item_rows = sqlx::query(
        "SELECT item_number, item_kind, mode, rank FROM item_responses WHERE session_id = ? ORDER BY id",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(item_rows.len());
    for row in item_rows {
        let kind: String = row.get("item_kind");
        let kind = kind
            .parse::<ItemKind>()
            .map_err(|k| ScoringError::Internal(format!("Unknown item kind '{}'", k)))?;
        let mode: String = row.get("mode");
        items.push(ItemResponse {
            item_number: row.get("item_number"),
            kind,
            mode: parse_mode(&mode)?,
            rank: row.get("rank"),
        });
    }

    let context_rows = sqlx::query(
        "SELECT context_name, mode, rank FROM context_rankings WHERE session_id = ? ORDER BY id",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    let mut contexts = Vec::with_capacity(context_rows.len());
    for row in context_rows {
        let mode: String = row.get("mode");
        contexts.push(ContextRankResponse {
            context_name: row.get("context_name"),
            mode: parse_mode(&mode)?,
            rank: row.get("rank"),
        });
    }

    Ok(ResponseSet { items, contexts })
}

/// Flip a started session to completed
///
/// Fails with [`ScoringError::AlreadyCompleted`] if another finalize got there
/// first.
pub async fn mark_completed(
    conn: &mut SqliteConnection,
    session_id: Uuid,
    completed_at: DateTime<Utc>,
) -> ScoringResult<()> {
    let result = sqlx::query(
        "UPDATE assessment_sessions SET status = 'completed', completed_at = ? WHERE id = ? AND status = 'started'",
    )
    .bind(completed_at)
    .bind(session_id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ScoringError::AlreadyCompleted(session_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn pool() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let pool = lsi_common::db::init_database(&dir.path().join("sessions.db"))
            .await
            .unwrap();
        (dir, pool)
    }

    fn session() -> AssessmentSession {
        AssessmentSession {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            instrument: InstrumentKey::new("KLSI", "4.0"),
            status: SessionStatus::Started,
            preferred_strategy: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let (_dir, pool) = pool().await;
        let session = session();
        create_session(&pool, &session).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let loaded = load_session(&mut conn, session.id).await.unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.instrument, session.instrument);
        assert_eq!(loaded.status, SessionStatus::Started);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            load_session(&mut conn, id).await,
            Err(ScoringError::SessionNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_mark_completed_only_once() {
        let (_dir, pool) = pool().await;
        let session = session();
        create_session(&pool, &session).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        mark_completed(&mut conn, session.id, Utc::now()).await.unwrap();
        assert!(matches!(
            mark_completed(&mut conn, session.id, Utc::now()).await,
            Err(ScoringError::AlreadyCompleted(_))
        ));
    }

    #[tokio::test]
    async fn test_demographics_default_when_absent() {
        let (_dir, pool) = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(
            load_demographics(&mut conn, "nobody").await.unwrap(),
            Demographics::default()
        );

        let demographics = Demographics {
            education_level: Some("Doctoral Degree".into()),
            country: None,
            birth_date: NaiveDate::from_ymd_opt(1985, 2, 3),
            gender: Some("Male".into()),
        };
        upsert_respondent(&pool, "someone", &demographics).await.unwrap();
        assert_eq!(
            load_demographics(&mut conn, "someone").await.unwrap(),
            demographics
        );
    }

    #[tokio::test]
    async fn test_responses_round_trip_and_unknown_mode() {
        let (_dir, pool) = pool().await;
        let session = session();
        create_session(&pool, &session).await.unwrap();

        let responses = ResponseSet {
            items: vec![ItemResponse::style(1, LearningMode::Ac, 4)],
            contexts: vec![ContextRankResponse {
                context_name: "planning_something".into(),
                mode: LearningMode::Ro,
                rank: 2,
            }],
        };
        save_responses(&pool, session.id, &responses).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(load_responses(&mut conn, session.id).await.unwrap(), responses);

        sqlx::query("UPDATE item_responses SET mode = 'XX'")
            .execute(&pool)
            .await
            .unwrap();
        let err = load_responses(&mut conn, session.id).await.unwrap_err();
        assert!(matches!(
            err,
            ScoringError::Validation(ValidationError::UnknownMode { .. })
        ));
    }
}
