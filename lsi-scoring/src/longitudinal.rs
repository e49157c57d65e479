//! Longitudinal deltas
//!
//! Compares a session against the most recent other completed session of the
//! same respondent on the same instrument version.

use crate::error::{ScoringError, ScoringResult};
use crate::types::{AssessmentSession, CombinationMetrics, FlexibilityIndex, SessionDelta, StyleAssignment};
use sqlx::{Row, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

/// Prior session values a delta is computed against
#[derive(Debug, Clone, PartialEq)]
pub struct PriorMetrics {
    pub session_id: Uuid,
    pub ac_ce: i32,
    pub ae_ro: i32,
    pub flexibility: f64,
    pub intensity: i32,
}

pub struct LongitudinalDeltaCalculator;

impl LongitudinalDeltaCalculator {
    /// Most recent other completed session with every artifact a delta needs
    ///
    /// Returns `None` when there is no prior session, or when the latest one
    /// lacks combination, style or flexibility rows. An older complete session
    /// is not used in that case.
    pub async fn find_prior(
        conn: &mut SqliteConnection,
        session: &AssessmentSession,
    ) -> ScoringResult<Option<PriorMetrics>> {
        let row = sqlx::query(
            r#"
            SELECT s.id AS id, c.ac_ce AS ac_ce, c.ae_ro AS ae_ro,
                   f.flexibility AS flexibility, st.intensity AS intensity
            FROM assessment_sessions s
            LEFT JOIN combination_scores c ON c.session_id = s.id
            LEFT JOIN flexibility_indices f ON f.session_id = s.id
            LEFT JOIN style_assignments st ON st.session_id = s.id
            WHERE s.user_id = ?
              AND s.instrument_code = ?
              AND s.instrument_version = ?
              AND s.status = 'completed'
              AND s.id != ?
            ORDER BY s.completed_at DESC
            LIMIT 1
            "#,
        )
        .bind(&session.user_id)
        .bind(&session.instrument.code)
        .bind(&session.instrument.version)
        .bind(session.id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.get("id");
        let session_id = Uuid::parse_str(&id)
            .map_err(|e| ScoringError::Internal(format!("Invalid session id '{}': {}", id, e)))?;

        let ac_ce: Option<i32> = row.get("ac_ce");
        let ae_ro: Option<i32> = row.get("ae_ro");
        let flexibility: Option<f64> = row.get("flexibility");
        let intensity: Option<i32> = row.get("intensity");

        match (ac_ce, ae_ro, flexibility, intensity) {
            (Some(ac_ce), Some(ae_ro), Some(flexibility), Some(intensity)) => Ok(Some(PriorMetrics {
                session_id,
                ac_ce,
                ae_ro,
                flexibility,
                intensity,
            })),
            _ => {
                debug!(prior_session = %session_id, "Prior session lacks artifacts, no delta");
                Ok(None)
            }
        }
    }

    /// Signed change, current minus prior
    pub fn delta(
        prior: &PriorMetrics,
        combination: &CombinationMetrics,
        style: &StyleAssignment,
        flexibility: &FlexibilityIndex,
    ) -> SessionDelta {
        SessionDelta {
            prior_session_id: prior.session_id,
            ac_ce: combination.ac_ce - prior.ac_ce,
            ae_ro: combination.ae_ro - prior.ae_ro,
            flexibility: flexibility.flexibility - prior.flexibility,
            intensity: style.intensity - prior.intensity,
        }
    }

    pub async fn calculate(
        conn: &mut SqliteConnection,
        session: &AssessmentSession,
        combination: &CombinationMetrics,
        style: &StyleAssignment,
        flexibility: &FlexibilityIndex,
    ) -> ScoringResult<Option<SessionDelta>> {
        Ok(Self::find_prior(conn, session)
            .await?
            .map(|prior| Self::delta(&prior, combination, style, flexibility)))
    }
}
