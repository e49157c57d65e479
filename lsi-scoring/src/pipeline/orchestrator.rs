//! Session finalization
//!
//! `started → validated → computing → completed | failed_rolled_back`
//!
//! Validation, plan resolution and norm lookups happen before any write, so
//! no external provider call runs under the SQLite write lock. Every
//! artifact, the audit row and the status flip are written in one
//! transaction; a failure anywhere in `computing` rolls all of it back.

use super::audit::{insert_audit, snapshot_digest};
use super::registry::{ExecutionPlan, StrategyRegistry};
use super::stage::StageContext;
use super::stages::norm_requests;
use crate::db::sessions::{load_demographics, load_responses, load_session, mark_completed};
use crate::error::{ScoringError, ScoringResult};
use crate::norms::{NormGroupChain, NormResolver};
use crate::types::{ArtifactSnapshot, SessionStatus};
use crate::validation::ValidationGate;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Finalize lifecycle, as logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeState {
    Started,
    Validated,
    Computing,
    Completed,
    FailedRolledBack,
}

impl FinalizeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeState::Started => "started",
            FinalizeState::Validated => "validated",
            FinalizeState::Computing => "computing",
            FinalizeState::Completed => "completed",
            FinalizeState::FailedRolledBack => "failed_rolled_back",
        }
    }
}

pub struct PipelineOrchestrator {
    pool: SqlitePool,
    registry: Arc<StrategyRegistry>,
    resolver: Arc<NormResolver>,
    audit_secret: Option<String>,
}

impl PipelineOrchestrator {
    pub fn new(pool: SqlitePool, registry: Arc<StrategyRegistry>, resolver: Arc<NormResolver>) -> Self {
        Self {
            pool,
            registry,
            resolver,
            audit_secret: None,
        }
    }

    /// Secret prepended to the snapshot before hashing
    pub fn with_audit_secret(mut self, secret: Option<String>) -> Self {
        self.audit_secret = secret;
        self
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<NormResolver> {
        &self.resolver
    }

    /// Score a started session and mark it completed
    ///
    /// Validation, configuration, not-found and already-completed errors are
    /// returned as is. Anything else is logged and reported as
    /// [`ScoringError::FinalizeFailed`].
    pub async fn finalize(&self, session_id: Uuid) -> ScoringResult<ArtifactSnapshot> {
        match self.finalize_session(session_id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.exposes_detail() => {
                warn!(%session_id, error = %e, "Finalize rejected");
                Err(e)
            }
            Err(e) => {
                error!(%session_id, error = %e, "Finalize failed");
                Err(ScoringError::FinalizeFailed { session_id })
            }
        }
    }

    async fn finalize_session(&self, session_id: Uuid) -> ScoringResult<ArtifactSnapshot> {
        let mut conn = self.pool.acquire().await?;

        let session = load_session(&mut conn, session_id).await?;
        if session.status == SessionStatus::Completed {
            return Err(ScoringError::AlreadyCompleted(session_id));
        }
        transition(session_id, FinalizeState::Started);

        let definition = self.registry.instrument(&session.instrument)?;
        let responses = load_responses(&mut conn, session_id).await?;
        let demographics = load_demographics(&mut conn, &session.user_id).await?;

        let validated = ValidationGate::new(&definition).validate(&responses)?;
        transition(session_id, FinalizeState::Validated);

        let plan = self
            .registry
            .resolve_plan(&mut conn, &session, &definition)
            .await?;
        drop(conn);

        let chain = NormGroupChain::from_demographics(&demographics, session.started_at.date_naive());
        let norms = self
            .resolver
            .prefetch(&chain, &norm_requests(&definition, &validated))
            .await?;
        debug!(%session_id, chain = %chain, plan = %plan.label(), norms = norms.len(), "Computing");

        let tx = self.pool.begin().await?;
        transition(session_id, FinalizeState::Computing);

        let mut ctx = StageContext::new(
            tx,
            session,
            definition,
            validated,
            chain,
            norms,
            self.resolver.clone(),
            Utc::now(),
        );

        let outcome = self.compute(&mut ctx, &plan).await;
        let tx = ctx.into_transaction();

        match outcome {
            Ok(snapshot) => {
                tx.commit().await?;
                transition(session_id, FinalizeState::Completed);
                info!(%session_id, plan = %snapshot.plan, "Session finalized");
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(%session_id, error = %rollback, "Rollback failed");
                }
                transition(session_id, FinalizeState::FailedRolledBack);
                Err(e)
            }
        }
    }

    /// Run the plan, then write the audit row and flip the status
    async fn compute(
        &self,
        ctx: &mut StageContext,
        plan: &ExecutionPlan,
    ) -> ScoringResult<ArtifactSnapshot> {
        plan.execute(ctx).await?;

        let label = plan.label();
        let snapshot = ctx.snapshot(&label);
        let digest = snapshot_digest(self.audit_secret.as_deref(), &snapshot)?;
        let (session_id, now) = (ctx.session().id, ctx.now());

        insert_audit(ctx.conn(), session_id, &label, &digest, now).await?;
        mark_completed(ctx.conn(), session_id, now).await?;

        Ok(snapshot)
    }
}

fn transition(session_id: Uuid, state: FinalizeState) {
    debug!(%session_id, state = state.as_str(), "Finalize state");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(FinalizeState::Started.as_str(), "started");
        assert_eq!(FinalizeState::FailedRolledBack.as_str(), "failed_rolled_back");
    }
}
