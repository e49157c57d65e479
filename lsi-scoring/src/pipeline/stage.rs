//! Stage trait and the shared stage context

use crate::error::{ConfigError, ScoringResult};
use crate::instrument::InstrumentDefinition;
use crate::norms::{NormGroupChain, NormLookups, NormResolver, NormResult};
use crate::types::{
    ArtifactSnapshot, AssessmentSession, CombinationMetrics, FlexibilityIndex, RawModeScores,
    ScalePercentile, SessionDelta, StyleAssignment, ValidatedResponses,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// One named step of a pipeline
///
/// A stage reads earlier artifacts from the context, computes its own and
/// persists it through [`StageContext::conn`]. It must not commit.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique key, also the name of the artifact the stage produces
    fn key(&self) -> &str;

    /// Artifacts that must already be produced
    fn requires(&self) -> &[&'static str] {
        &[]
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()>;
}

/// Artifacts produced so far in one finalize
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub raw_scores: Option<RawModeScores>,
    pub combination: Option<CombinationMetrics>,
    pub style: Option<StyleAssignment>,
    pub flexibility: Option<FlexibilityIndex>,
    pub percentiles: Vec<ScalePercentile>,
    pub delta: Option<SessionDelta>,
    produced: BTreeSet<String>,
}

impl Artifacts {
    pub fn is_produced(&self, key: &str) -> bool {
        self.produced.contains(key)
    }

    pub fn produced(&self) -> impl Iterator<Item = &str> {
        self.produced.iter().map(String::as_str)
    }

    fn mark_produced(&mut self, key: &str) {
        self.produced.insert(key.to_string());
    }
}

/// Mutable state shared by the stages of one finalize
///
/// Owns the finalize transaction; the orchestrator takes it back with
/// [`StageContext::into_transaction`] to commit or roll back. Norm
/// conversions come from a set resolved before the transaction opened.
pub struct StageContext {
    tx: Transaction<'static, Sqlite>,
    session: AssessmentSession,
    definition: Arc<InstrumentDefinition>,
    responses: ValidatedResponses,
    chain: NormGroupChain,
    norms: NormLookups,
    resolver: Arc<NormResolver>,
    now: DateTime<Utc>,
    artifacts: Artifacts,
}

impl StageContext {
    pub fn new(
        tx: Transaction<'static, Sqlite>,
        session: AssessmentSession,
        definition: Arc<InstrumentDefinition>,
        responses: ValidatedResponses,
        chain: NormGroupChain,
        norms: NormLookups,
        resolver: Arc<NormResolver>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tx,
            session,
            definition,
            responses,
            chain,
            norms,
            resolver,
            now,
            artifacts: Artifacts::default(),
        }
    }

    /// Connection of the open finalize transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub fn session(&self) -> &AssessmentSession {
        &self.session
    }

    pub fn definition(&self) -> Arc<InstrumentDefinition> {
        self.definition.clone()
    }

    pub fn responses(&self) -> &ValidatedResponses {
        &self.responses
    }

    pub fn chain(&self) -> &NormGroupChain {
        &self.chain
    }

    /// Conversions for `requests`, in request order
    ///
    /// Prefetched conversions are used as is; anything else is resolved here,
    /// inside the open transaction.
    pub async fn resolve_norms(
        &mut self,
        requests: &[(String, i32)],
    ) -> ScoringResult<Vec<NormResult>> {
        let missing: Vec<(String, i32)> = requests
            .iter()
            .filter(|(scale, raw)| self.norms.get(scale, *raw).is_none())
            .cloned()
            .collect();

        let mut fetched = if missing.is_empty() {
            Vec::new().into_iter()
        } else {
            debug!(session_id = %self.session.id, missing = missing.len(), "Resolving norms not prefetched");
            self.resolver
                .resolve_many(&self.chain, &missing)
                .await?
                .into_iter()
        };

        Ok(requests
            .iter()
            .map(|(scale, raw)| match self.norms.get(scale, *raw) {
                Some(result) => result.clone(),
                None => fetched.next().unwrap_or_else(NormResult::unknown),
            })
            .collect())
    }

    /// Timestamp of this finalize, shared by every row it writes
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut Artifacts {
        &mut self.artifacts
    }

    /// Snapshot of everything produced, labelled with the plan that ran
    pub fn snapshot(&self, plan: &str) -> ArtifactSnapshot {
        ArtifactSnapshot {
            session_id: self.session.id,
            instrument: self.session.instrument.clone(),
            plan: plan.to_string(),
            raw_scores: self.artifacts.raw_scores,
            combination: self.artifacts.combination,
            style: self.artifacts.style.clone(),
            flexibility: self.artifacts.flexibility.clone(),
            percentiles: self.artifacts.percentiles.clone(),
            delta: self.artifacts.delta.clone(),
        }
    }

    pub fn into_transaction(self) -> Transaction<'static, Sqlite> {
        self.tx
    }
}

/// Run one stage after checking its declared dependencies
pub async fn run_stage(ctx: &mut StageContext, stage: &dyn Stage) -> ScoringResult<()> {
    for requires in stage.requires() {
        if !ctx.artifacts.is_produced(requires) {
            return Err(ConfigError::MissingDependency {
                stage: stage.key().to_string(),
                requires: requires.to_string(),
            }
            .into());
        }
    }

    debug!(session_id = %ctx.session.id, stage = stage.key(), "Running stage");
    stage.run(ctx).await?;
    ctx.artifacts.mark_produced(stage.key());
    Ok(())
}

/// Artifact accessor for stages whose dependency check already passed
pub(crate) fn required<T>(value: Option<T>, stage: &str, requires: &str) -> ScoringResult<T> {
    value.ok_or_else(|| {
        ConfigError::MissingDependency {
            stage: stage.to_string(),
            requires: requires.to_string(),
        }
        .into()
    })
}
