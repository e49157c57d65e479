//! Strategy registry and execution plan resolution
//!
//! Built once at startup and shared behind an `Arc`. For each session a
//! candidate list is built (session preference, instrument preference,
//! `<code>@<version>`, `<code>`) and the plan is the first match of:
//!
//! 1. a registered [`ScoringStrategy`] under a candidate code
//! 2. the stored stage graph of the instrument version
//! 3. the instrument's static step list
//! 4. the registry fallback pipeline (logged at `warn`)
//!
//! If nothing matches the session cannot be scored: configuration error.

use super::definition::{PipelineDefinition, StageCatalog};
use super::stage::{run_stage, Stage, StageContext};
use super::stages::{standard_catalog, standard_stages, STANDARD_STAGE_KEYS};
use crate::db::pipelines::load_stage_graph;
use crate::error::{ConfigError, ScoringResult};
use crate::instrument::{InstrumentDefinition, InstrumentKey};
use crate::scoring::StyleClassifier;
use crate::types::AssessmentSession;
use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Half-width of the box searched for style grid gaps on registration
const COVERAGE_PROBE: i32 = 48;

/// Scores a whole session in one call
///
/// A strategy owns the order of its computations; it must persist through
/// the context and never commit.
#[async_trait]
pub trait ScoringStrategy: Send + Sync {
    fn code(&self) -> &str;

    async fn score(&self, ctx: &mut StageContext) -> ScoringResult<()>;
}

/// Direct KLSI scoring: the built-in stages in their default order
pub struct KlsiStrategy {
    stages: Vec<Arc<dyn Stage>>,
}

impl KlsiStrategy {
    pub const CODE: &'static str = "klsi-direct";

    pub fn new() -> Self {
        Self {
            stages: standard_stages(),
        }
    }
}

impl Default for KlsiStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoringStrategy for KlsiStrategy {
    fn code(&self) -> &str {
        Self::CODE
    }

    async fn score(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        for stage in &self.stages {
            run_stage(ctx, stage.as_ref()).await?;
        }
        Ok(())
    }
}

/// What a finalize will run
#[derive(Clone)]
pub enum ExecutionPlan {
    Strategy(Arc<dyn ScoringStrategy>),
    StoredPipeline(PipelineDefinition),
    StaticPipeline(PipelineDefinition),
    FallbackPipeline(PipelineDefinition),
}

impl ExecutionPlan {
    /// Label recorded in the snapshot and the audit row
    pub fn label(&self) -> String {
        match self {
            ExecutionPlan::Strategy(strategy) => format!("strategy:{}", strategy.code()),
            ExecutionPlan::StoredPipeline(_) => "pipeline:stored".to_string(),
            ExecutionPlan::StaticPipeline(_) => "pipeline:static".to_string(),
            ExecutionPlan::FallbackPipeline(_) => "pipeline:fallback".to_string(),
        }
    }

    pub async fn execute(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        match self {
            ExecutionPlan::Strategy(strategy) => strategy.score(ctx).await,
            ExecutionPlan::StoredPipeline(definition)
            | ExecutionPlan::StaticPipeline(definition)
            | ExecutionPlan::FallbackPipeline(definition) => {
                for stage in definition.stages() {
                    run_stage(ctx, stage.as_ref()).await?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPlan::Strategy(_) => f.write_str(&self.label()),
            ExecutionPlan::StoredPipeline(definition)
            | ExecutionPlan::StaticPipeline(definition)
            | ExecutionPlan::FallbackPipeline(definition) => {
                write!(f, "{} {:?}", self.label(), definition)
            }
        }
    }
}

/// Instruments, strategies and stages known to the engine
pub struct StrategyRegistry {
    instruments: HashMap<InstrumentKey, Arc<InstrumentDefinition>>,
    strategies: HashMap<String, Arc<dyn ScoringStrategy>>,
    catalog: StageCatalog,
    fallback: Option<PipelineDefinition>,
}

impl StrategyRegistry {
    /// Registry with the built-in stages and nothing else
    ///
    /// Without [`StrategyRegistry::set_fallback`] an instrument that has no
    /// strategy, stored graph or steps cannot be scored.
    pub fn new() -> Self {
        Self {
            instruments: HashMap::new(),
            strategies: HashMap::new(),
            catalog: standard_catalog(),
            fallback: None,
        }
    }

    /// Registry with KLSI 4.0, the direct KLSI strategy and the built-in
    /// stages as fallback pipeline
    pub fn standard() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.register_instrument(InstrumentDefinition::klsi_4_0())?;
        registry.register_strategy(Arc::new(KlsiStrategy::new()));
        registry.set_fallback(&STANDARD_STAGE_KEYS)?;
        Ok(registry)
    }

    /// Register an instrument version
    ///
    /// The definition and its static steps are validated here. Style grid
    /// gaps are allowed but logged.
    pub fn register_instrument(&mut self, definition: InstrumentDefinition) -> Result<(), ConfigError> {
        definition.validate()?;

        if !definition.steps.is_empty() {
            PipelineDefinition::from_keys(
                &definition.key.to_string(),
                &definition.steps,
                &self.catalog,
            )?;
        }

        let gaps = StyleClassifier::new(&definition.style_regions).uncovered_points(COVERAGE_PROBE);
        if !gaps.is_empty() {
            warn!(
                instrument = %definition.key,
                uncovered = gaps.len(),
                first = ?gaps[0],
                "Style grid leaves points uncovered, distance fallback will apply"
            );
        }

        info!(instrument = %definition.key, "Instrument registered");
        self.instruments
            .insert(definition.key.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn ScoringStrategy>) {
        debug!(code = strategy.code(), "Strategy registered");
        self.strategies.insert(strategy.code().to_string(), strategy);
    }

    /// Make a stage available to stored and static pipelines
    pub fn register_stage(&mut self, stage: Arc<dyn Stage>) {
        self.catalog.register(stage);
    }

    /// Pipeline used when an instrument has no strategy, graph or steps
    pub fn set_fallback<S: AsRef<str>>(&mut self, keys: &[S]) -> Result<(), ConfigError> {
        self.fallback = Some(PipelineDefinition::from_keys("fallback", keys, &self.catalog)?);
        Ok(())
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn instrument(&self, key: &InstrumentKey) -> Result<Arc<InstrumentDefinition>, ConfigError> {
        self.instruments
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownInstrument(key.to_string()))
    }

    /// Strategy codes tried for a session, most specific first, without repeats
    pub fn candidates(
        &self,
        session: &AssessmentSession,
        definition: &InstrumentDefinition,
    ) -> Vec<String> {
        let ordered = [
            session.preferred_strategy.clone(),
            definition.preferred_strategy.clone(),
            Some(definition.key.to_string()),
            Some(definition.key.code.clone()),
        ];

        let mut candidates: Vec<String> = Vec::with_capacity(ordered.len());
        for code in ordered.into_iter().flatten() {
            let code = code.trim().to_string();
            if !code.is_empty() && !candidates.contains(&code) {
                candidates.push(code);
            }
        }
        candidates
    }

    /// Pick the execution plan for a session
    pub async fn resolve_plan(
        &self,
        conn: &mut SqliteConnection,
        session: &AssessmentSession,
        definition: &InstrumentDefinition,
    ) -> ScoringResult<ExecutionPlan> {
        let candidates = self.candidates(session, definition);
        let owner = definition.key.to_string();

        if let Some(strategy) = candidates.iter().find_map(|c| self.strategies.get(c)) {
            debug!(session_id = %session.id, code = strategy.code(), "Plan: registered strategy");
            return Ok(ExecutionPlan::Strategy(strategy.clone()));
        }

        let rows = load_stage_graph(conn, &definition.key).await?;
        if !rows.is_empty() {
            let pipeline = PipelineDefinition::from_graph(&owner, &rows, &self.catalog)?;
            debug!(session_id = %session.id, stages = ?pipeline, "Plan: stored pipeline");
            return Ok(ExecutionPlan::StoredPipeline(pipeline));
        }

        if !definition.steps.is_empty() {
            let pipeline = PipelineDefinition::from_keys(&owner, &definition.steps, &self.catalog)?;
            debug!(session_id = %session.id, stages = ?pipeline, "Plan: static steps");
            return Ok(ExecutionPlan::StaticPipeline(pipeline));
        }

        if let Some(fallback) = &self.fallback {
            warn!(
                session_id = %session.id,
                instrument = %owner,
                candidates = ?candidates,
                "No strategy, stored pipeline or static steps, using fallback pipeline"
            );
            return Ok(ExecutionPlan::FallbackPipeline(fallback.clone()));
        }

        Err(ConfigError::NoExecutionPlan(owner).into())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
