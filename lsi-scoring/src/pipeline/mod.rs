//! Scoring pipeline
//!
//! # Plan resolution (strict first match)
//! 1. A registered [`ScoringStrategy`] for one of the session's candidate codes
//! 2. The instrument's stored stage graph
//! 3. The instrument definition's static step list
//! 4. The registry's fallback pipeline (logged at `warn`)
//!
//! If none apply the session cannot be scored and a configuration error is
//! returned. Whatever the plan, [`PipelineOrchestrator::finalize`] runs it in
//! one transaction.

pub mod audit;
pub mod definition;
pub mod orchestrator;
pub mod registry;
pub mod stage;
pub mod stages;

pub use definition::PipelineDefinition;
pub use orchestrator::{FinalizeState, PipelineOrchestrator};
pub use registry::{ExecutionPlan, KlsiStrategy, ScoringStrategy, StrategyRegistry};
pub use stage::{run_stage, Artifacts, Stage, StageContext};
