//! lsi-scoring library - learning-style inventory scoring engine
//!
//! Turns a finished questionnaire session into raw mode scores, dialectic
//! combinations, a style assignment, a learning flexibility index, norm
//! percentiles and a longitudinal delta, persisted atomically with an audit
//! digest.
//!
//! Entry point is [`PipelineOrchestrator::finalize`]; ad hoc percentile
//! lookups go through [`NormResolver::resolve`].

pub mod db;
pub mod error;
pub mod instrument;
pub mod longitudinal;
pub mod norms;
pub mod pipeline;
pub mod scoring;
pub mod types;
pub mod utils;
pub mod validation;

pub use error::{ConfigError, ScoringError, ScoringResult, ValidationError};
pub use instrument::{InstrumentDefinition, InstrumentKey};
pub use norms::{NormGroupChain, NormProvenance, NormResolver, NormResult};
pub use pipeline::{PipelineOrchestrator, ScoringStrategy, Stage, StrategyRegistry};
pub use types::ArtifactSnapshot;
pub use validation::ValidationGate;
