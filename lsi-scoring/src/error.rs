//! Error types for lsi-scoring
//!
//! Three families are kept apart so callers can react differently:
//! - [`ValidationError`]: malformed submissions, recoverable by resubmission
//! - [`ConfigError`]: authoring/deployment defects (pipelines, registrations)
//! - everything else: unexpected failures, surfaced by the orchestrator as an
//!   opaque [`ScoringError::FinalizeFailed`] after rollback

use crate::types::LearningMode;
use thiserror::Error;
use uuid::Uuid;

/// Result type for scoring operations
pub type ScoringResult<T> = Result<T, ScoringError>;

/// Top-level scoring error
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Submission failed the validation gate
    #[error("Validation failed [{code}]: {0}", code = .0.code())]
    Validation(#[from] ValidationError),

    /// Pipeline or registry misconfiguration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session id does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session was already finalized
    #[error("Session {0} is already completed")]
    AlreadyCompleted(Uuid),

    /// Opaque outcome of a rolled-back finalize
    #[error("Finalize failed for session {session_id}; all partial results were rolled back")]
    FinalizeFailed { session_id: Uuid },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// lsi-common error
    #[error("Common error: {0}")]
    Common(#[from] lsi_common::Error),

    /// Snapshot serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScoringError {
    /// Whether this error is surfaced to the caller with full diagnostic detail
    pub fn exposes_detail(&self) -> bool {
        matches!(
            self,
            ScoringError::Validation(_)
                | ScoringError::Config(_)
                | ScoringError::SessionNotFound(_)
                | ScoringError::AlreadyCompleted(_)
        )
    }
}

/// Forced-choice and context integrity violations
///
/// Every variant maps to a stable code via [`ValidationError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("item {item}: rank {rank} is outside 1..=4")]
    RankOutOfRange { item: i64, rank: i64 },

    #[error("item {item}: mode {mode} was ranked more than once")]
    DuplicateChoice { item: i64, mode: LearningMode },

    #[error("item {item} is not part of the {bank_size}-item bank")]
    UnknownItem { item: i64, bank_size: usize },

    #[error("unknown learning mode '{value}'")]
    UnknownMode { value: String },

    #[error("item {item}: only {ranked} of 4 choices were ranked")]
    IncompleteItem { item: i64, ranked: usize },

    #[error("no responses for items {missing:?}")]
    MissingItems { missing: Vec<i64> },

    #[error("item {item}: ranks sum to {sum}, expected {expected}")]
    RankSumMismatch { item: i64, sum: i64, expected: i64 },

    #[error("item {item}: rank {rank} was used more than once")]
    DuplicateRank { item: i64, rank: i64 },

    #[error("expected {expected} contexts, found {found}")]
    ContextCount { expected: usize, found: usize },

    #[error("context '{name}' is not in the configured vocabulary")]
    UnknownContext { name: String },

    #[error("context '{name}' was submitted more than once")]
    DuplicateContext { name: String },

    #[error("context '{name}' ranks are not a permutation of 1..=4")]
    ContextNotPermutation { name: String },
}

impl ValidationError {
    /// Stable error code reported to collaborators
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::RankOutOfRange { .. } => "RANK_OUT_OF_RANGE",
            ValidationError::DuplicateChoice { .. } => "DUPLICATE_CHOICE",
            ValidationError::UnknownItem { .. } => "UNKNOWN_ITEM",
            ValidationError::UnknownMode { .. } => "UNKNOWN_MODE",
            ValidationError::IncompleteItem { .. } => "INCOMPLETE_ITEM",
            ValidationError::MissingItems { .. } => "MISSING_ITEMS",
            ValidationError::RankSumMismatch { .. } => "RANK_SUM_MISMATCH",
            ValidationError::DuplicateRank { .. } => "DUPLICATE_RANK",
            ValidationError::ContextCount { .. } => "CONTEXT_COUNT",
            ValidationError::UnknownContext { .. } => "UNKNOWN_CONTEXT",
            ValidationError::DuplicateContext { .. } => "DUPLICATE_CONTEXT",
            ValidationError::ContextNotPermutation { .. } => "CONTEXT_NOT_PERMUTATION",
        }
    }
}

/// Registry, instrument and pipeline authoring defects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("instrument {0} is not registered")]
    UnknownInstrument(String),

    #[error("instrument {instrument} is invalid: {reason}")]
    InvalidInstrument { instrument: String, reason: String },

    #[error("unknown pipeline stage '{0}'")]
    UnknownStage(String),

    #[error("pipeline stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("pipeline for {0} has no stages")]
    EmptyPipeline(String),

    #[error("pipeline cycle detected at stage '{0}'")]
    CyclicPipeline(String),

    #[error("pipeline next pointer references missing stage '{0}'")]
    DanglingNext(String),

    #[error("pipeline stages not reachable from the head: {0:?}")]
    UnreachableStages(Vec<String>),

    #[error("stage '{stage}' requires '{requires}' which has not been produced")]
    MissingDependency { stage: String, requires: String },

    #[error("no strategy, stored pipeline, static steps or fallback for {0}")]
    NoExecutionPlan(String),
}
