//! Core domain types for lsi-scoring
//!
//! Submission types (`ItemResponse`, `ContextRankResponse`, `ResponseSet`) are
//! raw and unvalidated. `ValidatedResponses` can only be produced by the
//! validation gate; every calculator downstream consumes validated data or the
//! artifacts derived from it.

use crate::instrument::InstrumentKey;
use crate::norms::NormProvenance;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Learning modes
// ============================================================================

/// The four learning modes ranked by every forced-choice item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LearningMode {
    /// Concrete Experience
    #[serde(rename = "CE")]
    Ce,
    /// Reflective Observation
    #[serde(rename = "RO")]
    Ro,
    /// Abstract Conceptualization
    #[serde(rename = "AC")]
    Ac,
    /// Active Experimentation
    #[serde(rename = "AE")]
    Ae,
}

impl LearningMode {
    /// All modes in storage order
    pub const ALL: [LearningMode; 4] = [
        LearningMode::Ce,
        LearningMode::Ro,
        LearningMode::Ac,
        LearningMode::Ae,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningMode::Ce => "CE",
            LearningMode::Ro => "RO",
            LearningMode::Ac => "AC",
            LearningMode::Ae => "AE",
        }
    }

    /// Position in [`LearningMode::ALL`]
    pub fn index(&self) -> usize {
        match self {
            LearningMode::Ce => 0,
            LearningMode::Ro => 1,
            LearningMode::Ac => 2,
            LearningMode::Ae => 3,
        }
    }
}

impl fmt::Display for LearningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CE" => Ok(LearningMode::Ce),
            "RO" => Ok(LearningMode::Ro),
            "AC" => Ok(LearningMode::Ac),
            "AE" => Ok(LearningMode::Ae),
            other => Err(other.to_string()),
        }
    }
}

// ============================================================================
// Submissions
// ============================================================================

/// Kind of a stored item response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// One of the scored forced-choice items
    Style,
    /// Context item feeding the flexibility index; never aggregated into raw scores
    FlexContext,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Style => "style",
            ItemKind::FlexContext => "flex_context",
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "style" => Ok(ItemKind::Style),
            "flex_context" => Ok(ItemKind::FlexContext),
            other => Err(other.to_string()),
        }
    }
}

/// One ranked choice of one item, as submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResponse {
    pub item_number: i64,
    pub kind: ItemKind,
    pub mode: LearningMode,
    pub rank: i64,
}

impl ItemResponse {
    pub fn style(item_number: i64, mode: LearningMode, rank: i64) -> Self {
        Self {
            item_number,
            kind: ItemKind::Style,
            mode,
            rank,
        }
    }
}

/// One ranked mode within one context, as submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRankResponse {
    pub context_name: String,
    pub mode: LearningMode,
    pub rank: i64,
}

/// Everything a respondent submitted for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSet {
    pub items: Vec<ItemResponse>,
    pub contexts: Vec<ContextRankResponse>,
}

/// Ranks of the four modes within one named context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRanking {
    pub name: String,
    /// Rank per mode, indexed by [`LearningMode::index`]
    pub ranks: [u8; 4],
}

impl ContextRanking {
    pub fn rank(&self, mode: LearningMode) -> u8 {
        self.ranks[mode.index()]
    }
}

/// Validated context rankings, in vocabulary order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRankSet {
    pub contexts: Vec<ContextRanking>,
}

/// Responses that passed the validation gate
#[derive(Debug, Clone)]
pub struct ValidatedResponses {
    pub(crate) items: Vec<ItemResponse>,
    pub(crate) contexts: ContextRankSet,
}

impl ValidatedResponses {
    pub fn items(&self) -> &[ItemResponse] {
        &self.items
    }

    pub fn contexts(&self) -> &ContextRankSet {
        &self.contexts
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// Raw totals per learning mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawModeScores {
    pub ce: i32,
    pub ro: i32,
    pub ac: i32,
    pub ae: i32,
}

impl RawModeScores {
    pub fn get(&self, mode: LearningMode) -> i32 {
        match mode {
            LearningMode::Ce => self.ce,
            LearningMode::Ro => self.ro,
            LearningMode::Ac => self.ac,
            LearningMode::Ae => self.ae,
        }
    }

    pub(crate) fn add(&mut self, mode: LearningMode, value: i32) {
        match mode {
            LearningMode::Ce => self.ce += value,
            LearningMode::Ro => self.ro += value,
            LearningMode::Ac => self.ac += value,
            LearningMode::Ae => self.ae += value,
        }
    }

    pub fn total(&self) -> i32 {
        self.ce + self.ro + self.ac + self.ae
    }
}

/// Dialectic, composite and balance scores derived from the raw totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationMetrics {
    /// AC − CE (dialectic x)
    pub ac_ce: i32,
    /// AE − RO (dialectic y)
    pub ae_ro: i32,
    /// (AC + RO) − (AE + CE)
    pub assimilating_accommodating: i32,
    /// (AC + AE) − (CE + RO)
    pub converging_diverging: i32,
    /// |AC − (CE + median_x)|
    pub balance_acce: i32,
    /// |AE − (RO + median_y)|
    pub balance_aero: i32,
}

/// How the primary style was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleMatch {
    /// The point lies inside the region window
    Region,
    /// No window contained the point; nearest window by L1 distance
    Distance,
}

impl StyleMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleMatch::Region => "region",
            StyleMatch::Distance => "distance",
        }
    }
}

/// Style classification for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleAssignment {
    pub primary: String,
    /// Absent only when a single region is configured
    pub backup: Option<String>,
    pub matched_by: StyleMatch,
    /// |ac_ce| + |ae_ro|
    pub intensity: i32,
    pub intensity_euclidean: f64,
    /// Raw totals for the kite chart
    pub kite: RawModeScores,
}

/// Tertile band of the flexibility percentile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlexibilityLevel {
    Low,
    Moderate,
    High,
}

impl FlexibilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlexibilityLevel::Low => "low",
            FlexibilityLevel::Moderate => "moderate",
            FlexibilityLevel::High => "high",
        }
    }
}

/// Learning flexibility for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlexibilityIndex {
    pub kendall_w: f64,
    /// 1 − W
    pub flexibility: f64,
    pub percentile: Option<f64>,
    pub level: Option<FlexibilityLevel>,
    pub provenance: NormProvenance,
}

/// Percentile conversion for one scored scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePercentile {
    pub scale: String,
    pub raw_score: i32,
    pub percentile: Option<f64>,
    pub provenance: NormProvenance,
    pub truncated: bool,
}

/// Change against the most recent prior completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDelta {
    pub prior_session_id: Uuid,
    pub ac_ce: i32,
    pub ae_ro: i32,
    pub flexibility: f64,
    pub intensity: i32,
}

/// Everything one finalize produced
///
/// Fields are optional because custom pipelines may run a subset of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSnapshot {
    pub session_id: Uuid,
    pub instrument: InstrumentKey,
    /// Label of the execution plan that produced the artifacts
    pub plan: String,
    pub raw_scores: Option<RawModeScores>,
    pub combination: Option<CombinationMetrics>,
    pub style: Option<StyleAssignment>,
    pub flexibility: Option<FlexibilityIndex>,
    pub percentiles: Vec<ScalePercentile>,
    pub delta: Option<SessionDelta>,
}

// ============================================================================
// Sessions and respondents
// ============================================================================

/// Persisted session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Started => "started",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(SessionStatus::Started),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(other.to_string()),
        }
    }
}

/// One respondent's attempt at one instrument version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub id: Uuid,
    pub user_id: String,
    pub instrument: InstrumentKey,
    pub status: SessionStatus,
    pub preferred_strategy: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Respondent attributes used only to build the norm group chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    pub education_level: Option<String>,
    pub country: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
}
