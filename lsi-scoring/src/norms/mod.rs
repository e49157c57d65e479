//! Percentile normalization
//!
//! A raw scale score is converted to a percentile through three tiers,
//! strict first match:
//! 1. Stored conversion tables, per norm group in chain order, requested
//!    version before the default version
//! 2. An optional external provider, per norm group
//! 3. Built-in appendix tables (exact, nearest lower, nearest higher)
//!
//! Results are cached in a bounded LRU keyed by chain, versions, scale and raw
//! score. See [`NormResolver`].

pub mod appendix;
pub mod cache;
pub mod external;
pub mod groups;
pub mod repository;
pub mod resolver;

pub use appendix::AppendixMatch;
pub use cache::{NormCache, NormCacheKey};
pub use external::{ExternalNormProvider, HttpNormProvider};
pub use groups::NormGroupChain;
pub use repository::{NormRepository, SqliteNormRepository};
pub use resolver::{NormLookups, NormResolver, NormResolverBuilder};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a percentile came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NormProvenance {
    /// Stored conversion table
    Database { group: String, version: String },
    /// External provider
    External { group: String },
    /// Built-in appendix table
    Appendix { scale: String, matched: AppendixMatch },
    /// Built-in flexibility distribution, used when no norm source knows LFI
    EmpiricalTable,
    /// Nothing matched; percentile is null
    Unknown,
}

impl fmt::Display for NormProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormProvenance::Database { group, version } => write!(f, "db:{}@{}", group, version),
            NormProvenance::External { group } => write!(f, "external:{}", group),
            NormProvenance::Appendix { scale, matched } => {
                write!(f, "appendix:{}/{}", scale, matched.as_str())
            }
            NormProvenance::EmpiricalTable => f.write_str("empirical:LFI"),
            NormProvenance::Unknown => f.write_str("unknown"),
        }
    }
}

/// One resolved conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormResult {
    pub percentile: Option<f64>,
    pub provenance: NormProvenance,
    /// Raw score fell outside the built-in table's observed range
    pub truncated: bool,
}

impl NormResult {
    pub fn unknown() -> Self {
        Self {
            percentile: None,
            provenance: NormProvenance::Unknown,
            truncated: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.percentile.is_some()
    }
}
