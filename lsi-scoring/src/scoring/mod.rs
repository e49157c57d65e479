//! Score calculators
//!
//! Pure computations over validated responses:
//! 1. **raw** - raw mode totals
//! 2. **combination** - dialectic, composite and balance scores
//! 3. **style** - region classification with distance fallback
//! 4. **flexibility** - Kendall's W and the learning flexibility index

pub mod combination;
pub mod flexibility;
pub mod raw;
pub mod style;

pub use combination::CombinationCalculator;
pub use flexibility::{FlexibilityIndexCalculator, KendallConcordance};
pub use raw::RawScoreAggregator;
pub use style::StyleClassifier;
