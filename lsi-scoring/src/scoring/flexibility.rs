//! Learning flexibility
//!
//! Kendall's coefficient of concordance W measures how consistently a
//! respondent ranks the four modes across contexts (m contexts, n = 4 modes):
//!
//! ```text
//! R_j  = Σ rank of mode j over all contexts
//! R̄    = m(n + 1) / 2
//! S    = Σ (R_j − R̄)²
//! W    = 12S / (m²(n³ − n))        clipped to [0, 1]
//! flex = 1 − W
//! ```
//!
//! The flexibility score is converted to a percentile on the `LFI` norm scale
//! (raw = round(flex × 100)); when no source knows the scale, the built-in
//! empirical distribution is used instead.

use crate::instrument::TertileCuts;
use crate::norms::appendix::empirical_flexibility_percentile;
use crate::norms::{NormProvenance, NormResult};
use crate::types::{ContextRankSet, FlexibilityIndex, FlexibilityLevel, LearningMode};
use tracing::debug;

const MODES: f64 = 4.0;

/// Kendall's W over one context rank set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KendallConcordance {
    row_sums: [u32; 4],
    contexts: usize,
}

impl KendallConcordance {
    pub fn from_contexts(contexts: &ContextRankSet) -> Self {
        let mut row_sums = [0u32; 4];
        for ranking in &contexts.contexts {
            for mode in LearningMode::ALL {
                row_sums[mode.index()] += u32::from(ranking.rank(mode));
            }
        }
        Self {
            row_sums,
            contexts: contexts.contexts.len(),
        }
    }

    /// Build from precomputed per-mode rank sums over `contexts` rankings
    pub fn from_row_sums(row_sums: [u32; 4], contexts: usize) -> Self {
        Self { row_sums, contexts }
    }

    pub fn row_sums(&self) -> [u32; 4] {
        self.row_sums
    }

    /// Sum of squared deviations of the row sums from their mean
    pub fn s(&self) -> f64 {
        let mean = self.contexts as f64 * (MODES + 1.0) / 2.0;
        self.row_sums
            .iter()
            .map(|&r| (f64::from(r) - mean).powi(2))
            .sum()
    }

    /// Coefficient of concordance; 0 when there are no contexts
    pub fn w(&self) -> f64 {
        let m = self.contexts as f64;
        let denominator = m * m * (MODES.powi(3) - MODES);
        if denominator == 0.0 {
            return 0.0;
        }
        (12.0 * self.s() / denominator).clamp(0.0, 1.0)
    }

    pub fn flexibility(&self) -> f64 {
        1.0 - self.w()
    }

    /// Raw score looked up on the `LFI` norm scale
    pub fn lfi_raw(&self) -> i32 {
        (self.flexibility() * 100.0).round() as i32
    }
}

/// Computes the flexibility index and its percentile band
pub struct FlexibilityIndexCalculator {
    tertiles: TertileCuts,
}

impl FlexibilityIndexCalculator {
    pub fn new(tertiles: TertileCuts) -> Self {
        Self { tertiles }
    }

    /// Index for a rank set, given the `LFI` conversion of
    /// [`KendallConcordance::lfi_raw`]
    pub fn calculate(&self, concordance: &KendallConcordance, lfi: &NormResult) -> FlexibilityIndex {
        let kendall_w = concordance.w();
        let flexibility = concordance.flexibility();

        let (percentile, provenance) = match lfi.percentile {
            Some(p) => (p, lfi.provenance.clone()),
            None => (
                empirical_flexibility_percentile(flexibility),
                NormProvenance::EmpiricalTable,
            ),
        };
        let level = level_for(self.tertiles, percentile);

        debug!(
            kendall_w,
            flexibility,
            percentile,
            level = level.as_str(),
            provenance = %provenance,
            "Flexibility index computed"
        );

        FlexibilityIndex {
            kendall_w,
            flexibility,
            percentile: Some(percentile),
            level: Some(level),
            provenance,
        }
    }
}

/// Tertile band of a percentile
pub fn level_for(tertiles: TertileCuts, percentile: f64) -> FlexibilityLevel {
    if percentile < tertiles.lower {
        FlexibilityLevel::Low
    } else if percentile < tertiles.upper {
        FlexibilityLevel::Moderate
    } else {
        FlexibilityLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContextRanking;

    const TERTILES: TertileCuts = TertileCuts {
        lower: 33.3,
        upper: 66.7,
    };

    fn rank_set(rows: &[[u8; 4]]) -> ContextRankSet {
        ContextRankSet {
            contexts: rows
                .iter()
                .enumerate()
                .map(|(i, ranks)| ContextRanking {
                    name: format!("context_{}", i),
                    ranks: *ranks,
                })
                .collect(),
        }
    }

    fn worked_example() -> ContextRankSet {
        let mut rows = vec![[1, 2, 3, 4]; 4];
        rows.extend(vec![[4, 3, 2, 1]; 3]);
        rows.push([4, 1, 2, 3]);
        rank_set(&rows)
    }

    #[test]
    fn test_worked_example() {
        let concordance = KendallConcordance::from_contexts(&worked_example());
        assert_eq!(concordance.row_sums(), [20, 18, 20, 22]);
        assert!((concordance.s() - 8.0).abs() < 1e-12);
        assert!((concordance.w() - 0.025).abs() < 1e-12);
        assert!((concordance.flexibility() - 0.975).abs() < 1e-12);
    }

    #[test]
    fn test_identical_rankings_give_full_concordance() {
        let concordance = KendallConcordance::from_contexts(&rank_set(&[[2, 4, 1, 3]; 8]));
        assert!((concordance.w() - 1.0).abs() < 1e-12);
        assert!(concordance.flexibility().abs() < 1e-12);
    }

    #[test]
    fn test_balanced_sums_give_zero_concordance() {
        let mut rows = vec![[1, 2, 3, 4]; 4];
        rows.extend(vec![[4, 3, 2, 1]; 4]);
        let concordance = KendallConcordance::from_contexts(&rank_set(&rows));
        assert_eq!(concordance.row_sums(), [20, 20, 20, 20]);
        assert_eq!(concordance.w(), 0.0);
        assert_eq!(concordance.flexibility(), 1.0);
    }

    #[test]
    fn test_from_row_sums_matches() {
        let concordance = KendallConcordance::from_row_sums([20, 18, 20, 22], 8);
        assert!((concordance.w() - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_no_contexts() {
        let concordance = KendallConcordance::from_row_sums([0; 4], 0);
        assert_eq!(concordance.w(), 0.0);
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_for(TERTILES, 10.0), FlexibilityLevel::Low);
        assert_eq!(level_for(TERTILES, 33.3), FlexibilityLevel::Moderate);
        assert_eq!(level_for(TERTILES, 66.6), FlexibilityLevel::Moderate);
        assert_eq!(level_for(TERTILES, 66.7), FlexibilityLevel::High);
    }

    #[test]
    fn test_lfi_raw_rounds_flexibility() {
        let concordance = KendallConcordance::from_contexts(&worked_example());
        assert_eq!(concordance.lfi_raw(), 98);
        assert_eq!(KendallConcordance::from_row_sums([20; 4], 8).lfi_raw(), 100);
    }

    #[test]
    fn test_empirical_fallback_when_lfi_unknown() {
        let concordance = KendallConcordance::from_contexts(&worked_example());
        let index = FlexibilityIndexCalculator::new(TERTILES)
            .calculate(&concordance, &NormResult::unknown());

        assert!((index.kendall_w - 0.025).abs() < 1e-12);
        // 0.975 is equidistant from 0.95 and 1.00 in the table; either row is high
        assert!(index.percentile.unwrap() > 98.0);
        assert_eq!(index.level, Some(FlexibilityLevel::High));
        assert_eq!(index.provenance, NormProvenance::EmpiricalTable);
    }

    #[test]
    fn test_resolved_lfi_norm_wins() {
        let concordance = KendallConcordance::from_contexts(&worked_example());
        let lfi = NormResult {
            percentile: Some(50.0),
            provenance: NormProvenance::Database {
                group: "Total".into(),
                version: "default".into(),
            },
            truncated: false,
        };

        let index = FlexibilityIndexCalculator::new(TERTILES).calculate(&concordance, &lfi);

        assert_eq!(index.percentile, Some(50.0));
        assert_eq!(index.level, Some(FlexibilityLevel::Moderate));
        assert_eq!(index.provenance.to_string(), "db:Total@default");
    }
}
