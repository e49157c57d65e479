//! Dialectic and balance scores

use crate::instrument::DialecticMedians;
use crate::types::{CombinationMetrics, RawModeScores};

/// Derives combination metrics from raw totals
pub struct CombinationCalculator {
    medians: DialecticMedians,
}

impl CombinationCalculator {
    pub fn new(medians: DialecticMedians) -> Self {
        Self { medians }
    }

    pub fn calculate(&self, raw: &RawModeScores) -> CombinationMetrics {
        CombinationMetrics {
            ac_ce: raw.ac - raw.ce,
            ae_ro: raw.ae - raw.ro,
            assimilating_accommodating: (raw.ac + raw.ro) - (raw.ae + raw.ce),
            converging_diverging: (raw.ac + raw.ae) - (raw.ce + raw.ro),
            balance_acce: (raw.ac - (raw.ce + self.medians.ac_ce)).abs(),
            balance_aero: (raw.ae - (raw.ro + self.medians.ae_ro)).abs(),
        }
    }
}
