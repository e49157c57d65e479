//! Style classification
//!
//! Maps the (AC−CE, AE−RO) point to a named region.
//!
//! # Algorithm
//! 1. Walk regions in declared order; the first window containing the point
//!    is the primary style
//! 2. If no window contains the point, the region with the smallest L1
//!    distance to its window becomes primary (ties: declared order)
//! 3. The backup is the smallest-distance region other than the primary
//!    (ties: declared order)
//!
//! The classifier is total: any integer point yields a primary, and a backup
//! whenever at least two regions exist.

use crate::error::ConfigError;
use crate::instrument::StyleRegion;
use crate::types::{CombinationMetrics, RawModeScores, StyleAssignment, StyleMatch};
use tracing::warn;

/// Region-based style classifier
pub struct StyleClassifier<'a> {
    regions: &'a [StyleRegion],
}

impl<'a> StyleClassifier<'a> {
    pub fn new(regions: &'a [StyleRegion]) -> Self {
        Self { regions }
    }

    /// Classify a session from its combination metrics and raw totals
    pub fn classify(
        &self,
        metrics: &CombinationMetrics,
        kite: RawModeScores,
    ) -> Result<StyleAssignment, ConfigError> {
        let (x, y) = (metrics.ac_ce, metrics.ae_ro);
        if self.regions.is_empty() {
            return Err(ConfigError::InvalidInstrument {
                instrument: "style classifier".to_string(),
                reason: "no style regions configured".to_string(),
            });
        }

        let distances: Vec<i64> = self.regions.iter().map(|r| r.distance(x, y)).collect();

        let (primary, matched_by) = match self.regions.iter().position(|r| r.contains(x, y)) {
            Some(index) => (index, StyleMatch::Region),
            None => {
                let index = argmin(&distances, None).unwrap_or(0);
                warn!(
                    ac_ce = x,
                    ae_ro = y,
                    style = %self.regions[index].name,
                    distance = distances[index],
                    "Point outside every style window, using nearest region"
                );
                (index, StyleMatch::Distance)
            }
        };

        let backup = argmin(&distances, Some(primary)).map(|i| self.regions[i].name.clone());

        Ok(StyleAssignment {
            primary: self.regions[primary].name.clone(),
            backup,
            matched_by,
            intensity: x.abs() + y.abs(),
            intensity_euclidean: f64::from(x).hypot(f64::from(y)),
            kite,
        })
    }

    /// Integer points in the square `-bound..=bound` not covered by any window
    ///
    /// Used to surface authoring gaps at registration time instead of letting
    /// the distance fallback hide them.
    pub fn uncovered_points(&self, bound: i32) -> Vec<(i32, i32)> {
        let mut gaps = Vec::new();
        for x in -bound..=bound {
            for y in -bound..=bound {
                if !self.regions.iter().any(|r| r.contains(x, y)) {
                    gaps.push((x, y));
                }
            }
        }
        gaps
    }
}

/// Index of the smallest distance, first wins on ties
fn argmin(distances: &[i64], exclude: Option<usize>) -> Option<usize> {
    distances
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != exclude)
        .min_by_key(|(i, d)| (**d, *i))
        .map(|(i, _)| i)
}
