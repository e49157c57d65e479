//! Raw score aggregation

use crate::types::{ItemKind, ItemResponse, RawModeScores};

/// Sums ranks per learning mode over the scored items
pub struct RawScoreAggregator;

impl RawScoreAggregator {
    /// Aggregate scored-item ranks into mode totals
    ///
    /// Responses of any other item kind are skipped.
    pub fn aggregate(items: &[ItemResponse]) -> RawModeScores {
        items
            .iter()
            .filter(|r| r.kind == ItemKind::Style)
            .fold(RawModeScores::default(), |mut totals, r| {
                totals.add(r.mode, r.rank as i32);
                totals
            })
    }
}
