//! Instrument definitions
//!
//! An [`InstrumentDefinition`] is the declarative description of one
//! instrument version: item bank size, context vocabulary, scored scales,
//! style grid, normative medians and the static step list used when no
//! strategy or stored pipeline is registered.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Percentile scale codes
pub mod scales {
    pub const CE: &str = "CE";
    pub const RO: &str = "RO";
    pub const AC: &str = "AC";
    pub const AE: &str = "AE";
    pub const ACCE: &str = "ACCE";
    pub const AERO: &str = "AERO";
    /// Learning flexibility index, raw domain 0..=100
    pub const LFI: &str = "LFI";
}

/// (code, version) identity of an instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub code: String,
    pub version: String,
}

impl InstrumentKey {
    pub fn new(code: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.code, self.version)
    }
}

/// Inclusive, optionally open-ended interval on one dialectic axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisBand {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl AxisBand {
    pub const fn new(min: Option<i32>, max: Option<i32>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i32) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    /// Distance from `value` to the nearest point of the band (0 when inside)
    pub fn distance(&self, value: i32) -> i64 {
        let value = i64::from(value);
        if let Some(min) = self.min {
            let min = i64::from(min);
            if value < min {
                return min - value;
            }
        }
        if let Some(max) = self.max {
            let max = i64::from(max);
            if value > max {
                return value - max;
            }
        }
        0
    }

    fn is_inverted(&self) -> bool {
        matches!((self.min, self.max), (Some(min), Some(max)) if min > max)
    }
}

/// Named window on the (AC−CE, AE−RO) plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRegion {
    pub name: String,
    pub ac_ce: AxisBand,
    pub ae_ro: AxisBand,
}

impl StyleRegion {
    pub fn new(name: impl Into<String>, ac_ce: AxisBand, ae_ro: AxisBand) -> Self {
        Self {
            name: name.into(),
            ac_ce,
            ae_ro,
        }
    }

    pub fn contains(&self, ac_ce: i32, ae_ro: i32) -> bool {
        self.ac_ce.contains(ac_ce) && self.ae_ro.contains(ae_ro)
    }

    /// L1 distance from the point to the nearest point inside the window
    pub fn distance(&self, ac_ce: i32, ae_ro: i32) -> i64 {
        self.ac_ce.distance(ac_ce) + self.ae_ro.distance(ae_ro)
    }
}

/// Normative medians used by the balance scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialecticMedians {
    pub ac_ce: i32,
    pub ae_ro: i32,
}

/// Percentile cut points splitting low / moderate / high
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TertileCuts {
    /// Percentiles below this are `low`
    pub lower: f64,
    /// Percentiles below this (and at or above `lower`) are `moderate`
    pub upper: f64,
}

/// Declarative description of one instrument version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    pub key: InstrumentKey,
    /// Number of scored forced-choice items
    pub item_count: usize,
    /// Number of context rankings required
    pub context_count: usize,
    pub context_vocabulary: Vec<String>,
    /// Scales converted to percentiles by the percentile stage
    pub scales: Vec<String>,
    pub medians: DialecticMedians,
    /// Evaluated in declared order
    pub style_regions: Vec<StyleRegion>,
    pub flexibility_tertiles: TertileCuts,
    /// Static pipeline step keys
    pub steps: Vec<String>,
    /// Strategy code tried after the session's own preference
    pub preferred_strategy: Option<String>,
}

impl InstrumentDefinition {
    /// Ranks per item are a permutation of 1..=4
    pub const ITEM_RANK_SUM: i64 = 10;

    /// Kolb Learning Style Inventory 4.0
    pub fn klsi_4_0() -> Self {
        let low = AxisBand::new(None, Some(5));
        let mid = AxisBand::new(Some(6), Some(14));
        let high = AxisBand::new(Some(15), None);
        let passive = AxisBand::new(None, Some(0));
        let center = AxisBand::new(Some(1), Some(11));
        let active = AxisBand::new(Some(12), None);

        Self {
            key: InstrumentKey::new("KLSI", "4.0"),
            item_count: 12,
            context_count: 8,
            context_vocabulary: [
                "starting_something_new",
                "influencing_someone",
                "getting_to_know_someone",
                "learning_in_a_group",
                "planning_something",
                "analyzing_something",
                "evaluating_an_opportunity",
                "choosing_between_alternatives",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            scales: [
                scales::CE,
                scales::RO,
                scales::AC,
                scales::AE,
                scales::ACCE,
                scales::AERO,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            medians: DialecticMedians { ac_ce: 9, ae_ro: 6 },
            style_regions: vec![
                StyleRegion::new("Initiating", low, active),
                StyleRegion::new("Experiencing", low, center),
                StyleRegion::new("Imagining", low, passive),
                StyleRegion::new("Reflecting", mid, passive),
                StyleRegion::new("Analyzing", high, passive),
                StyleRegion::new("Thinking", high, center),
                StyleRegion::new("Deciding", high, active),
                StyleRegion::new("Acting", mid, active),
                StyleRegion::new("Balancing", mid, center),
            ],
            flexibility_tertiles: TertileCuts {
                lower: 33.3,
                upper: 66.7,
            },
            steps: crate::pipeline::stages::STANDARD_STAGE_KEYS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            preferred_strategy: None,
        }
    }

    /// Reject definitions no pipeline could score correctly
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidInstrument {
            instrument: self.key.to_string(),
            reason,
        };

        if self.item_count == 0 {
            return Err(invalid("item bank is empty".to_string()));
        }
        if self.style_regions.is_empty() {
            return Err(invalid("no style regions configured".to_string()));
        }

        let mut names = HashSet::new();
        for region in &self.style_regions {
            if !names.insert(region.name.as_str()) {
                return Err(invalid(format!("style region '{}' declared twice", region.name)));
            }
            if region.ac_ce.is_inverted() || region.ae_ro.is_inverted() {
                return Err(invalid(format!(
                    "style region '{}' has a lower bound above its upper bound",
                    region.name
                )));
            }
        }

        let vocabulary: HashSet<&str> =
            self.context_vocabulary.iter().map(String::as_str).collect();
        if vocabulary.len() != self.context_vocabulary.len() {
            return Err(invalid("context vocabulary contains duplicates".to_string()));
        }
        if self.context_count > vocabulary.len() {
            return Err(invalid(format!(
                "{} contexts required but vocabulary has {}",
                self.context_count,
                vocabulary.len()
            )));
        }

        let cuts = self.flexibility_tertiles;
        if !(0.0..=100.0).contains(&cuts.lower)
            || !(0.0..=100.0).contains(&cuts.upper)
            || cuts.lower > cuts.upper
        {
            return Err(invalid(format!(
                "tertile cuts {} / {} are not ordered within 0..=100",
                cuts.lower, cuts.upper
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_klsi_definition_is_valid() {
        let definition = InstrumentDefinition::klsi_4_0();
        assert!(definition.validate().is_ok());
        assert_eq!(definition.context_vocabulary.len(), 8);
        assert_eq!(definition.style_regions.len(), 9);
        assert_eq!(definition.key.to_string(), "KLSI@4.0");
    }

    #[test]
    fn test_band_distance() {
        let band = AxisBand::new(Some(6), Some(14));
        assert_eq!(band.distance(10), 0);
        assert_eq!(band.distance(2), 4);
        assert_eq!(band.distance(20), 6);

        let open = AxisBand::new(None, Some(0));
        assert_eq!(open.distance(-100), 0);
        assert_eq!(open.distance(3), 3);
    }

    #[test]
    fn test_inverted_region_is_rejected() {
        let mut definition = InstrumentDefinition::klsi_4_0();
        definition.style_regions[0].ac_ce = AxisBand::new(Some(10), Some(2));
        assert!(matches!(
            definition.validate(),
            Err(ConfigError::InvalidInstrument { .. })
        ));
    }

    #[test]
    fn test_duplicate_region_name_is_rejected() {
        let mut definition = InstrumentDefinition::klsi_4_0();
        let copy = definition.style_regions[0].clone();
        definition.style_regions.push(copy);
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_context_count_larger_than_vocabulary_is_rejected() {
        let mut definition = InstrumentDefinition::klsi_4_0();
        definition.context_count = 9;
        assert!(definition.validate().is_err());
    }
}
