//! Built-in conversion tables
//!
//! Last tier of the resolver. Tables are sparse: a raw score without an exact
//! row takes the nearest lower row, else the nearest higher row. Scores outside
//! a table's observed range are flagged as truncated.

use super::{NormProvenance, NormResult};
use crate::instrument::scales;
use serde::{Deserialize, Serialize};

/// How an appendix row was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendixMatch {
    Exact,
    NearestLower,
    NearestHigher,
}

impl AppendixMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppendixMatch::Exact => "exact",
            AppendixMatch::NearestLower => "nearest_lower",
            AppendixMatch::NearestHigher => "nearest_higher",
        }
    }
}

/// (raw score, percentile) rows, ascending by raw score
type Rows = &'static [(i32, f64)];

const CE_ROWS: Rows = &[
    (13, 2.8), (15, 5.5), (17, 9.8), (19, 16.2), (21, 24.9), (23, 35.6), (25, 47.5),
    (27, 59.7), (29, 71.0), (31, 80.6), (33, 87.9), (35, 93.0), (37, 96.3), (39, 98.2),
    (41, 99.2), (43, 99.7),
];

const RO_ROWS: Rows = &[
    (15, 0.6), (17, 1.5), (19, 3.3), (21, 6.7), (23, 12.2), (25, 20.2), (27, 30.9), (29, 43.4),
    (31, 56.6), (33, 69.1), (35, 79.8), (37, 87.8), (39, 93.3), (41, 96.7), (43, 98.5),
    (45, 99.4),
];

const AC_ROWS: Rows = &[
    (17, 0.8), (19, 1.6), (21, 3.3), (23, 6.1), (25, 10.6), (27, 17.0), (29, 25.4), (31, 35.7),
    (33, 47.1), (35, 58.7), (37, 69.7), (39, 79.1), (41, 86.5), (43, 91.9), (45, 95.5),
    (47, 97.6),
];

const AE_ROWS: Rows = &[
    (15, 0.3), (17, 0.9), (19, 2.1), (21, 4.5), (23, 8.6), (25, 15.1), (27, 24.2), (29, 35.7),
    (31, 48.7), (33, 61.8), (35, 73.7), (37, 83.3), (39, 90.3), (41, 94.9), (43, 97.5),
    (45, 98.9),
];

const ACCE_ROWS: Rows = &[
    (-27, 0.1), (-24, 0.2), (-21, 0.5), (-18, 1.0), (-15, 2.0), (-12, 3.8), (-9, 6.5),
    (-6, 10.6), (-3, 16.3), (0, 23.7), (3, 32.6), (6, 42.6), (9, 53.2), (12, 63.5), (15, 72.9),
    (18, 81.0), (21, 87.3), (24, 92.0), (27, 95.3), (30, 97.4), (33, 98.6),
];

const AERO_ROWS: Rows = &[
    (-27, 0.4), (-24, 0.8), (-21, 1.7), (-18, 3.4), (-15, 6.1), (-12, 10.4), (-9, 16.6),
    (-6, 24.6), (-3, 34.5), (0, 45.5), (3, 56.8), (6, 67.6), (9, 77.1), (12, 84.8), (15, 90.6),
    (18, 94.5), (21, 97.0), (24, 98.5), (27, 99.3), (30, 99.7),
];

/// Flexibility score (1 − W) to percentile
const FLEXIBILITY_ROWS: &[(f64, f64)] = &[
    (0.00, 0.1), (0.05, 0.1), (0.10, 0.1), (0.15, 0.2), (0.20, 0.6), (0.25, 1.4), (0.30, 3.0),
    (0.35, 5.9), (0.40, 10.6), (0.45, 17.4), (0.50, 26.6), (0.55, 37.7), (0.60, 50.0),
    (0.65, 62.3), (0.70, 73.4), (0.75, 82.6), (0.80, 89.4), (0.85, 94.1), (0.90, 97.0),
    (0.95, 98.6), (1.00, 99.4),
];

fn rows_for(scale: &str) -> Option<Rows> {
    match scale {
        scales::CE => Some(CE_ROWS),
        scales::RO => Some(RO_ROWS),
        scales::AC => Some(AC_ROWS),
        scales::AE => Some(AE_ROWS),
        scales::ACCE => Some(ACCE_ROWS),
        scales::AERO => Some(AERO_ROWS),
        _ => None,
    }
}

/// Whether a built-in table exists for `scale`
pub fn has_table(scale: &str) -> bool {
    rows_for(scale).is_some()
}

/// Look up `raw` in the built-in table for `scale`
pub fn lookup(scale: &str, raw: i32) -> Option<NormResult> {
    let rows = rows_for(scale)?;
    let (first, last) = (rows.first()?.0, rows.last()?.0);

    let (percentile, matched) = match rows.binary_search_by_key(&raw, |(r, _)| *r) {
        Ok(i) => (rows[i].1, AppendixMatch::Exact),
        Err(0) => (rows[0].1, AppendixMatch::NearestHigher),
        Err(i) => (rows[i - 1].1, AppendixMatch::NearestLower),
    };

    Some(NormResult {
        percentile: Some(percentile),
        provenance: NormProvenance::Appendix {
            scale: scale.to_string(),
            matched,
        },
        truncated: raw < first || raw > last,
    })
}

/// Percentile of the closest tabulated flexibility score (ties go lower)
pub fn empirical_flexibility_percentile(flexibility: f64) -> f64 {
    let mut best = FLEXIBILITY_ROWS[0];
    for &row in FLEXIBILITY_ROWS {
        if (row.0 - flexibility).abs() < (best.0 - flexibility).abs() {
            best = row;
        }
    }
    best.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(result: &NormResult) -> AppendixMatch {
        match &result.provenance {
            NormProvenance::Appendix { matched, .. } => *matched,
            other => panic!("unexpected provenance {other:?}"),
        }
    }

    #[test]
    fn test_tables_are_sorted_and_bounded() {
        for scale in [
            scales::CE,
            scales::RO,
            scales::AC,
            scales::AE,
            scales::ACCE,
            scales::AERO,
        ] {
            let rows = rows_for(scale).unwrap();
            assert!(rows.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1));
            assert!(rows.iter().all(|(_, p)| (0.0..=100.0).contains(p)));
        }
    }

    #[test]
    fn test_exact_match() {
        let result = lookup(scales::CE, 25).unwrap();
        assert_eq!(result.percentile, Some(47.5));
        assert_eq!(matched(&result), AppendixMatch::Exact);
        assert!(!result.truncated);
    }

    #[test]
    fn test_nearest_lower_inside_range() {
        let result = lookup(scales::CE, 26).unwrap();
        assert_eq!(result.percentile, Some(47.5));
        assert_eq!(matched(&result), AppendixMatch::NearestLower);
        assert!(!result.truncated);
    }

    #[test]
    fn test_below_range_uses_nearest_higher_and_truncates() {
        let result = lookup(scales::CE, 12).unwrap();
        assert_eq!(result.percentile, Some(2.8));
        assert_eq!(matched(&result), AppendixMatch::NearestHigher);
        assert!(result.truncated);
    }

    #[test]
    fn test_above_range_truncates() {
        let result = lookup(scales::ACCE, 36).unwrap();
        assert_eq!(result.percentile, Some(98.6));
        assert_eq!(matched(&result), AppendixMatch::NearestLower);
        assert!(result.truncated);
    }

    #[test]
    fn test_unknown_scale() {
        assert!(lookup("LFI", 50).is_none());
        assert!(!has_table("XYZ"));
    }

    #[test]
    fn test_empirical_flexibility_nearest() {
        assert_eq!(empirical_flexibility_percentile(0.6), 50.0);
        assert_eq!(empirical_flexibility_percentile(0.96), 98.6);
        assert_eq!(empirical_flexibility_percentile(0.0), 0.1);
        assert_eq!(empirical_flexibility_percentile(0.62), 50.0);
    }
}
