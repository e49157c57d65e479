//! Norm group candidate chain
//!
//! Built from respondent attributes in priority order: education level,
//! country, age band, gender. The catch-all group always comes last.

use crate::types::Demographics;
use chrono::{Datelike, NaiveDate};
use std::fmt;

/// Ordered, de-duplicated list of norm groups to try
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormGroupChain {
    groups: Vec<String>,
}

impl NormGroupChain {
    /// Group every chain ends with
    pub const CATCH_ALL: &'static str = "Total";

    /// Build a chain from explicit groups; blanks and repeats are dropped
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chain: Vec<String> = Vec::new();
        for group in groups {
            let group = group.as_ref().trim();
            if group.is_empty() || group == Self::CATCH_ALL {
                continue;
            }
            if !chain.iter().any(|g| g == group) {
                chain.push(group.to_string());
            }
        }
        chain.push(Self::CATCH_ALL.to_string());
        Self { groups: chain }
    }

    /// Chain holding only the catch-all group
    pub fn catch_all() -> Self {
        Self::new(std::iter::empty::<&str>())
    }

    /// Chain for a respondent, with age measured at `as_of`
    pub fn from_demographics(demographics: &Demographics, as_of: NaiveDate) -> Self {
        let band = demographics
            .birth_date
            .and_then(|born| age_in_years(born, as_of))
            .map(age_band);

        Self::new(
            [
                demographics.education_level.clone(),
                demographics.country.clone(),
                band.map(str::to_string),
                demographics.gender.clone(),
            ]
            .into_iter()
            .flatten(),
        )
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Stable text form used in cache keys
    pub fn cache_token(&self) -> String {
        self.groups.join("|")
    }
}

impl fmt::Display for NormGroupChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.groups.join(" > "))
    }
}

/// Whole years between `born` and `as_of`; `None` if born after `as_of`
fn age_in_years(born: NaiveDate, as_of: NaiveDate) -> Option<u32> {
    if born > as_of {
        return None;
    }
    let mut years = as_of.year() - born.year();
    if (as_of.month(), as_of.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Age band labels used by the stored norm tables
fn age_band(age: u32) -> &'static str {
    match age {
        0..=18 => "<19",
        19..=24 => "19-24",
        25..=34 => "25-34",
        35..=44 => "35-44",
        45..=54 => "45-54",
        55..=64 => "55-64",
        _ => ">64",
    }
}
