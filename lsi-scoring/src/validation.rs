//! Validation gate
//!
//! Enforces forced-choice and context integrity before any score is computed.
//! The gate is pure: it never touches the database, so a rejected submission
//! leaves no trace.
//!
//! # Check order
//! 1. Item checks: item in bank, rank in 1..=4, one rank per choice, all four
//!    choices ranked, every item present
//! 2. Rank sum per item equals [`InstrumentDefinition::ITEM_RANK_SUM`]
//! 3. Rank values distinct per item
//! 4. Context checks: vocabulary, duplicates, count, permutation
//!
//! The first failing check is reported.

use crate::error::ValidationError;
use crate::instrument::InstrumentDefinition;
use crate::types::{
    ContextRankResponse, ContextRankSet, ContextRanking, ItemKind, ItemResponse, LearningMode,
    ResponseSet, ValidatedResponses,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Forced-choice integrity gate for one instrument definition
pub struct ValidationGate<'a> {
    definition: &'a InstrumentDefinition,
}

impl<'a> ValidationGate<'a> {
    pub fn new(definition: &'a InstrumentDefinition) -> Self {
        Self { definition }
    }

    /// Validate a full submission
    pub fn validate(&self, responses: &ResponseSet) -> Result<ValidatedResponses, ValidationError> {
        self.check_items(&responses.items)?;
        let contexts = self.check_contexts(&responses.contexts)?;

        debug!(
            items = responses.items.len(),
            contexts = contexts.contexts.len(),
            "Submission passed validation gate"
        );

        Ok(ValidatedResponses {
            items: responses.items.clone(),
            contexts,
        })
    }

    fn check_items(&self, items: &[ItemResponse]) -> Result<(), ValidationError> {
        let bank_size = self.definition.item_count;
        let mut by_item: BTreeMap<i64, Vec<&ItemResponse>> = BTreeMap::new();

        for response in items.iter().filter(|r| r.kind == ItemKind::Style) {
            if response.item_number < 1 || response.item_number > bank_size as i64 {
                return Err(ValidationError::UnknownItem {
                    item: response.item_number,
                    bank_size,
                });
            }
            if !(1..=4).contains(&response.rank) {
                return Err(ValidationError::RankOutOfRange {
                    item: response.item_number,
                    rank: response.rank,
                });
            }
            by_item.entry(response.item_number).or_default().push(response);
        }

        for (&item, responses) in &by_item {
            let mut seen_modes = HashSet::new();
            for response in responses {
                if !seen_modes.insert(response.mode) {
                    return Err(ValidationError::DuplicateChoice {
                        item,
                        mode: response.mode,
                    });
                }
            }
            if responses.len() < LearningMode::ALL.len() {
                return Err(ValidationError::IncompleteItem {
                    item,
                    ranked: responses.len(),
                });
            }
        }

        let missing: Vec<i64> = (1..=bank_size as i64)
            .filter(|item| !by_item.contains_key(item))
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingItems { missing });
        }

        for (&item, responses) in &by_item {
            let sum: i64 = responses.iter().map(|r| r.rank).sum();
            if sum != InstrumentDefinition::ITEM_RANK_SUM {
                return Err(ValidationError::RankSumMismatch {
                    item,
                    sum,
                    expected: InstrumentDefinition::ITEM_RANK_SUM,
                });
            }
        }

        // Same-sum duplicates (e.g. 1,1,4,4) get past the sum check
        for (&item, responses) in &by_item {
            let mut seen_ranks = HashSet::new();
            for response in responses {
                if !seen_ranks.insert(response.rank) {
                    return Err(ValidationError::DuplicateRank {
                        item,
                        rank: response.rank,
                    });
                }
            }
        }

        Ok(())
    }

    fn check_contexts(
        &self,
        contexts: &[ContextRankResponse],
    ) -> Result<ContextRankSet, ValidationError> {
        let vocabulary = &self.definition.context_vocabulary;
        let mut by_name: HashMap<&str, Vec<&ContextRankResponse>> = HashMap::new();

        for response in contexts {
            if !vocabulary.iter().any(|v| v == &response.context_name) {
                return Err(ValidationError::UnknownContext {
                    name: response.context_name.clone(),
                });
            }
            by_name
                .entry(response.context_name.as_str())
                .or_default()
                .push(response);
        }

        // A duplicate is a whole second rank set; a stray extra row is a
        // malformed permutation. Vocabulary order keeps the report deterministic.
        let modes = LearningMode::ALL.len();
        for name in vocabulary {
            if let Some(rows) = by_name.get(name.as_str()) {
                if rows.len() > modes && rows.len() % modes == 0 {
                    return Err(ValidationError::DuplicateContext { name: name.clone() });
                }
            }
        }

        if by_name.len() != self.definition.context_count {
            return Err(ValidationError::ContextCount {
                expected: self.definition.context_count,
                found: by_name.len(),
            });
        }

        let mut rankings = Vec::with_capacity(by_name.len());
        for name in vocabulary {
            let Some(rows) = by_name.get(name.as_str()) else {
                continue;
            };
            let ranking = to_permutation(name, rows)
                .ok_or_else(|| ValidationError::ContextNotPermutation { name: name.clone() })?;
            rankings.push(ranking);
        }

        Ok(ContextRankSet { contexts: rankings })
    }
}

/// Build a ranking when the rows rank every mode once with 1..=4 each once
fn to_permutation(name: &str, rows: &[&ContextRankResponse]) -> Option<ContextRanking> {
    if rows.len() != LearningMode::ALL.len() {
        return None;
    }

    let mut ranks = [0u8; 4];
    let mut used = [false; 4];
    for row in rows {
        if !(1..=4).contains(&row.rank) {
            return None;
        }
        let slot = &mut ranks[row.mode.index()];
        if *slot != 0 || used[(row.rank - 1) as usize] {
            return None;
        }
        *slot = row.rank as u8;
        used[(row.rank - 1) as usize] = true;
    }

    Some(ContextRanking {
        name: name.to_string(),
        ranks,
    })
}
