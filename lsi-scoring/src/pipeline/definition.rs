//! Pipeline definitions
//!
//! A pipeline is an ordered list of stages. It is built either from a static
//! key list or from a stored graph of `(stage_key, execution_order, next_key)`
//! rows, and is validated once at construction: an invalid definition never
//! reaches the orchestrator.
//!
//! # Stored graph rules
//! - No rows: empty pipeline
//! - A key may appear once and must name a known stage
//! - If no row has a `next_key`, stages run in `execution_order`
//! - Otherwise the head is the row with the lowest `execution_order` and the
//!   chain follows `next_key` pointers; a pointer to a missing row, a revisit
//!   (cycle) or a row the chain never reaches is an error

use super::stage::Stage;
use crate::error::ConfigError;
use lsi_common::db::PipelineStageRow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Stages available to pipelines, by key
#[derive(Clone, Default)]
pub struct StageCatalog {
    stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage; a stage with the same key is replaced
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.key().to_string(), stage);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.stages.contains_key(key)
    }
}

/// Validated, ordered stage list
#[derive(Clone)]
pub struct PipelineDefinition {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineDefinition {
    /// Build from an explicit key order
    pub fn from_keys<S: AsRef<str>>(
        owner: &str,
        keys: &[S],
        catalog: &StageCatalog,
    ) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::EmptyPipeline(owner.to_string()));
        }

        let mut seen = HashSet::new();
        let mut stages = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateStage(key.to_string()));
            }
            let stage = catalog
                .get(key)
                .ok_or_else(|| ConfigError::UnknownStage(key.to_string()))?;
            stages.push(stage);
        }

        Ok(Self { stages })
    }

    /// Build from stored graph rows
    pub fn from_graph(
        owner: &str,
        rows: &[PipelineStageRow],
        catalog: &StageCatalog,
    ) -> Result<Self, ConfigError> {
        if rows.is_empty() {
            return Err(ConfigError::EmptyPipeline(owner.to_string()));
        }

        let mut by_key: HashMap<&str, &PipelineStageRow> = HashMap::with_capacity(rows.len());
        for row in rows {
            if by_key.insert(row.stage_key.as_str(), row).is_some() {
                return Err(ConfigError::DuplicateStage(row.stage_key.clone()));
            }
            if !catalog.contains(&row.stage_key) {
                return Err(ConfigError::UnknownStage(row.stage_key.clone()));
            }
        }

        let mut ordered: Vec<&PipelineStageRow> = rows.iter().collect();
        ordered.sort_by(|a, b| {
            (a.execution_order, &a.stage_key).cmp(&(b.execution_order, &b.stage_key))
        });

        if ordered.iter().all(|row| row.next_key.is_none()) {
            let keys: Vec<&str> = ordered.iter().map(|r| r.stage_key.as_str()).collect();
            return Self::from_keys(owner, &keys, catalog);
        }

        let mut chain: Vec<&str> = Vec::with_capacity(rows.len());
        let mut visited: HashSet<&str> = HashSet::with_capacity(rows.len());
        let mut current = Some(ordered[0]);

        while let Some(row) = current {
            let key = row.stage_key.as_str();
            if !visited.insert(key) {
                return Err(ConfigError::CyclicPipeline(key.to_string()));
            }
            chain.push(key);

            current = match row.next_key.as_deref() {
                None => None,
                Some(next) => Some(
                    *by_key
                        .get(next)
                        .ok_or_else(|| ConfigError::DanglingNext(next.to_string()))?,
                ),
            };
        }

        let unreachable: Vec<String> = ordered
            .iter()
            .filter(|row| !visited.contains(row.stage_key.as_str()))
            .map(|row| row.stage_key.clone())
            .collect();
        if !unreachable.is_empty() {
            return Err(ConfigError::UnreachableStages(unreachable));
        }

        Self::from_keys(owner, &chain, catalog)
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn keys(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.key()).collect()
    }
}

impl fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}
