//! Percentile resolver
//!
//! # Precedence
//! For each (scale, raw) the first tier that yields a percentile wins:
//! 1. Stored rows: groups in chain order, and within a group the requested
//!    version before the default version
//! 2. External provider, groups in chain order
//! 3. Built-in appendix table
//!
//! Otherwise the result is `unknown` with a null percentile.
//!
//! Every outcome is cached by content. [`NormResolver::bulk_load`] clears the
//! cache after writing; callers that change norm tables any other way must call
//! [`NormResolver::invalidate`].

use super::appendix;
use super::cache::{NormCache, NormCacheKey};
use super::external::{ExternalNormProvider, HttpNormProvider};
use super::groups::NormGroupChain;
use super::repository::{NormBatchQuery, NormRepository, NormTable, SqliteNormRepository};
use super::{NormProvenance, NormResult};
use crate::error::ScoringResult;
use lsi_common::config::ScoringSettings;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CACHE_CAPACITY: usize = 4096;
const DEFAULT_VERSION: &str = "default";

/// Builder for [`NormResolver`]
pub struct NormResolverBuilder {
    repository: Arc<dyn NormRepository>,
    external: Option<Arc<dyn ExternalNormProvider>>,
    cache_capacity: usize,
    requested_version: Option<String>,
    default_version: String,
}

impl NormResolverBuilder {
    pub fn new(repository: Arc<dyn NormRepository>) -> Self {
        Self {
            repository,
            external: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            requested_version: None,
            default_version: DEFAULT_VERSION.to_string(),
        }
    }

    pub fn external(mut self, provider: Arc<dyn ExternalNormProvider>) -> Self {
        self.external = Some(provider);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Version token tried before the default within each group
    pub fn requested_version(mut self, version: Option<String>) -> Self {
        self.requested_version = version.filter(|v| !v.trim().is_empty());
        self
    }

    pub fn default_version(mut self, version: impl Into<String>) -> Self {
        self.default_version = version.into();
        self
    }

    pub fn build(self) -> NormResolver {
        let mut versions = Vec::with_capacity(2);
        if let Some(requested) = self.requested_version {
            if requested != self.default_version {
                versions.push(requested);
            }
        }
        versions.push(self.default_version);

        NormResolver {
            repository: self.repository,
            external: self.external,
            cache: NormCache::new(self.cache_capacity),
            versions,
        }
    }
}

/// Conversions resolved for one chain, keyed by (scale, raw)
///
/// Finalize resolves these before opening its write transaction.
#[derive(Debug, Clone, Default)]
pub struct NormLookups {
    results: HashMap<(String, i32), NormResult>,
}

impl NormLookups {
    pub fn get(&self, scale: &str, raw: i32) -> Option<&NormResult> {
        self.results.get(&(scale.to_string(), raw))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Multi-tier, cached percentile lookup; safe to share across tasks
pub struct NormResolver {
    repository: Arc<dyn NormRepository>,
    external: Option<Arc<dyn ExternalNormProvider>>,
    cache: NormCache,
    /// Requested version (if any) followed by the default version
    versions: Vec<String>,
}

impl NormResolver {
    pub fn builder(repository: Arc<dyn NormRepository>) -> NormResolverBuilder {
        NormResolverBuilder::new(repository)
    }

    /// Resolver over the SQLite norm tables, wired from configuration
    pub fn from_settings(pool: SqlitePool, settings: &ScoringSettings) -> ScoringResult<Self> {
        let mut builder = Self::builder(Arc::new(SqliteNormRepository::new(pool)))
            .cache_capacity(settings.norm_cache_capacity)
            .requested_version(settings.norm_version.clone())
            .default_version(settings.default_norm_version.clone());

        if let Some(external) = &settings.external {
            builder = builder.external(Arc::new(HttpNormProvider::new(external)?));
        }

        Ok(builder.build())
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Cache statistics and contents
    pub fn cache(&self) -> &NormCache {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<dyn NormRepository> {
        &self.repository
    }

    fn cache_key(&self, chain: &NormGroupChain, scale: &str, raw: i32) -> NormCacheKey {
        NormCacheKey {
            chain: format!("{}#{}", chain.cache_token(), self.versions.join(",")),
            scale: scale.to_string(),
            raw,
        }
    }

    /// Resolve one (scale, raw) pair
    pub async fn resolve(
        &self,
        chain: &NormGroupChain,
        scale: &str,
        raw: i32,
    ) -> ScoringResult<NormResult> {
        let mut results = self.resolve_many(chain, &[(scale.to_string(), raw)]).await?;
        Ok(results.pop().unwrap_or_else(NormResult::unknown))
    }

    /// Resolve many pairs sharing one chain
    ///
    /// Cache misses are fetched from the repository in a single batch query.
    /// Results are returned in request order. A result fetched while the cache
    /// was invalidated is returned but not cached.
    pub async fn resolve_many(
        &self,
        chain: &NormGroupChain,
        requests: &[(String, i32)],
    ) -> ScoringResult<Vec<NormResult>> {
        let generation = self.cache.generation();
        let mut results: Vec<Option<NormResult>> = Vec::with_capacity(requests.len());
        let mut misses: Vec<(usize, NormCacheKey)> = Vec::new();

        for (index, (scale, raw)) in requests.iter().enumerate() {
            let key = self.cache_key(chain, scale, *raw);
            match self.cache.get(&key) {
                Some(hit) => results.push(Some(hit)),
                None => {
                    results.push(None);
                    misses.push((index, key));
                }
            }
        }

        if misses.is_empty() {
            return Ok(results.into_iter().flatten().collect());
        }

        let query = NormBatchQuery {
            groups: chain.groups().to_vec(),
            versions: self.versions.clone(),
            scales: unique(misses.iter().map(|(_, k)| k.scale.clone())),
            raw_scores: unique(misses.iter().map(|(_, k)| k.raw)),
        };
        let stored: HashMap<(String, String, String, i64), f64> = self
            .repository
            .fetch_batch(&query)
            .await?
            .into_iter()
            .map(|row| {
                (
                    (row.norm_group, row.version, row.scale, row.raw_score),
                    row.percentile,
                )
            })
            .collect();

        for (index, key) in misses {
            let resolved = match self.lookup_stored(&stored, chain, &key) {
                Some(result) => result,
                None => self.lookup_fallbacks(chain, &key).await,
            };
            if !self.cache.put_if_current(generation, key, resolved.clone()) {
                debug!("Norm cache invalidated during lookup, result not cached");
            }
            results[index] = Some(resolved);
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(NormResult::unknown))
            .collect())
    }

    fn lookup_stored(
        &self,
        stored: &HashMap<(String, String, String, i64), f64>,
        chain: &NormGroupChain,
        key: &NormCacheKey,
    ) -> Option<NormResult> {
        for group in chain.groups() {
            for version in &self.versions {
                let lookup = (
                    group.clone(),
                    version.clone(),
                    key.scale.clone(),
                    i64::from(key.raw),
                );
                if let Some(&percentile) = stored.get(&lookup) {
                    debug!(scale = %key.scale, raw = key.raw, group = %group, version = %version, "Norm resolved from database");
                    return Some(NormResult {
                        percentile: Some(percentile),
                        provenance: NormProvenance::Database {
                            group: group.clone(),
                            version: version.clone(),
                        },
                        truncated: false,
                    });
                }
            }
        }
        None
    }

    async fn lookup_fallbacks(&self, chain: &NormGroupChain, key: &NormCacheKey) -> NormResult {
        if let Some(external) = &self.external {
            for group in chain.groups() {
                if let Some(percentile) = external.lookup(group, &key.scale, key.raw).await {
                    debug!(scale = %key.scale, raw = key.raw, group = %group, "Norm resolved from external provider");
                    return NormResult {
                        percentile: Some(percentile),
                        provenance: NormProvenance::External {
                            group: group.clone(),
                        },
                        truncated: false,
                    };
                }
            }
        }

        match appendix::lookup(&key.scale, key.raw) {
            Some(result) => {
                debug!(scale = %key.scale, raw = key.raw, provenance = %result.provenance, "Norm resolved from appendix");
                result
            }
            None => {
                debug!(scale = %key.scale, raw = key.raw, "No norm source for scale");
                NormResult::unknown()
            }
        }
    }

    /// Resolve `requests` ahead of time into a [`NormLookups`] set
    pub async fn prefetch(
        &self,
        chain: &NormGroupChain,
        requests: &[(String, i32)],
    ) -> ScoringResult<NormLookups> {
        let results = self.resolve_many(chain, requests).await?;
        Ok(NormLookups {
            results: requests.iter().cloned().zip(results).collect(),
        })
    }

    /// Replace one (group, version) table, then drop every cached lookup
    pub async fn bulk_load(&self, table: &NormTable) -> ScoringResult<u64> {
        let written = self.repository.replace_table(table).await?;
        self.invalidate();
        Ok(written)
    }

    /// Clear the cache
    pub fn invalidate(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!(dropped, "Norm cache invalidated");
    }
}

fn unique<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
    values.collect::<BTreeSet<T>>().into_iter().collect()
}
