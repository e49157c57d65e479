//! Built-in stages
//!
//! | key           | requires                        | persists              |
//! |---------------|---------------------------------|-----------------------|
//! | `raw_scores`  |                                 | `raw_scores`          |
//! | `combination` | `raw_scores`                    | `combination_scores`  |
//! | `style`       | `raw_scores`, `combination`     | `style_assignments`   |
//! | `flexibility` |                                 | `flexibility_indices` |
//! | `percentiles` | `raw_scores`, `combination`     | `scale_percentiles`   |
//! | `delta`       | `combination`, `style`, `flexibility` | `session_deltas` |

use super::definition::StageCatalog;
use super::stage::{required, Stage, StageContext};
use crate::db::artifacts;
use crate::error::{ConfigError, ScoringResult};
use crate::instrument::{scales, InstrumentDefinition};
use crate::longitudinal::LongitudinalDeltaCalculator;
use crate::norms::NormResult;
use crate::scoring::{
    CombinationCalculator, FlexibilityIndexCalculator, KendallConcordance, RawScoreAggregator,
    StyleClassifier,
};
use crate::types::{CombinationMetrics, RawModeScores, ScalePercentile, ValidatedResponses};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const RAW_SCORES: &str = "raw_scores";
pub const COMBINATION: &str = "combination";
pub const STYLE: &str = "style";
pub const FLEXIBILITY: &str = "flexibility";
pub const PERCENTILES: &str = "percentiles";
pub const DELTA: &str = "delta";

/// Default stage order
pub const STANDARD_STAGE_KEYS: [&str; 6] =
    [RAW_SCORES, COMBINATION, STYLE, FLEXIBILITY, PERCENTILES, DELTA];

/// Built-in stages in default order
pub fn standard_stages() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(RawScoresStage),
        Arc::new(CombinationStage),
        Arc::new(StyleStage),
        Arc::new(FlexibilityStage),
        Arc::new(PercentilesStage),
        Arc::new(DeltaStage),
    ]
}

/// Catalog holding every built-in stage
pub fn standard_catalog() -> StageCatalog {
    let mut catalog = StageCatalog::new();
    for stage in standard_stages() {
        catalog.register(stage);
    }
    catalog
}

/// Conversions the built-in stages look up for a submission
///
/// Every pure input (raw totals, dialectics, flexibility) is derived from the
/// validated responses alone, so the list is known before any stage runs.
/// Scales without a raw score source are left to [`PercentilesStage`] to
/// report.
pub fn norm_requests(
    definition: &InstrumentDefinition,
    responses: &ValidatedResponses,
) -> Vec<(String, i32)> {
    let raw = RawScoreAggregator::aggregate(responses.items());
    let metrics = CombinationCalculator::new(definition.medians).calculate(&raw);

    let mut requests: Vec<(String, i32)> = definition
        .scales
        .iter()
        .filter_map(|scale| {
            scale_value(scale, &raw, &metrics)
                .ok()
                .map(|value| (scale.clone(), value))
        })
        .collect();
    let concordance = KendallConcordance::from_contexts(responses.contexts());
    requests.push((scales::LFI.to_string(), concordance.lfi_raw()));
    requests
}

pub struct RawScoresStage;

#[async_trait]
impl Stage for RawScoresStage {
    fn key(&self) -> &str {
        RAW_SCORES
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        let raw = RawScoreAggregator::aggregate(ctx.responses().items());
        let (session_id, now) = (ctx.session().id, ctx.now());

        artifacts::insert_raw_scores(ctx.conn(), session_id, &raw, now).await?;
        debug!(%session_id, ce = raw.ce, ro = raw.ro, ac = raw.ac, ae = raw.ae, "Raw scores");

        ctx.artifacts_mut().raw_scores = Some(raw);
        Ok(())
    }
}

pub struct CombinationStage;

#[async_trait]
impl Stage for CombinationStage {
    fn key(&self) -> &str {
        COMBINATION
    }

    fn requires(&self) -> &[&'static str] {
        &[RAW_SCORES]
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        let raw = required(ctx.artifacts().raw_scores, COMBINATION, RAW_SCORES)?;
        let metrics = CombinationCalculator::new(ctx.definition().medians).calculate(&raw);
        let session_id = ctx.session().id;

        artifacts::insert_combination(ctx.conn(), session_id, &metrics).await?;

        ctx.artifacts_mut().combination = Some(metrics);
        Ok(())
    }
}

pub struct StyleStage;

#[async_trait]
impl Stage for StyleStage {
    fn key(&self) -> &str {
        STYLE
    }

    fn requires(&self) -> &[&'static str] {
        &[RAW_SCORES, COMBINATION]
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        let raw = required(ctx.artifacts().raw_scores, STYLE, RAW_SCORES)?;
        let metrics = required(ctx.artifacts().combination, STYLE, COMBINATION)?;
        let definition = ctx.definition();
        let style = StyleClassifier::new(&definition.style_regions).classify(&metrics, raw)?;
        let session_id = ctx.session().id;

        artifacts::insert_style(ctx.conn(), session_id, &style).await?;
        debug!(%session_id, primary = %style.primary, backup = ?style.backup, "Style assigned");

        ctx.artifacts_mut().style = Some(style);
        Ok(())
    }
}

pub struct FlexibilityStage;

#[async_trait]
impl Stage for FlexibilityStage {
    fn key(&self) -> &str {
        FLEXIBILITY
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        let definition = ctx.definition();
        let concordance = KendallConcordance::from_contexts(ctx.responses().contexts());
        let lfi = ctx
            .resolve_norms(&[(scales::LFI.to_string(), concordance.lfi_raw())])
            .await?
            .pop()
            .unwrap_or_else(NormResult::unknown);
        let index = FlexibilityIndexCalculator::new(definition.flexibility_tertiles)
            .calculate(&concordance, &lfi);
        let session_id = ctx.session().id;

        artifacts::insert_flexibility(ctx.conn(), session_id, &index).await?;

        ctx.artifacts_mut().flexibility = Some(index);
        Ok(())
    }
}

/// Raw value of a scored scale
fn scale_value(
    scale: &str,
    raw: &RawModeScores,
    metrics: &CombinationMetrics,
) -> Result<i32, ConfigError> {
    match scale {
        scales::CE => Ok(raw.ce),
        scales::RO => Ok(raw.ro),
        scales::AC => Ok(raw.ac),
        scales::AE => Ok(raw.ae),
        scales::ACCE => Ok(metrics.ac_ce),
        scales::AERO => Ok(metrics.ae_ro),
        other => Err(ConfigError::InvalidInstrument {
            instrument: "percentiles".to_string(),
            reason: format!("scale '{}' has no raw score source", other),
        }),
    }
}

pub struct PercentilesStage;

#[async_trait]
impl Stage for PercentilesStage {
    fn key(&self) -> &str {
        PERCENTILES
    }

    fn requires(&self) -> &[&'static str] {
        &[RAW_SCORES, COMBINATION]
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        let raw = required(ctx.artifacts().raw_scores, PERCENTILES, RAW_SCORES)?;
        let metrics = required(ctx.artifacts().combination, PERCENTILES, COMBINATION)?;
        let definition = ctx.definition();

        let mut requests = Vec::with_capacity(definition.scales.len());
        for scale in &definition.scales {
            requests.push((scale.clone(), scale_value(scale, &raw, &metrics)?));
        }

        let results = ctx.resolve_norms(&requests).await?;

        let percentiles: Vec<ScalePercentile> = requests
            .into_iter()
            .zip(results)
            .map(|((scale, raw_score), result)| ScalePercentile {
                scale,
                raw_score,
                percentile: result.percentile,
                provenance: result.provenance,
                truncated: result.truncated,
            })
            .collect();

        let session_id = ctx.session().id;
        artifacts::insert_percentiles(ctx.conn(), session_id, &percentiles).await?;

        ctx.artifacts_mut().percentiles = percentiles;
        Ok(())
    }
}

pub struct DeltaStage;

#[async_trait]
impl Stage for DeltaStage {
    fn key(&self) -> &str {
        DELTA
    }

    fn requires(&self) -> &[&'static str] {
        &[COMBINATION, STYLE, FLEXIBILITY]
    }

    async fn run(&self, ctx: &mut StageContext) -> ScoringResult<()> {
        let metrics = required(ctx.artifacts().combination, DELTA, COMBINATION)?;
        let style = required(ctx.artifacts().style.clone(), DELTA, STYLE)?;
        let flexibility = required(ctx.artifacts().flexibility.clone(), DELTA, FLEXIBILITY)?;
        let session = ctx.session().clone();

        let delta = LongitudinalDeltaCalculator::calculate(
            ctx.conn(),
            &session,
            &metrics,
            &style,
            &flexibility,
        )
        .await?;

        if let Some(delta) = &delta {
            artifacts::insert_delta(ctx.conn(), session.id, delta).await?;
            debug!(session_id = %session.id, prior = %delta.prior_session_id, "Delta recorded");
        }

        ctx.artifacts_mut().delta = delta;
        Ok(())
    }
}
