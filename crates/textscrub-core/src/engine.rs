//! Detection engine: pipeline orchestration over the three layers
//!
//! One call moves through LayersRunning (parallel dispatch), Filtering
//! (exclusions), Aggregating, Done. Any layer may drop to Unavailable
//! without aborting the pipeline; only a pattern battery that fails to
//! compile at startup is fatal.

use crate::aggregate::Aggregator;
use crate::config::Config;
use crate::entity::{DetectionResult, Entity, Layer};
use crate::error::EngineError;
use crate::exclusion::ExclusionFilter;
use crate::external::{probe_available_mib, ExternalLayer, ExternalOutcome, ResolvedMode};
use crate::model::ContextModelLayer;
use crate::pattern::PatternLayer;
use crate::redact::{redact, RedactionOptions, RedactionReport};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info};

pub struct DetectionEngine {
    pattern: PatternLayer,
    model: ContextModelLayer,
    shared: RwLock<SharedState>,
}

/// State swapped atomically by `update_config`. A call snapshots all of
/// it up front, so an in-flight call never sees a half-applied update.
struct SharedState {
    config: Arc<Config>,
    external: Arc<ExternalLayer>,
    exclusions: Arc<ExclusionFilter>,
}

impl DetectionEngine {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        Self::with_available_memory(config, probe_available_mib())
    }

    /// Startup with an explicit memory probe result. The probe happens
    /// once; mode selection is not revisited per call.
    pub fn with_available_memory(
        config: Config,
        available_mib: u64,
    ) -> Result<Self, EngineError> {
        let pattern = PatternLayer::new()?;
        let model = ContextModelLayer::new(config.detection.model_weights_path.clone());
        let external = Arc::new(ExternalLayer::new(&config.external, available_mib));
        let exclusions = Arc::new(ExclusionFilter::load(&config.exclusions));

        info!(
            "detection engine ready ({} exclusion terms, external mode {:?})",
            exclusions.len(),
            external.mode()
        );

        Ok(Self {
            pattern,
            model,
            shared: RwLock::new(SharedState {
                config: Arc::new(config),
                external,
                exclusions,
            }),
        })
    }

    fn snapshot(&self) -> (Arc<Config>, Arc<ExternalLayer>, Arc<ExclusionFilter>) {
        let shared = self.shared.read().expect("engine state lock poisoned");
        (
            shared.config.clone(),
            shared.external.clone(),
            shared.exclusions.clone(),
        )
    }

    pub fn config_snapshot(&self) -> Arc<Config> {
        self.shared
            .read()
            .expect("engine state lock poisoned")
            .config
            .clone()
    }

    pub fn external_mode(&self) -> ResolvedMode {
        self.shared
            .read()
            .expect("engine state lock poisoned")
            .external
            .mode()
    }

    /// Apply new settings for subsequent calls. In-progress calls finish
    /// on the snapshot they started with. The context model is fixed for
    /// the process lifetime and is not rebuilt here.
    pub fn update_config(&self, config: Config) {
        let external = Arc::new(ExternalLayer::new(&config.external, probe_available_mib()));
        let exclusions = Arc::new(ExclusionFilter::load(&config.exclusions));
        let mut shared = self.shared.write().expect("engine state lock poisoned");
        *shared = SharedState {
            config: Arc::new(config),
            external,
            exclusions,
        };
        info!("engine configuration updated for subsequent calls");
    }

    /// Run all enabled layers over the text and merge their results.
    pub async fn detect(&self, text: &str) -> Result<DetectionResult, EngineError> {
        let (config, external, exclusions) = self.snapshot();
        let det = &config.detection;
        let started = Instant::now();

        let want_pattern = det.enabled_layers.contains(&Layer::Pattern);
        let want_external = det.enabled_layers.contains(&Layer::External)
            && external.mode() != ResolvedMode::Disabled;
        let want_model = det.enabled_layers.contains(&Layer::ContextModel);

        // Parallel dispatch: the external call proceeds while the
        // in-process layers run.
        let (external_outcome, (pattern_entities, model_outcome)) = tokio::join!(
            async {
                if want_external {
                    Some(external.detect(text, det.external_min_score).await)
                } else {
                    None
                }
            },
            async {
                let p = if want_pattern {
                    Some(self.pattern.detect(text, det.pattern_min_confidence))
                } else {
                    None
                };
                let m = if want_model {
                    Some(self.model.detect(text, det.model_min_score))
                } else {
                    None
                };
                (p, m)
            }
        );

        let mut layers_used = BTreeSet::new();
        let mut fallback_used = false;
        let mut lost_layer = None;

        let mut raw: Vec<Entity> = Vec::new();
        if let Some(entities) = pattern_entities {
            raw = entities;
            layers_used.insert(Layer::Pattern);
        }

        match model_outcome {
            Some(Some(entities)) => {
                raw.extend(entities);
                layers_used.insert(Layer::ContextModel);
            }
            Some(None) => {
                fallback_used = true;
                lost_layer = Some(Layer::ContextModel);
            }
            None => {}
        }

        match external_outcome {
            Some(ExternalOutcome::Entities(entities)) => {
                raw.extend(entities);
                layers_used.insert(Layer::External);
            }
            Some(ExternalOutcome::Unavailable) => {
                fallback_used = true;
                lost_layer = Some(Layer::External);
            }
            None => {}
        }

        if fallback_used && !det.fallback_enabled {
            let layer = lost_layer.unwrap_or(Layer::External);
            return Err(EngineError::LayerUnavailable(layer));
        }

        // Exclusions run before deduplication so an excluded claim can
        // never boost or outvote a real one.
        let filtered = exclusions.filter(raw);
        let entities = Aggregator::new(det.overlap_fraction, det.cross_validation_boost)
            .aggregate(filtered);

        debug!(
            "detect: {} entities via {:?} in {:?}",
            entities.len(),
            layers_used,
            started.elapsed()
        );

        Ok(DetectionResult {
            entities,
            layers_used,
            fallback_used,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Detect and redact in one step. The returned entities carry the
    /// replacement each one received.
    pub async fn scrub(
        &self,
        text: &str,
        options: &RedactionOptions,
    ) -> Result<(String, RedactionReport, DetectionResult), EngineError> {
        let mut result = self.detect(text).await?;
        let (clean, report) = redact(text, &result.entities, options);
        for (entity, replacement) in result.entities.iter_mut().zip(&report.replacements) {
            entity.replacement = Some(replacement.replacement.clone());
        }
        Ok((clean, report, result))
    }

    /// Liveness probe against the external analyzer.
    pub async fn external_healthy(&self) -> bool {
        let (_, external, _) = self.snapshot();
        external.health_check().await
    }
}
