//! Ingestion pipeline implementation.

use crate::core::catalog::ItemRepository;
use crate::core::classifier::ClassifierGateway;
use crate::core::fingerprint::{FingerprintConfig, Fingerprinter};
use crate::core::merge::{IngestCandidate, MergeConfig, MergeEngine};
use crate::core::store::ImageStore;
use crate::error::{CatalogError, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of resolving one candidate. Failures carry no item id and the
/// error text for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub image_url: String,
    pub item_id: Option<Uuid>,
    pub merged: bool,
    pub error: Option<String>,
}

impl IngestOutcome {
    /// Whether this candidate was catalogued (created or merged)
    pub fn succeeded(&self) -> bool {
        self.item_id.is_some()
    }
}

/// Configuration for the pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Upper bound on concurrently resolving candidates. Kept small so a
    /// batch cannot outrun the classifier's rate limiter.
    pub concurrency: usize,
    pub fingerprint: FingerprintConfig,
    pub merge: MergeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fingerprint: FingerprintConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

/// Builder for the ingestion pipeline
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn ImageStore>>,
    classifier: Option<Arc<ClassifierGateway>>,
    repository: Option<Arc<dyn ItemRepository>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            store: None,
            classifier: None,
            repository: None,
        }
    }

    /// Set the image store
    pub fn store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the classifier gateway
    pub fn classifier(mut self, classifier: Arc<ClassifierGateway>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the item repository
    pub fn repository(mut self, repository: Arc<dyn ItemRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Override the pipeline configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<IngestionPipeline> {
        let store = self
            .store
            .ok_or_else(|| CatalogError::Config("pipeline requires an image store".to_string()))?;
        let classifier = self.classifier.ok_or_else(|| {
            CatalogError::Config("pipeline requires a classifier gateway".to_string())
        })?;
        let repository = self
            .repository
            .ok_or_else(|| CatalogError::Config("pipeline requires a repository".to_string()))?;

        if self.config.concurrency == 0 {
            return Err(CatalogError::Config(
                "pipeline concurrency must be at least 1".to_string(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .build()
            .map_err(|e| CatalogError::Config(format!("thread pool: {e}")))?;

        let engine = MergeEngine::new(
            store,
            Arc::clone(&classifier),
            repository,
            Fingerprinter::new(self.config.fingerprint),
            self.config.merge,
        );

        Ok(IngestionPipeline {
            engine,
            classifier,
            pool,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The ingestion pipeline
pub struct IngestionPipeline {
    engine: MergeEngine,
    classifier: Arc<ClassifierGateway>,
    pool: rayon::ThreadPool,
}

impl IngestionPipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Resolve a batch of candidates for one owner.
    ///
    /// Candidates are processed independently and concurrently; the returned
    /// outcomes preserve input order. A failing candidate becomes a failure
    /// outcome, never a batch abort.
    pub fn process(&self, owner_id: &str, candidates: &[IngestCandidate]) -> Vec<IngestOutcome> {
        let outcomes: Vec<IngestOutcome> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| match self.engine.resolve(owner_id, candidate) {
                    Ok(resolution) => IngestOutcome {
                        image_url: candidate.image_url.clone(),
                        item_id: Some(resolution.item_id),
                        merged: resolution.merged,
                        error: None,
                    },
                    Err(error) => {
                        warn!(
                            owner_id,
                            description = candidate.description.as_deref().unwrap_or("<none>"),
                            %error,
                            "candidate resolution failed"
                        );
                        IngestOutcome {
                            image_url: candidate.image_url.clone(),
                            item_id: None,
                            merged: false,
                            error: Some(error.to_string()),
                        }
                    }
                })
                .collect()
        });

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        info!(
            owner_id,
            total = outcomes.len(),
            merged = outcomes.iter().filter(|o| o.merged).count(),
            failed,
            "batch resolved"
        );

        outcomes
    }

    /// Ingest one uploaded photo: detect clothing items, then resolve each
    /// detected region as a candidate of the same batch.
    ///
    /// A photo where detection finds nothing usable falls back to a single
    /// whole-image candidate. Detection failure fails the call; no per-item
    /// outcomes exist at that point.
    pub fn ingest_image(&self, owner_id: &str, image_url: &str) -> Result<Vec<IngestOutcome>> {
        let detected = self.classifier.detect_items(image_url)?;

        let candidates: Vec<IngestCandidate> = if detected.is_empty() {
            vec![IngestCandidate::whole_image(image_url)]
        } else {
            detected
                .into_iter()
                .map(|d| IngestCandidate::from_detected(image_url, d))
                .collect()
        };

        Ok(self.process(owner_id, &candidates))
    }
}
