//! # Merge Module
//!
//! Decides whether a detected item duplicates an existing catalogued item
//! and, if so, how image references and metadata combine.
//!
//! Resolution order per candidate: exact signature match, then (when an
//! embedding is available) semantic similarity, then create.

pub mod similarity;

pub use similarity::cosine_similarity;

use crate::core::catalog::{CatalogItem, ItemPatch, ItemRepository};
use crate::core::classifier::{ClassifierGateway, DetectedCandidate};
use crate::core::fingerprint::{Fingerprinter, Region, Signature};
use crate::core::store::ImageStore;
use crate::error::{MergeError, RepositoryError, Result};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Tuning for the semantic duplicate check.
#[derive(Debug, Clone, Copy)]
pub struct MergeConfig {
    /// Cosine similarity above which two embeddings count as the same item
    pub similarity_threshold: f32,
    /// How many embedded items to scan per owner
    pub embedding_scan_limit: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            embedding_scan_limit: 50,
        }
    }
}

/// One item pending merge-or-create resolution
#[derive(Debug, Clone, PartialEq)]
pub struct IngestCandidate {
    pub image_url: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub region: Option<Region>,
    /// Semantic embedding, when an enrichment step has produced one
    pub embedding: Option<Vec<f32>>,
}

impl IngestCandidate {
    /// A bare candidate covering the whole image
    pub fn whole_image(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            description: None,
            category: None,
            region: None,
            embedding: None,
        }
    }

    /// Pair a detected region with the source image it came from
    pub fn from_detected(image_url: impl Into<String>, detected: DetectedCandidate) -> Self {
        Self {
            image_url: image_url.into(),
            description: Some(detected.description),
            category: Some(detected.category),
            region: Some(detected.region),
            embedding: None,
        }
    }

    fn hint(&self) -> Option<&str> {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .or(self.category.as_deref().filter(|c| !c.is_empty()))
    }
}

/// The outcome of resolving one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub item_id: Uuid,
    pub merged: bool,
}

/// Duplicate-or-new decision engine.
///
/// Holds no cross-candidate mutable state; the repository is the only
/// shared resource and owns its own concurrency discipline.
pub struct MergeEngine {
    store: Arc<dyn ImageStore>,
    classifier: Arc<ClassifierGateway>,
    repository: Arc<dyn ItemRepository>,
    fingerprinter: Fingerprinter,
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn ImageStore>,
        classifier: Arc<ClassifierGateway>,
        repository: Arc<dyn ItemRepository>,
        fingerprinter: Fingerprinter,
        config: MergeConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            repository,
            fingerprinter,
            config,
        }
    }

    /// Resolve one candidate into a merged or newly created item.
    pub fn resolve(&self, owner_id: &str, candidate: &IngestCandidate) -> Result<Resolution> {
        let bytes = self.store.fetch(&candidate.image_url)?;
        let signature = self
            .fingerprinter
            .fingerprint(&bytes, candidate.region.as_ref())?;

        if let Some(existing) = self.repository.find_by_signature(owner_id, &signature)? {
            debug!(
                owner_id,
                item_id = %existing.id,
                "exact signature match, merging"
            );
            return self.merge_into(owner_id, &existing, candidate);
        }

        if let Some(embedding) = candidate.embedding.as_deref() {
            if let Some(similar) = self.best_semantic_match(owner_id, embedding)? {
                debug!(
                    owner_id,
                    item_id = %similar.id,
                    "semantic match above threshold, merging"
                );
                return self.merge_into(owner_id, &similar, candidate);
            }
        }

        self.create(owner_id, candidate, signature)
    }

    /// Fold the candidate's image and freshly analyzed metadata into an
    /// existing item.
    ///
    /// The patch carries deltas, not a snapshot: the analyze call is slow
    /// enough that another worker may merge into the same item first, and
    /// the repository folds deltas into whatever it reads at write time.
    fn merge_into(
        &self,
        owner_id: &str,
        existing: &CatalogItem,
        candidate: &IngestCandidate,
    ) -> Result<Resolution> {
        let analyzed = self
            .classifier
            .analyze_item(&candidate.image_url, candidate.hint())?;

        let patch = ItemPatch {
            add_variant: Some(candidate.image_url.clone()),
            merge_metadata: Some(analyzed),
            ..Default::default()
        };

        match self.repository.update(existing.id, patch) {
            Ok(_) => Ok(Resolution {
                item_id: existing.id,
                merged: true,
            }),
            // The item vanished between lookup and write
            Err(RepositoryError::NotFound { .. }) => Err(MergeError::Conflict {
                owner_id: owner_id.to_string(),
                item_id: existing.id,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Analyze and persist a brand-new item.
    fn create(
        &self,
        owner_id: &str,
        candidate: &IngestCandidate,
        signature: Signature,
    ) -> Result<Resolution> {
        let metadata = self
            .classifier
            .analyze_item(&candidate.image_url, candidate.hint())?;

        let mut item = CatalogItem::new(owner_id, &candidate.image_url, signature.clone(), metadata);
        item.embedding = candidate.embedding.clone();

        match self.repository.insert(item) {
            Ok(created) => Ok(Resolution {
                item_id: created.id,
                merged: false,
            }),
            // Lost the create race: another resolution persisted this
            // signature first. Merge into the winner instead.
            Err(RepositoryError::Conflict { .. }) => {
                match self.repository.find_by_signature(owner_id, &signature)? {
                    Some(winner) => self.merge_into(owner_id, &winner, candidate),
                    None => Err(RepositoryError::Conflict {
                        owner_id: owner_id.to_string(),
                    }
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best stored item by cosine similarity, if any clears the threshold.
    fn best_semantic_match(
        &self,
        owner_id: &str,
        embedding: &[f32],
    ) -> Result<Option<CatalogItem>> {
        let candidates = self
            .repository
            .find_candidates_with_embedding(owner_id, self.config.embedding_scan_limit)?;

        let best = candidates
            .into_iter()
            .filter_map(|item| {
                let stored = item.embedding.as_deref()?;
                let score = cosine_similarity(embedding, stored);
                Some((score, item))
            })
            .max_by(|(a, _), (b, _)| a.total_cmp(b));

        match best {
            Some((score, item)) if score > self.config.similarity_threshold => Ok(Some(item)),
            _ => Ok(None),
        }
    }
}
