//! # Catalog Module
//!
//! Owned wardrobe items, their metadata, and the repository boundary.
//!
//! ## Modules
//! - `traits` - Repository trait definition
//! - `memory` - In-memory backend for tests
//! - `sqlite` - Persistent SQLite backend

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::ItemRepository;

use crate::core::fingerprint::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured metadata describing a catalogued item.
///
/// Scalar fields may be empty when the classifier could not determine them;
/// merging treats empty as "no opinion".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sub_category: String,
    #[serde(default)]
    pub primary_color: String,
    #[serde(default)]
    pub secondary_colors: Vec<String>,
    #[serde(default)]
    pub vibe_tags: Vec<String>,
    #[serde(default)]
    pub estimated_season: String,
}

impl ItemMetadata {
    /// Combine this metadata with a newer analysis.
    ///
    /// Scalars keep the newer value only when it is non-empty; set-valued
    /// fields are unioned, preserving existing order, with duplicates
    /// removed.
    pub fn merged_with(&self, newer: &ItemMetadata) -> ItemMetadata {
        ItemMetadata {
            category: non_empty_or(&newer.category, &self.category),
            sub_category: non_empty_or(&newer.sub_category, &self.sub_category),
            primary_color: non_empty_or(&newer.primary_color, &self.primary_color),
            secondary_colors: union_dedup(&self.secondary_colors, &newer.secondary_colors),
            vibe_tags: union_dedup(&self.vibe_tags, &newer.vibe_tags),
            estimated_season: non_empty_or(&newer.estimated_season, &self.estimated_season),
        }
    }
}

fn non_empty_or(newer: &str, existing: &str) -> String {
    if newer.trim().is_empty() {
        existing.to_string()
    } else {
        newer.to_string()
    }
}

fn union_dedup(existing: &[String], newer: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(existing.len() + newer.len());
    for value in existing.iter().chain(newer.iter()) {
        if !result.contains(value) {
            result.push(value.clone());
        }
    }
    result
}

/// The image references attached to an item: one primary plus any number of
/// variant shots merged in later.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageRefs {
    pub primary: String,
    pub variants: Vec<String>,
}

impl ImageRefs {
    /// Create a reference set with only a primary image
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            variants: Vec::new(),
        }
    }

    /// Append a variant URL. No-op (returns false) when the URL is empty,
    /// equals the primary, or is already a variant.
    pub fn add_variant(&mut self, url: &str) -> bool {
        if url.is_empty() || url == self.primary || self.variants.iter().any(|v| v == url) {
            return false;
        }
        self.variants.push(url.to_string());
        true
    }
}

/// A catalogued wardrobe item owned by exactly one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub owner_id: String,
    pub images: ImageRefs,
    pub signature: Signature,
    /// Semantic embedding, populated by an external enrichment step.
    pub embedding: Option<Vec<f32>>,
    pub metadata: ItemMetadata,
    pub price_cents: Option<i64>,
    /// Wear count the item starts with, for pieces owned before cataloguing.
    pub initial_wears: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Create a new item for `owner_id` around a freshly analyzed image
    pub fn new(
        owner_id: impl Into<String>,
        primary_url: impl Into<String>,
        signature: Signature,
        metadata: ItemMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            images: ImageRefs::new(primary_url),
            signature,
            embedding: None,
            metadata,
            price_cents: None,
            initial_wears: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single wear of an item.
///
/// Created by the external wear-logging flow; this core only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WearEvent {
    pub id: Uuid,
    pub item_id: Uuid,
    pub owner_id: String,
    pub worn_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Partial update applied to an existing item. `None` fields are untouched;
/// the repository stamps `updated_at` on every successful update.
///
/// `add_variant` and `merge_metadata` are deltas, not replacements: the
/// backend applies them to the row as it reads it inside the update, so two
/// concurrent merges into the same item cannot overwrite each other's
/// contribution with a stale snapshot. Replacement fields apply first,
/// deltas second.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub images: Option<ImageRefs>,
    /// Append one variant URL, deduplicated against primary and variants
    pub add_variant: Option<String>,
    pub metadata: Option<ItemMetadata>,
    /// Combine into the stored metadata per [`ItemMetadata::merged_with`]
    pub merge_metadata: Option<ItemMetadata>,
    pub embedding: Option<Vec<f32>>,
    pub price_cents: Option<i64>,
}
