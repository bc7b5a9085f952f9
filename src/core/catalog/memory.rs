//! In-memory repository backend for testing.

use super::{CatalogItem, ItemPatch, ItemRepository, WearEvent};
use crate::core::fingerprint::Signature;
use crate::error::RepositoryError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory repository backend
///
/// Useful for tests and scenarios where persistence isn't needed. Enforces
/// the same `(owner_id, signature)` uniqueness as the SQLite backend.
pub struct InMemoryRepository {
    items: RwLock<HashMap<Uuid, CatalogItem>>,
    wears: RwLock<Vec<WearEvent>>,
}

impl InMemoryRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            wears: RwLock::new(Vec::new()),
        }
    }

    /// Seed a wear event, standing in for the external wear-logging flow
    pub fn record_wear(&self, event: WearEvent) -> Result<(), RepositoryError> {
        let mut wears = self
            .wears
            .write()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;
        wears.push(event);
        Ok(())
    }

    /// Number of items currently stored
    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    /// Whether the repository holds no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemRepository for InMemoryRepository {
    fn find_by_signature(
        &self,
        owner_id: &str,
        signature: &Signature,
    ) -> Result<Option<CatalogItem>, RepositoryError> {
        let items = self
            .items
            .read()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;

        Ok(items
            .values()
            .find(|item| item.owner_id == owner_id && &item.signature == signature)
            .cloned())
    }

    fn find_candidates_with_embedding(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, RepositoryError> {
        let items = self
            .items
            .read()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;

        // Newest first, matching the SQLite backend's scan order
        let mut candidates: Vec<CatalogItem> = items
            .values()
            .filter(|item| item.owner_id == owner_id && item.embedding.is_some())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        candidates.truncate(limit);
        Ok(candidates)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, RepositoryError> {
        let items = self
            .items
            .read()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;

        Ok(items.get(&id).cloned())
    }

    fn insert(&self, item: CatalogItem) -> Result<CatalogItem, RepositoryError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;

        let duplicate = items
            .values()
            .any(|existing| existing.owner_id == item.owner_id && existing.signature == item.signature);
        if duplicate {
            return Err(RepositoryError::Conflict {
                owner_id: item.owner_id.clone(),
            });
        }

        items.insert(item.id, item.clone());
        Ok(item)
    }

    fn update(&self, id: Uuid, patch: ItemPatch) -> Result<CatalogItem, RepositoryError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;

        let item = items.get_mut(&id).ok_or(RepositoryError::NotFound { id })?;

        if let Some(images) = patch.images {
            item.images = images;
        }
        if let Some(metadata) = patch.metadata {
            item.metadata = metadata;
        }
        // Deltas apply against the current row, under this write lock
        if let Some(url) = patch.add_variant {
            item.images.add_variant(&url);
        }
        if let Some(newer) = patch.merge_metadata {
            item.metadata = item.metadata.merged_with(&newer);
        }
        if let Some(embedding) = patch.embedding {
            item.embedding = Some(embedding);
        }
        if let Some(price_cents) = patch.price_cents {
            item.price_cents = Some(price_cents);
        }
        item.updated_at = Utc::now();

        Ok(item.clone())
    }

    fn wear_events(&self, item_id: Uuid) -> Result<Vec<WearEvent>, RepositoryError> {
        let wears = self
            .wears
            .read()
            .map_err(|_| RepositoryError::QueryFailed("lock poisoned".to_string()))?;

        let mut events: Vec<WearEvent> = wears
            .iter()
            .filter(|event| event.item_id == item_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.worn_at.cmp(&a.worn_at));
        Ok(events)
    }
}
