//! Repository trait definition.

use super::{CatalogItem, ItemPatch, WearEvent};
use crate::core::fingerprint::Signature;
use crate::error::RepositoryError;
use uuid::Uuid;

/// Storage boundary for catalogued items.
///
/// Backends own their concurrency discipline; the merge engine performs a
/// lookup-then-write sequence and relies on [`ItemRepository::insert`] being
/// atomic per `(owner_id, signature)` to avoid duplicate items racing in.
pub trait ItemRepository: Send + Sync {
    /// Find the item owned by `owner_id` with exactly this signature
    fn find_by_signature(
        &self,
        owner_id: &str,
        signature: &Signature,
    ) -> Result<Option<CatalogItem>, RepositoryError>;

    /// Up to `limit` items owned by `owner_id` that carry a semantic
    /// embedding, for the similarity-based duplicate check.
    fn find_candidates_with_embedding(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, RepositoryError>;

    /// Look an item up by id
    fn find_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, RepositoryError>;

    /// Insert a new item.
    ///
    /// Fails with [`RepositoryError::Conflict`] when the owner already has
    /// an item with the same signature.
    fn insert(&self, item: CatalogItem) -> Result<CatalogItem, RepositoryError>;

    /// Apply a partial update, stamping `updated_at`.
    ///
    /// Delta fields of the patch are applied to the row as the backend
    /// reads it, inside the backend's own lock or transaction, so
    /// concurrent updates to one item compose instead of overwriting.
    /// Fails with [`RepositoryError::NotFound`] when `id` does not exist.
    fn update(&self, id: Uuid, patch: ItemPatch) -> Result<CatalogItem, RepositoryError>;

    /// Wear events recorded against an item, newest first. Read-only here;
    /// the wear-logging flow writes them.
    fn wear_events(&self, item_id: Uuid) -> Result<Vec<WearEvent>, RepositoryError>;
}
