//! SQLite repository backend for persistent storage.

use super::{CatalogItem, ImageRefs, ItemMetadata, ItemPatch, ItemRepository, WearEvent};
use crate::core::fingerprint::Signature;
use crate::error::RepositoryError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// SQLite-backed persistent repository
///
/// Uses WAL (Write-Ahead Logging) mode for better concurrent access, and a
/// `UNIQUE(owner_id, signature)` constraint so create-if-absent is atomic
/// per owner and signature.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteRepository {
    /// Open or create a catalog database at the given path
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RepositoryError::OpenFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| RepositoryError::OpenFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                primary_url TEXT NOT NULL,
                variants TEXT NOT NULL,
                signature TEXT NOT NULL,
                embedding BLOB,
                metadata TEXT NOT NULL,
                price_cents INTEGER,
                initial_wears INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(owner_id, signature)
            )",
            [],
        )
        .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id)",
            [],
        )
        .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wear_events (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                worn_at INTEGER NOT NULL,
                note TEXT
            )",
            [],
        )
        .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_wear_item ON wear_events(item_id)",
            [],
        )
        .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RepositoryError> {
        self.conn.lock().map_err(|_| {
            RepositoryError::QueryFailed(format!(
                "connection lock poisoned for {}",
                self.db_path.display()
            ))
        })
    }

    fn write_item(conn: &Connection, item: &CatalogItem) -> Result<(), RepositoryError> {
        let variants = serde_json::to_string(&item.images.variants)
            .map_err(|e| RepositoryError::SerializationFailed(e.to_string()))?;
        let metadata = serde_json::to_string(&item.metadata)
            .map_err(|e| RepositoryError::SerializationFailed(e.to_string()))?;
        let embedding = item.embedding.as_deref().map(embedding_to_blob);

        let result = conn.execute(
            "INSERT INTO items
             (id, owner_id, primary_url, variants, signature, embedding, metadata,
              price_cents, initial_wears, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.to_string(),
                item.owner_id,
                item.images.primary,
                variants,
                item.signature.to_bit_string(),
                embedding,
                metadata,
                item.price_cents,
                item.initial_wears as i64,
                item.created_at.timestamp(),
                item.updated_at.timestamp(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(RepositoryError::Conflict {
                    owner_id: item.owner_id.clone(),
                })
            }
            Err(e) => Err(RepositoryError::QueryFailed(e.to_string())),
        }
    }
}

/// Raw row before type conversion
struct ItemRow {
    id: String,
    owner_id: String,
    primary_url: String,
    variants: String,
    signature: String,
    embedding: Option<Vec<u8>>,
    metadata: String,
    price_cents: Option<i64>,
    initial_wears: i64,
    created_at: i64,
    updated_at: i64,
}

const ITEM_COLUMNS: &str = "id, owner_id, primary_url, variants, signature, embedding, metadata,
     price_cents, initial_wears, created_at, updated_at";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        primary_url: row.get(2)?,
        variants: row.get(3)?,
        signature: row.get(4)?,
        embedding: row.get(5)?,
        metadata: row.get(6)?,
        price_cents: row.get(7)?,
        initial_wears: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl TryFrom<ItemRow> for CatalogItem {
    type Error = RepositoryError;

    fn try_from(row: ItemRow) -> Result<Self, RepositoryError> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| RepositoryError::SerializationFailed(format!("item id: {e}")))?;
        let variants: Vec<String> = serde_json::from_str(&row.variants)
            .map_err(|e| RepositoryError::SerializationFailed(format!("variants: {e}")))?;
        let metadata: ItemMetadata = serde_json::from_str(&row.metadata)
            .map_err(|e| RepositoryError::SerializationFailed(format!("metadata: {e}")))?;
        let signature = Signature::from_bit_string(&row.signature)
            .map_err(|e| RepositoryError::SerializationFailed(format!("signature: {e}")))?;

        Ok(CatalogItem {
            id,
            owner_id: row.owner_id,
            images: ImageRefs {
                primary: row.primary_url,
                variants,
            },
            signature,
            embedding: row.embedding.as_deref().map(blob_to_embedding),
            metadata,
            price_cents: row.price_cents,
            initial_wears: row.initial_wears as u32,
            created_at: from_timestamp(row.created_at),
            updated_at: from_timestamp(row.updated_at),
        })
    }
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Encode an embedding as little-endian f32 bytes
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into an embedding
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl ItemRepository for SqliteRepository {
    fn find_by_signature(
        &self,
        owner_id: &str,
        signature: &Signature,
    ) -> Result<Option<CatalogItem>, RepositoryError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ? AND signature = ?"),
                params![owner_id, signature.to_bit_string()],
                read_row,
            )
            .optional()
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        row.map(CatalogItem::try_from).transpose()
    }

    fn find_candidates_with_embedding(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, RepositoryError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items
                 WHERE owner_id = ? AND embedding IS NOT NULL
                 ORDER BY updated_at DESC LIMIT ?"
            ))
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![owner_id, limit as i64], read_row)
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        let mut items = Vec::new();
        for row in rows {
            let row = row.map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;
            items.push(CatalogItem::try_from(row)?);
        }
        Ok(items)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, RepositoryError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"),
                params![id.to_string()],
                read_row,
            )
            .optional()
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        row.map(CatalogItem::try_from).transpose()
    }

    fn insert(&self, item: CatalogItem) -> Result<CatalogItem, RepositoryError> {
        let conn = self.lock()?;
        Self::write_item(&conn, &item)?;
        Ok(item)
    }

    fn update(&self, id: Uuid, patch: ItemPatch) -> Result<CatalogItem, RepositoryError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"),
                params![id.to_string()],
                read_row,
            )
            .optional()
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        let mut item = match row {
            Some(row) => CatalogItem::try_from(row)?,
            None => return Err(RepositoryError::NotFound { id }),
        };

        if let Some(images) = patch.images {
            item.images = images;
        }
        if let Some(metadata) = patch.metadata {
            item.metadata = metadata;
        }
        // Deltas apply against the row just read; the whole read-modify-write
        // sits under the connection lock
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

        let variants = serde_json::to_string(&item.images.variants)
            .map_err(|e| RepositoryError::SerializationFailed(e.to_string()))?;
        let metadata = serde_json::to_string(&item.metadata)
            .map_err(|e| RepositoryError::SerializationFailed(e.to_string()))?;
        let embedding = item.embedding.as_deref().map(embedding_to_blob);

        let changed = conn
            .execute(
                "UPDATE items SET
                 primary_url = ?, variants = ?, embedding = ?, metadata = ?,
                 price_cents = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    item.images.primary,
                    variants,
                    embedding,
                    metadata,
                    item.price_cents,
                    item.updated_at.timestamp(),
                    id.to_string(),
                ],
            )
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        if changed == 0 {
            return Err(RepositoryError::NotFound { id });
        }
        Ok(item)
    }

    fn wear_events(&self, item_id: Uuid) -> Result<Vec<WearEvent>, RepositoryError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, item_id, owner_id, worn_at, note FROM wear_events
                 WHERE item_id = ? ORDER BY worn_at DESC",
            )
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![item_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            let (id, item_id, owner_id, worn_at, note) =
                row.map_err(|e| RepositoryError::QueryFailed(e.to_string()))?;
            events.push(WearEvent {
                id: Uuid::parse_str(&id)
                    .map_err(|e| RepositoryError::SerializationFailed(format!("wear id: {e}")))?,
                item_id: Uuid::parse_str(&item_id)
                    .map_err(|e| RepositoryError::SerializationFailed(format!("wear item: {e}")))?,
                owner_id,
                worn_at: from_timestamp(worn_at),
                note,
            });
        }
        Ok(events)
    }
}
