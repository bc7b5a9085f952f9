//! # Image Store Module
//!
//! Fetching source image bytes by URL.

use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Capability for retrieving uploaded image bytes
pub trait ImageStore: Send + Sync {
    /// Fetch the raw bytes behind `url`
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError>;
}

/// HTTP-backed image store
pub struct HttpImageStore {
    client: reqwest::blocking::Client,
}

impl HttpImageStore {
    /// Create a store with a default 30s request timeout
    pub fn new() -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::FetchFailed {
                url: String::new(),
                reason: format!("client construction: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl ImageStore for HttpImageStore {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::InvalidUrl);
        }

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| StoreError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::FetchFailed {
                url: url.to_string(),
                reason: format!("status {status}"),
            });
        }

        let bytes = response.bytes().map_err(|e| StoreError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

/// In-memory image store for tests: a URL-to-bytes map.
pub struct InMemoryImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryImageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Register bytes under a URL
    pub fn put(&self, url: impl Into<String>, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut images = self.images.write().map_err(|_| StoreError::FetchFailed {
            url: String::new(),
            reason: "lock poisoned".to_string(),
        })?;
        images.insert(url.into(), bytes);
        Ok(())
    }
}

impl Default for InMemoryImageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStore for InMemoryImageStore {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::InvalidUrl);
        }

        let images = self.images.read().map_err(|_| StoreError::FetchFailed {
            url: url.to_string(),
            reason: "lock poisoned".to_string(),
        })?;

        images
            .get(url)
            .cloned()
            .ok_or_else(|| StoreError::FetchFailed {
                url: url.to_string(),
                reason: "not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = InMemoryImageStore::new();
        store.put("https://img/a.jpg", vec![1, 2, 3]).unwrap();

        assert_eq!(store.fetch("https://img/a.jpg").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn missing_url_fails() {
        let store = InMemoryImageStore::new();
        let err = store.fetch("https://img/missing.jpg").unwrap_err();
        assert!(matches!(err, StoreError::FetchFailed { .. }));
    }

    #[test]
    fn empty_url_is_invalid() {
        let store = InMemoryImageStore::new();
        assert!(matches!(store.fetch("  ").unwrap_err(), StoreError::InvalidUrl));
    }

    #[test]
    fn poisoned_lock_surfaces_as_error_instead_of_dropping_writes() {
        let store = std::sync::Arc::new(InMemoryImageStore::new());

        let poisoner = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.images.write().unwrap();
            panic!("poison the store lock");
        })
        .join();

        let err = store.put("https://img/a.jpg", vec![1]).unwrap_err();
        assert!(matches!(err, StoreError::FetchFailed { .. }));
        assert!(matches!(
            store.fetch("https://img/a.jpg").unwrap_err(),
            StoreError::FetchFailed { .. }
        ));
    }
}
