//! # Error Module
//!
//! Error taxonomy for the wardrobe catalog core.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Keep the original diagnostic** - classified errors retain the
//!   underlying message text for debugging
//! - **One candidate, one failure** - per-candidate errors never abort a
//!   whole ingestion batch (see the pipeline module)

use thiserror::Error;
use uuid::Uuid;

/// Top-level application error
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Image store error: {0}")]
    Store(#[from] StoreError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors from fingerprinting and signature comparison
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Failed to decode image: {reason}")]
    Decode { reason: String },

    #[error("Image has zero width or height")]
    EmptyImage,

    #[error("Signature length mismatch: {left} bits vs {right} bits")]
    LengthMismatch { left: u32, right: u32 },

    #[error("Invalid signature encoding: {0}")]
    InvalidEncoding(String),

    #[error("Downsample failed: {0}")]
    ResizeFailed(String),
}

/// Errors fetching source image bytes
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Image reference is empty")]
    InvalidUrl,

    #[error("Failed to fetch image {url}: {reason}")]
    FetchFailed { url: String, reason: String },
}

/// Errors from the external vision classifier, after classification.
///
/// `RateLimited` is the only retryable kind; everything else is surfaced
/// immediately with the underlying diagnostic text intact.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Invalid classifier input: {0}")]
    InvalidInput(String),

    #[error("Classifier authentication failed: {0}")]
    Auth(String),

    #[error("Classifier rate limited: {0}")]
    RateLimited(String),

    #[error("Classifier rate limit persisted after {attempts} attempts: {last_error}")]
    RateLimitExceeded { attempts: u32, last_error: String },

    #[error("Failed to parse classifier response ({reason}): {snippet}")]
    ResponseParse { reason: String, snippet: String },

    #[error("Classifier request failed: {0}")]
    Transient(String),
}

/// Errors during merge resolution
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Item {item_id} for owner {owner_id} vanished during merge")]
    Conflict { owner_id: String, item_id: Uuid },
}

/// Errors from the catalog repository
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Failed to open catalog database at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Item not found: {id}")]
    NotFound { id: Uuid },

    #[error("An item with this signature already exists for owner {owner_id}")]
    Conflict { owner_id: String },

    #[error("Failed to serialize item data: {0}")]
    SerializationFailed(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, CatalogError>;
