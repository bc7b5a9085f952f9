//! # Core Module
//!
//! The interface-agnostic wardrobe cataloguing engine.
//!
//! ## Modules
//! - `fingerprint` - Computes perceptual signatures of image regions
//! - `store` - Fetches source image bytes by URL
//! - `classifier` - Resilient gateway to the external vision service
//! - `catalog` - Item model and repository backends
//! - `merge` - Duplicate-or-new resolution and metadata merging
//! - `pipeline` - Orchestrates per-image ingestion

pub mod catalog;
pub mod classifier;
pub mod fingerprint;
pub mod merge;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use catalog::{CatalogItem, ItemMetadata, ItemRepository};
pub use classifier::{ClassifierGateway, DetectedCandidate};
pub use fingerprint::{Fingerprinter, Region, Signature};
pub use merge::{IngestCandidate, MergeEngine, Resolution};
pub use pipeline::{IngestOutcome, IngestionPipeline};
