//! # Wardrobe Catalog
//!
//! Duplicate-aware cataloguing of clothing items from user photos.
//!
//! ## Core Philosophy
//! - **Never duplicate** - The same garment re-uploaded merges into the
//!   existing item instead of creating a second one
//! - **Never lose data** - Merging unions metadata and keeps every image
//!   variant; nothing the user already has is discarded
//! - **Degrade gracefully** - Classifier hiccups fail a single candidate,
//!   never a whole ingestion batch
//!
//! ## Architecture
//! The library is split into a core engine (interface-agnostic) and
//! presentation layers:
//! - `core` - Fingerprinting, classification, merge resolution, pipeline
//! - `error` - Application error taxonomy

pub mod core;
pub mod error;

// Re-export commonly used types at the crate root
pub use error::{CatalogError, Result};

/// Initialize tracing for the library
///
/// This should be called by the application entry point.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default tracing subscriber");
}
