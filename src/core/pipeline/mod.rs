//! # Pipeline Module
//!
//! Orchestrates per-image ingestion: detection, then merge-or-create
//! resolution per candidate, with per-candidate failure isolation.

mod executor;

pub use executor::{IngestOutcome, IngestionPipeline, PipelineBuilder, PipelineConfig};
