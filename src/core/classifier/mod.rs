//! # Classifier Module
//!
//! Resilient wrapper around the external vision classification service.
//!
//! ## Modules
//! - `gateway` - Retry/backoff, response parsing, candidate filtering, and
//!   error classification
//! - `gemini` - HTTP transport for a Gemini-style generative vision API

pub mod gateway;
pub mod gemini;

pub use gateway::{ClassifierGateway, RetryPolicy};
pub use gemini::GeminiBackend;

use crate::core::fingerprint::Region;
use serde::{Deserialize, Serialize};

/// A single detected clothing region, pending merge-or-create resolution.
///
/// Ephemeral: produced per ingestion call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedCandidate {
    pub description: String,
    pub category: String,
    /// Bounding region in percent of the source image's dimensions
    pub region: Region,
    /// Detection confidence in `[0, 1]`
    pub confidence: f64,
}

/// Transport-level failure, before classification into the error taxonomy.
///
/// Carries whatever the wire gave us: an HTTP status when one exists, and
/// the raw diagnostic text.
#[derive(Debug, Clone)]
pub struct BackendError {
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    /// A failure with no HTTP status (connection errors, timeouts)
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// Raw transport to the vision service.
///
/// Implementations return the model's raw response text; the gateway owns
/// parsing, filtering, retry, and error classification.
pub trait VisionBackend: Send + Sync {
    /// Ask the service to detect clothing items in the image
    fn detect(&self, image_url: &str) -> Result<String, BackendError>;

    /// Ask the service to analyze a single item's metadata
    fn analyze(&self, image_url: &str, hint: Option<&str>) -> Result<String, BackendError>;
}
