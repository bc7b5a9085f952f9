//! HTTP transport for a Gemini-style generative vision API.
//!
//! Sends a prompt referencing the image URL and returns the model's raw
//! text response. All parsing and resilience lives in the gateway.

use super::{BackendError, VisionBackend};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const API_KEY_VAR: &str = "GEMINI_API_KEY";

const DETECT_PROMPT: &str = "\
Identify every distinct clothing item in the image at the given URL. \
Respond with JSON only, shaped as \
{\"items\":[{\"description\":string,\"category\":string,\
\"bounding_box\":{\"x\":number,\"y\":number,\"width\":number,\"height\":number},\
\"confidence\":number}]}. Bounding box values are percentages of the image \
dimensions; confidence is between 0 and 1.";

const ANALYZE_PROMPT: &str = "\
Describe the clothing item in the image at the given URL. Respond with JSON \
only, shaped as {\"category\":string,\"sub_category\":string,\
\"primary_color\":string,\"secondary_colors\":[string],\
\"vibe_tags\":[string],\"estimated_season\":string}. \
Use empty strings or empty arrays for anything you cannot determine.";

/// Gemini-backed [`VisionBackend`]
pub struct GeminiBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiBackend {
    /// Create a backend reading the API key from `GEMINI_API_KEY`
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var(API_KEY_VAR)
            .map_err(|_| BackendError::message(format!("{API_KEY_VAR} not set")))?;
        Self::new(api_key, DEFAULT_MODEL)
    }

    /// Create a backend with an explicit key and model
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BackendError::message(format!("client construction: {e}")))?;

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Point the backend at a different endpoint (tests, proxies)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn generate(&self, prompt: String) -> Result<String, BackendError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| BackendError::message(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| BackendError::message(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError {
                status: Some(status.as_u16()),
                message: format!("{status}: {text}"),
            });
        }

        extract_text(&text).ok_or_else(|| BackendError {
            status: Some(status.as_u16()),
            message: format!("response missing candidate text: {text}"),
        })
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a generateContent reply
fn extract_text(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

impl VisionBackend for GeminiBackend {
    fn detect(&self, image_url: &str) -> Result<String, BackendError> {
        self.generate(format!("{DETECT_PROMPT}\n\nImage URL: {image_url}"))
    }

    fn analyze(&self, image_url: &str, hint: Option<&str>) -> Result<String, BackendError> {
        let mut prompt = format!("{ANALYZE_PROMPT}\n\nImage URL: {image_url}");
        if let Some(hint) = hint {
            prompt.push_str(&format!("\nHint from detection: {hint}"));
        }
        self.generate(prompt)
    }
}
