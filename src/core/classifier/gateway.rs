//! Classifier gateway: retry, parsing, filtering, error classification.

use super::{BackendError, DetectedCandidate, VisionBackend};
use crate::core::catalog::ItemMetadata;
use crate::core::fingerprint::Region;
use crate::error::ClassifierError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Candidates below or at this confidence are discarded
const CONFIDENCE_FLOOR: f64 = 0.5;

/// How much raw response text to keep in parse-error diagnostics
const SNIPPET_LEN: usize = 200;

/// Retry parameters for rate-limited calls.
///
/// Delay before retry `attempt` (0-based) is `base_delay * 2^attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }
}

/// Closed classification of transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    /// Credential problem: fatal, never retried
    Auth,
    /// Rate limiting or quota exhaustion: retryable
    RateLimited,
    /// Anything else: surfaced immediately without retry
    Transient,
}

/// Classify a transport failure by status code and message indicators.
///
/// All the string heuristics live here, isolated from the calling logic.
fn classify_backend_error(error: &BackendError) -> FailureKind {
    let message = error.message.to_lowercase();

    if matches!(error.status, Some(401) | Some(403))
        || message.contains("api key not valid")
        || message.contains("unauthenticated")
        || message.contains("unauthorized")
        || message.contains("permission denied")
    {
        return FailureKind::Auth;
    }

    if error.status == Some(429)
        || message.contains("rate limit")
        || message.contains("resource_exhausted")
        || message.contains("quota")
        || message.contains("too many requests")
    {
        return FailureKind::RateLimited;
    }

    FailureKind::Transient
}

/// Strip a Markdown code fence the model may have wrapped its JSON in.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, then the closing fence
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn snippet(raw: &str) -> String {
    let mut text: String = raw.chars().take(SNIPPET_LEN).collect();
    if raw.chars().count() > SNIPPET_LEN {
        text.push_str("...");
    }
    text
}

/// Response shapes as the service emits them: everything optional, validated
/// explicitly rather than trusted.
#[derive(Debug, Deserialize)]
struct RawDetectResponse {
    #[serde(default)]
    items: Vec<RawCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    bounding_box: Option<RawRegion>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRegion {
    x: Option<f64>,
    y: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
}

impl RawCandidate {
    /// Validate into a retained candidate, or None if filtered out
    fn validate(self) -> Option<DetectedCandidate> {
        let description = self.description.filter(|d| !d.trim().is_empty())?;
        let category = self.category.filter(|c| !c.trim().is_empty())?;
        let region = self.bounding_box.and_then(RawRegion::validate)?;
        let confidence = self.confidence.filter(|c| c.is_finite())?;

        if confidence <= CONFIDENCE_FLOOR {
            return None;
        }

        Some(DetectedCandidate {
            description,
            category,
            region,
            confidence,
        })
    }
}

impl RawRegion {
    fn validate(self) -> Option<Region> {
        match (self.x, self.y, self.width, self.height) {
            (Some(x), Some(y), Some(width), Some(height))
                if [x, y, width, height].iter().all(|v| v.is_finite()) =>
            {
                Some(Region {
                    x,
                    y,
                    width,
                    height,
                })
            }
            _ => None,
        }
    }
}

/// Resilient wrapper around a [`VisionBackend`].
///
/// Owns input validation, the rate-limit retry policy, response parsing,
/// and the candidate filter. Error classification keeps the underlying
/// diagnostic text in every surfaced error.
pub struct ClassifierGateway {
    backend: Box<dyn VisionBackend>,
    retry: RetryPolicy,
}

impl ClassifierGateway {
    /// Wrap a backend with the default retry policy
    pub fn new(backend: Box<dyn VisionBackend>) -> Self {
        Self::with_retry(backend, RetryPolicy::default())
    }

    /// Wrap a backend with an explicit retry policy
    pub fn with_retry(backend: Box<dyn VisionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Detect clothing items in the image behind `image_url`.
    ///
    /// Returns only candidates with a non-empty description and category, a
    /// well-formed bounding region, and confidence strictly above 0.5.
    pub fn detect_items(
        &self,
        image_url: &str,
    ) -> Result<Vec<DetectedCandidate>, ClassifierError> {
        validate_image_url(image_url)?;

        let raw = self.call_with_retry(|| self.backend.detect(image_url))?;
        let stripped = strip_code_fence(&raw);

        let response: RawDetectResponse =
            serde_json::from_str(stripped).map_err(|e| ClassifierError::ResponseParse {
                reason: e.to_string(),
                snippet: snippet(&raw),
            })?;

        let raw_count = response.items.len();
        let candidates: Vec<DetectedCandidate> = response
            .items
            .into_iter()
            .filter_map(RawCandidate::validate)
            .collect();

        if raw_count > 0 && candidates.is_empty() {
            // Degraded but successful: the service saw items, none were usable.
            warn!(
                image_url,
                raw_count, "all detected candidates were filtered out"
            );
        } else {
            debug!(
                image_url,
                raw_count,
                retained = candidates.len(),
                "detection complete"
            );
        }

        Ok(candidates)
    }

    /// Analyze a single item's metadata.
    pub fn analyze_item(
        &self,
        image_url: &str,
        hint: Option<&str>,
    ) -> Result<ItemMetadata, ClassifierError> {
        validate_image_url(image_url)?;

        let raw = self.call_with_retry(|| self.backend.analyze(image_url, hint))?;
        let stripped = strip_code_fence(&raw);

        serde_json::from_str(stripped).map_err(|e| ClassifierError::ResponseParse {
            reason: e.to_string(),
            snippet: snippet(&raw),
        })
    }

    /// Run a backend call, retrying only rate-limited failures.
    ///
    /// The backoff sleep holds no other resource.
    fn call_with_retry<F>(&self, call: F) -> Result<String, ClassifierError>
    where
        F: Fn() -> Result<String, BackendError>,
    {
        let attempts = self.retry.max_retries + 1;
        let mut last_message = String::new();

        for attempt in 0..attempts {
            match call() {
                Ok(raw) => return Ok(raw),
                Err(error) => match classify_backend_error(&error) {
                    FailureKind::Auth => return Err(ClassifierError::Auth(error.message)),
                    FailureKind::Transient => {
                        return Err(ClassifierError::Transient(error.message))
                    }
                    FailureKind::RateLimited => {
                        last_message = error.message;
                        if attempt + 1 < attempts {
                            let delay = self.retry.delay(attempt);
                            debug!(
                                attempt = attempt + 1,
                                delay_ms = delay.as_millis() as u64,
                                "rate limited, backing off"
                            );
                            std::thread::sleep(delay);
                        }
                    }
                },
            }
        }

        Err(ClassifierError::RateLimitExceeded {
            attempts,
            last_error: last_message,
        })
    }
}

fn validate_image_url(image_url: &str) -> Result<(), ClassifierError> {
    if image_url.trim().is_empty() {
        return Err(ClassifierError::InvalidInput(
            "image reference is empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Backend that fails with the given errors before succeeding
    struct ScriptedBackend {
        failures: Vec<BackendError>,
        success: String,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedBackend {
        fn new(failures: Vec<BackendError>, success: &str) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    failures,
                    success: success.to_string(),
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }

        fn respond(&self) -> Result<String, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.failures.get(call) {
                Some(error) => Err(error.clone()),
                None => Ok(self.success.clone()),
            }
        }
    }

    impl VisionBackend for ScriptedBackend {
        fn detect(&self, _image_url: &str) -> Result<String, BackendError> {
            self.respond()
        }

        fn analyze(&self, _image_url: &str, _hint: Option<&str>) -> Result<String, BackendError> {
            self.respond()
        }
    }

    fn rate_limit_error() -> BackendError {
        BackendError {
            status: Some(429),
            message: "429 Too Many Requests".to_string(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(5),
        }
    }

    fn scripted_gateway(
        failures: Vec<BackendError>,
        success: &str,
    ) -> (ClassifierGateway, Arc<AtomicU32>) {
        let (backend, calls) = ScriptedBackend::new(failures, success);
        (
            ClassifierGateway::with_retry(Box::new(backend), fast_retry()),
            calls,
        )
    }

    const DETECT_OK: &str =
        r#"{"items":[{"description":"navy blazer","category":"jacket","bounding_box":{"x":10,"y":10,"width":40,"height":60},"confidence":0.9}]}"#;

    #[test]
    fn empty_url_fails_fast_without_calling_backend() {
        let (gateway, calls) = scripted_gateway(vec![], DETECT_OK);

        let err = gateway.detect_items("   ").unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidInput(_)));
        // Backend never invoked
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn confidence_filter_keeps_strictly_above_half() {
        let raw = r#"{"items":[
            {"description":"a","category":"top","bounding_box":{"x":0,"y":0,"width":50,"height":50},"confidence":0.9},
            {"description":"b","category":"top","bounding_box":{"x":0,"y":0,"width":50,"height":50},"confidence":0.3},
            {"description":"c","category":"top","bounding_box":{"x":0,"y":0,"width":50,"height":50},"confidence":0.6}
        ]}"#;
        let (gateway, _) = scripted_gateway(vec![], raw);

        let candidates = gateway.detect_items("https://img/a.jpg").unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].description, "a");
        assert_eq!(candidates[1].description, "c");
    }

    #[test]
    fn malformed_candidates_are_filtered() {
        let raw = r#"{"items":[
            {"description":"","category":"top","bounding_box":{"x":0,"y":0,"width":50,"height":50},"confidence":0.9},
            {"description":"no category","bounding_box":{"x":0,"y":0,"width":50,"height":50},"confidence":0.9},
            {"description":"no box","category":"top","confidence":0.9},
            {"description":"partial box","category":"top","bounding_box":{"x":0,"y":0},"confidence":0.9}
        ]}"#;
        let (gateway, _) = scripted_gateway(vec![], raw);

        // All items filtered: degraded but successful, not an error
        let candidates = gateway.detect_items("https://img/a.jpg").unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn code_fence_is_stripped_before_parsing() {
        let fenced = format!("```json\n{DETECT_OK}\n```");
        let (gateway, _) = scripted_gateway(vec![], &fenced);

        let candidates = gateway.detect_items("https://img/a.jpg").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].category, "jacket");
    }

    #[test]
    fn unparseable_response_is_a_parse_error() {
        let (gateway, _) = scripted_gateway(vec![], "the model rambled instead");

        let err = gateway.detect_items("https://img/a.jpg").unwrap_err();
        match err {
            ClassifierError::ResponseParse { snippet, .. } => {
                assert!(snippet.contains("rambled"));
            }
            other => panic!("expected ResponseParse, got {other:?}"),
        }
    }

    #[test]
    fn analyze_parses_metadata() {
        let raw = r#"{"category":"jacket","sub_category":"blazer","primary_color":"navy",
            "secondary_colors":["white"],"vibe_tags":["formal"],"estimated_season":"autumn"}"#;
        let (gateway, _) = scripted_gateway(vec![], raw);

        let metadata = gateway.analyze_item("https://img/a.jpg", Some("blazer")).unwrap();

        assert_eq!(metadata.category, "jacket");
        assert_eq!(metadata.sub_category, "blazer");
        assert_eq!(metadata.secondary_colors, vec!["white"]);
    }

    #[test]
    fn three_rate_limits_then_success_retries_with_backoff() {
        let (gateway, calls) = scripted_gateway(
            vec![rate_limit_error(), rate_limit_error(), rate_limit_error()],
            DETECT_OK,
        );

        let start = Instant::now();
        let candidates = gateway.detect_items("https://img/a.jpg").unwrap();
        let elapsed = start.elapsed();

        assert_eq!(candidates.len(), 1);
        // 4 total attempts, 3 backoff waits of 5ms, 10ms, 20ms
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(elapsed >= Duration::from_millis(35), "elapsed {elapsed:?}");
    }

    #[test]
    fn four_rate_limits_exhaust_retries_without_a_fifth_attempt() {
        let (gateway, calls) = scripted_gateway(vec![rate_limit_error(); 4], DETECT_OK);

        let err = gateway.detect_items("https://img/a.jpg").unwrap_err();

        match err {
            ClassifierError::RateLimitExceeded {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("429"));
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn auth_failures_are_never_retried() {
        let (gateway, calls) = scripted_gateway(
            vec![BackendError {
                status: Some(403),
                message: "API key not valid".to_string(),
            }],
            DETECT_OK,
        );

        let err = gateway.detect_items("https://img/a.jpg").unwrap_err();

        assert!(matches!(err, ClassifierError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unclassified_failures_surface_immediately() {
        let (gateway, calls) = scripted_gateway(
            vec![BackendError::message("connection reset by peer")],
            DETECT_OK,
        );

        let err = gateway.detect_items("https://img/a.jpg").unwrap_err();

        match err {
            ClassifierError::Transient(message) => {
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected Transient, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limit_is_detected_from_message_text() {
        for message in [
            "RESOURCE_EXHAUSTED: try later",
            "Quota exceeded for model",
            "rate limit hit",
            "Too Many Requests",
        ] {
            let kind = classify_backend_error(&BackendError::message(message));
            assert_eq!(kind, FailureKind::RateLimited, "{message}");
        }
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }
}
