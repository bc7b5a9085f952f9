//! Integration tests for the ingestion pipeline.
//!
//! These tests verify end-to-end behavior including:
//! - Detect, resolve, and persist across the real module boundaries
//! - Merge-instead-of-duplicate on re-ingestion
//! - Per-candidate failure isolation
//! - SQLite persistence across re-opens

use image::{DynamicImage, ImageBuffer, Rgb};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wardrobe_catalog::core::catalog::{InMemoryRepository, ItemRepository, SqliteRepository};
use wardrobe_catalog::core::classifier::{
    BackendError, ClassifierGateway, RetryPolicy, VisionBackend,
};
use wardrobe_catalog::core::pipeline::{IngestionPipeline, PipelineConfig};
use wardrobe_catalog::core::store::InMemoryImageStore;
use wardrobe_catalog::error::{CatalogError, ClassifierError};

const DETECT_TWO_ITEMS: &str = r#"{"items":[
    {"description":"white t-shirt","category":"top",
     "bounding_box":{"x":5,"y":5,"width":90,"height":45},"confidence":0.92},
    {"description":"blue jeans","category":"bottom",
     "bounding_box":{"x":5,"y":50,"width":90,"height":45},"confidence":0.87}
]}"#;

const DETECT_NOTHING: &str = r#"{"items":[]}"#;

const ANALYZE_TSHIRT: &str = r#"{"category":"top","sub_category":"t-shirt",
    "primary_color":"white","secondary_colors":[],
    "vibe_tags":["casual"],"estimated_season":"summer"}"#;

/// Backend that replays canned responses and counts calls
struct CannedBackend {
    detect: String,
    analyze: String,
    detect_calls: Arc<AtomicU32>,
}

impl CannedBackend {
    fn new(detect: &str, analyze: &str) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                detect: detect.to_string(),
                analyze: analyze.to_string(),
                detect_calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl VisionBackend for CannedBackend {
    fn detect(&self, _image_url: &str) -> Result<String, BackendError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detect.clone())
    }

    fn analyze(&self, _image_url: &str, _hint: Option<&str>) -> Result<String, BackendError> {
        Ok(self.analyze.clone())
    }
}

/// Backend that always reports a rate limit
struct RateLimitedBackend {
    calls: Arc<AtomicU32>,
}

impl VisionBackend for RateLimitedBackend {
    fn detect(&self, _image_url: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError {
            status: Some(429),
            message: "429 Too Many Requests".to_string(),
        })
    }

    fn analyze(&self, _image_url: &str, _hint: Option<&str>) -> Result<String, BackendError> {
        Err(BackendError {
            status: Some(429),
            message: "429 Too Many Requests".to_string(),
        })
    }
}

fn checker_png(invert: bool) -> Vec<u8> {
    let img = ImageBuffer::from_fn(64, 64, |x, y| {
        let on = ((x / 8) + (y / 8)) % 2 == 0;
        if on != invert {
            Rgb([255u8, 255, 255])
        } else {
            Rgb([0u8, 0, 0])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(2),
    }
}

fn build_pipeline(
    store: Arc<InMemoryImageStore>,
    repository: Arc<dyn ItemRepository>,
    backend: Box<dyn VisionBackend>,
) -> IngestionPipeline {
    IngestionPipeline::builder()
        .store(store)
        .classifier(Arc::new(ClassifierGateway::with_retry(backend, fast_retry())))
        .repository(repository)
        .config(PipelineConfig {
            concurrency: 2,
            ..PipelineConfig::default()
        })
        .build()
        .unwrap()
}

#[test]
fn detected_regions_become_separate_catalog_items() {
    let store = Arc::new(InMemoryImageStore::new());
    let repository = Arc::new(InMemoryRepository::new());
    store.put("https://img/outfit.jpg", checker_png(false)).unwrap();

    let (backend, _) = CannedBackend::new(DETECT_TWO_ITEMS, ANALYZE_TSHIRT);
    let pipeline = build_pipeline(
        Arc::clone(&store),
        Arc::clone(&repository) as Arc<dyn ItemRepository>,
        Box::new(backend),
    );

    let outcomes = pipeline
        .ingest_image("user-1", "https://img/outfit.jpg")
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.succeeded()));
    assert_eq!(repository.len(), 2);

    let first = repository
        .find_by_id(outcomes[0].item_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(first.owner_id, "user-1");
    assert_eq!(first.metadata.category, "top");
    assert_eq!(first.images.primary, "https://img/outfit.jpg");
}

#[test]
fn reingesting_identical_bytes_merges_instead_of_duplicating() {
    let store = Arc::new(InMemoryImageStore::new());
    let repository = Arc::new(InMemoryRepository::new());
    let bytes = checker_png(false);
    store.put("https://img/first-upload.jpg", bytes.clone()).unwrap();
    store.put("https://img/second-upload.jpg", bytes).unwrap();

    let (backend, _) = CannedBackend::new(DETECT_NOTHING, ANALYZE_TSHIRT);
    let pipeline = build_pipeline(
        Arc::clone(&store),
        Arc::clone(&repository) as Arc<dyn ItemRepository>,
        Box::new(backend),
    );

    let first = pipeline
        .ingest_image("user-1", "https://img/first-upload.jpg")
        .unwrap();
    let second = pipeline
        .ingest_image("user-1", "https://img/second-upload.jpg")
        .unwrap();

    assert!(!first[0].merged);
    assert!(second[0].merged);
    assert_eq!(second[0].item_id, first[0].item_id);
    assert_eq!(repository.len(), 1);

    let item = repository
        .find_by_id(first[0].item_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(item.images.primary, "https://img/first-upload.jpg");
    assert_eq!(item.images.variants, vec!["https://img/second-upload.jpg"]);
}

#[test]
fn same_image_for_different_owners_stays_separate() {
    let store = Arc::new(InMemoryImageStore::new());
    let repository = Arc::new(InMemoryRepository::new());
    store.put("https://img/shared.jpg", checker_png(false)).unwrap();

    let (backend, _) = CannedBackend::new(DETECT_NOTHING, ANALYZE_TSHIRT);
    let pipeline = build_pipeline(
        Arc::clone(&store),
        Arc::clone(&repository) as Arc<dyn ItemRepository>,
        Box::new(backend),
    );

    let alice = pipeline
        .ingest_image("alice", "https://img/shared.jpg")
        .unwrap();
    let bob = pipeline
        .ingest_image("bob", "https://img/shared.jpg")
        .unwrap();

    assert!(!alice[0].merged);
    assert!(!bob[0].merged);
    assert_ne!(alice[0].item_id, bob[0].item_id);
    assert_eq!(repository.len(), 2);
}

#[test]
fn failing_candidate_does_not_abort_the_batch() {
    let store = Arc::new(InMemoryImageStore::new());
    let repository = Arc::new(InMemoryRepository::new());
    // Detection succeeds, but only the intact upload has bytes behind it
    store.put("https://img/intact.jpg", checker_png(false)).unwrap();

    let (backend, _) = CannedBackend::new(DETECT_NOTHING, ANALYZE_TSHIRT);
    let pipeline = build_pipeline(
        Arc::clone(&store),
        Arc::clone(&repository) as Arc<dyn ItemRepository>,
        Box::new(backend),
    );

    let broken = pipeline
        .ingest_image("user-1", "https://img/gone.jpg")
        .unwrap();
    let intact = pipeline
        .ingest_image("user-1", "https://img/intact.jpg")
        .unwrap();

    assert_eq!(broken.len(), 1);
    assert!(broken[0].item_id.is_none());
    assert!(broken[0].error.is_some());

    assert!(intact[0].succeeded());
    assert_eq!(repository.len(), 1);
}

#[test]
fn persistent_rate_limit_exhausts_retries_and_fails_the_call() {
    let store = Arc::new(InMemoryImageStore::new());
    let repository = Arc::new(InMemoryRepository::new());
    store.put("https://img/a.jpg", checker_png(false)).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let backend = RateLimitedBackend {
        calls: Arc::clone(&calls),
    };
    let pipeline = build_pipeline(
        store,
        Arc::clone(&repository) as Arc<dyn ItemRepository>,
        Box::new(backend),
    );

    let err = pipeline
        .ingest_image("user-1", "https://img/a.jpg")
        .unwrap_err();

    match err {
        CatalogError::Classifier(ClassifierError::RateLimitExceeded {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 4);
            assert!(last_error.contains("429"));
        }
        other => panic!("expected rate limit exhaustion, got {other:?}"),
    }
    // Initial attempt plus three retries
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(repository.len(), 0);
}

#[test]
fn sqlite_catalog_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("catalog.db");

    let store = Arc::new(InMemoryImageStore::new());
    store.put("https://img/a.jpg", checker_png(false)).unwrap();

    let item_id = {
        let repository = Arc::new(SqliteRepository::open(&db_path).unwrap());
        let (backend, _) = CannedBackend::new(DETECT_NOTHING, ANALYZE_TSHIRT);
        let pipeline = build_pipeline(
            Arc::clone(&store),
            Arc::clone(&repository) as Arc<dyn ItemRepository>,
            Box::new(backend),
        );

        let outcomes = pipeline.ingest_image("user-1", "https://img/a.jpg").unwrap();
        outcomes[0].item_id.unwrap()
    };

    // Re-open the database and ingest the same bytes again
    let repository = Arc::new(SqliteRepository::open(&db_path).unwrap());
    let stored = repository.find_by_id(item_id).unwrap().unwrap();
    assert_eq!(stored.metadata.category, "top");

    store.put("https://img/b.jpg", checker_png(false)).unwrap();
    let (backend, _) = CannedBackend::new(DETECT_NOTHING, ANALYZE_TSHIRT);
    let pipeline = build_pipeline(
        store,
        Arc::clone(&repository) as Arc<dyn ItemRepository>,
        Box::new(backend),
    );

    let outcomes = pipeline.ingest_image("user-1", "https://img/b.jpg").unwrap();
    assert!(outcomes[0].merged);
    assert_eq!(outcomes[0].item_id, Some(item_id));
}
