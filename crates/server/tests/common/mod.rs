//! Common test utilities for in-process API testing with mocks.
//!
//! The fixture builds the real router around an orchestrator whose record
//! store, backend and relay are the in-memory mocks from
//! `evidence_core::testing`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use evidence_core::{
    load_config_from_str,
    testing::{MockBackend, MockRecordStore, MockRelay},
    AcquisitionBackend, AcquisitionOrchestrator, ArtifactCollector, CollectorConfig, RecordStore,
    RelaySink, TextServices,
};
use evidence_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use evidence_core::testing::fixtures;

const TEST_CONFIG: &str = r#"
worker_id = "api-test"

[store.notion]
api_key = "secret_test"
database_id = "db-test"

[relay]
backend = "directory"

[relay.directory]
path = "/tmp/unused"
"#;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = TestFixture::new().await;
/// fixture.store.insert(fixtures::case("c1", "Jane Doe")).await;
/// fixture.orchestrator.run_cycle().await;
///
/// let response = fixture.get("/api/v1/status").await;
/// assert_eq!(response.body["acquired_count"], 1);
/// ```
pub struct TestFixture {
    pub router: Router,
    pub store: MockRecordStore,
    pub backend: MockBackend,
    pub relay: MockRelay,
    pub orchestrator: Arc<AcquisitionOrchestrator>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = load_config_from_str(TEST_CONFIG).expect("Failed to parse test config");

        let store = MockRecordStore::new();
        let backend = MockBackend::new("remote_agent");
        let relay = MockRelay::new();

        let orchestrator = Arc::new(
            AcquisitionOrchestrator::new(
                fixtures::fast_orchestrator_config(),
                config.worker_id.clone(),
                Arc::new(store.clone()) as Arc<dyn RecordStore>,
                vec![Arc::new(backend.clone()) as Arc<dyn AcquisitionBackend>],
                ArtifactCollector::new(CollectorConfig {
                    destination_root: temp_dir.path().to_path_buf(),
                    ..Default::default()
                }),
                Arc::new(relay.clone()) as Arc<dyn RelaySink>,
                false,
                TextServices::rules(),
            )
            .expect("Failed to create orchestrator"),
        );

        let state = Arc::new(AppState::new(config, Arc::clone(&orchestrator)));
        let router = create_router(state);

        Self {
            router,
            store,
            backend,
            relay,
            orchestrator,
            temp_dir,
        }
    }

    /// Send a GET request to the router.
    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body, text }
    }
}
