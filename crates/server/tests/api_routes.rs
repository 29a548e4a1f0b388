//! Router tests against an in-process orchestrator built from mocks.

mod common;

use axum::http::StatusCode;
use evidence_core::CaseStatus;

use common::{fixtures, TestFixture};

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_status_reports_queue() {
    let fixture = TestFixture::new().await;
    fixture.store.insert(fixtures::case("c1", "Jane Doe")).await;
    fixture.store.insert(fixtures::case("c2", "John Roe")).await;
    fixture
        .store
        .insert(fixtures::case("c3", "Old").with_status(CaseStatus::Failed))
        .await;

    let response = fixture.get("/api/v1/status").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["running"], false);
    assert_eq!(response.body["worker_id"], "api-test");
    assert_eq!(response.body["eligible_count"], 2);
    assert_eq!(response.body["in_progress_count"], 0);
    assert_eq!(response.body["failed_count"], 1);
    assert_eq!(response.body["live_jobs"], 0);
    assert_eq!(response.body["max_concurrent"], 2);
}

#[tokio::test]
async fn test_status_after_cycle() {
    let fixture = TestFixture::new().await;
    fixture.store.insert(fixtures::case("c1", "Jane Doe")).await;

    fixture.orchestrator.run_cycle().await;

    let response = fixture.get("/api/v1/status").await;
    assert_eq!(response.body["acquired_count"], 1);
    assert_eq!(response.body["eligible_count"], 0);
    assert_eq!(fixture.backend.start_count().await, 1);
    assert_eq!(fixture.relay.uploads().await.len(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.store.insert(fixtures::case("c1", "Jane Doe")).await;
    fixture.orchestrator.run_cycle().await;

    // One request first so the HTTP counters have a sample.
    fixture.get("/api/v1/health").await;
    let response = fixture.get("/metrics").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text.contains("evidence_cases_finished_total"));
    assert!(response.text.contains("evidence_cases_by_status"));
    assert!(response.text.contains("evidence_http_requests_total"));
    assert!(response.text.contains("path=\"/api/v1/health\""));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/tickets").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
