use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A valid config whose external services are unreachable.
fn minimal_config(port: u16, dir: &Path) -> String {
    format!(
        r#"
worker_id = "startup-test"

[server]
host = "127.0.0.1"
port = {port}

[store.notion]
api_key = "secret_test"
database_id = "db-test"
api_base = "http://127.0.0.1:9"
max_retries = 0
timeout_secs = 1

[backends.remote_agent]
api_base = "http://127.0.0.1:9/api/v1"

[collector]
destination_root = "{evidence}"

[relay]
backend = "directory"

[relay.directory]
path = "{archive}"
"#,
        port = port,
        evidence = dir.join("evidence").display(),
        archive = dir.join("archive").display(),
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_evidence-fetcher"))
        .env("EVIDENCE_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn run_to_exit(config_path: &Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_evidence-fetcher"))
            .env("EVIDENCE_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_health_and_status_endpoints() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config = write_config(&minimal_config(port, dir.path()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let health: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(health["status"], "ok");

    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/status", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let status: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(status["running"], true);
    assert_eq!(status["worker_id"], "startup-test");
    assert_eq!(status["max_concurrent"], 2);

    let metrics = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .expect("Failed to send request")
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("evidence_orchestrator_running 1"));

    server.kill().await.ok();
}

#[tokio::test]
async fn test_env_overrides_config() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config = write_config(&minimal_config(port, dir.path()));

    let mut server = tokio::process::Command::new(env!("CARGO_BIN_EXE_evidence-fetcher"))
        .env("EVIDENCE_CONFIG", config.path())
        .env("EVIDENCE_ORCHESTRATOR__MAX_CONCURRENT", "5")
        .env("RUST_LOG", "error")
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server");
    assert!(
        wait_for_server(port, 100).await,
        "Server did not start in time"
    );

    let status: serde_json::Value = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/status", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["max_concurrent"], 5);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_to_exit(Path::new("/nonexistent/config.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_store_section_exits_with_error() {
    let config = write_config(
        r#"
[server]
port = 8080
"#,
    );
    let result = run_to_exit(config.path()).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_chain_without_backend_section_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let content = minimal_config(get_available_port(), dir.path())
        .replace("[backends.remote_agent]", "[backends.cloud_agent]");
    let config = write_config(&content);

    let result = run_to_exit(config.path()).await;
    assert!(!result.status.success());
}
