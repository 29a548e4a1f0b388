use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use evidence_core::{
    build_backends, build_record_store, build_relay, load_config, validate_config,
    AcquisitionOrchestrator, ArtifactCollector, TextServices,
};
use evidence_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

/// Plain text by default, JSON lines with `EVIDENCE_LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("EVIDENCE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("EVIDENCE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded, worker id {}", config.worker_id);

    let store = build_record_store(&config.store).context("Failed to create record store")?;
    info!("Record store: {}", store.name());

    let backends = build_backends(&config.backends, &config.worker_id)
        .context("Failed to create acquisition backends")?;
    let chain: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    info!("Backend chain: {}", chain.join(" -> "));

    let relay = build_relay(&config.relay).context("Failed to create relay sink")?;
    info!("Relay sink: {}", relay.name());

    let text = TextServices::from_config(&config.text)
        .context("Failed to create text understanding services")?;
    let collector = ArtifactCollector::new(config.collector.clone());
    info!(
        "Evidence destination root: {:?}",
        config.collector.destination_root
    );

    let orchestrator = Arc::new(
        AcquisitionOrchestrator::new(
            config.orchestrator.clone(),
            config.worker_id.clone(),
            store,
            backends,
            collector,
            relay,
            config.relay.delete_after_upload,
            text,
        )
        .context("Failed to create orchestrator")?,
    );
    orchestrator.start().await;

    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&orchestrator)));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping orchestrator...");
    orchestrator.stop().await;
    info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
