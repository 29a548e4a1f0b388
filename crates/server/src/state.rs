use std::sync::Arc;
use evidence_core::{AcquisitionOrchestrator, Config};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<AcquisitionOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<AcquisitionOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &AcquisitionOrchestrator {
        self.orchestrator.as_ref()
    }
}
