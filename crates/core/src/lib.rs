pub mod backend;
pub mod backoff;
pub mod collector;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod record_store;
pub mod relay;
pub mod testing;
pub mod text;

pub use backend::{
    build_backends, AcquisitionBackend, BackendError, BackendKind, BackendsConfig, JobRef,
    JobStatus, Liveness, StartRequest,
};
pub use collector::{
    Artifact, ArtifactCollector, CollectionSession, CollectorConfig, CollectorError,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ServerConfig,
};
pub use orchestrator::{
    AcquisitionOrchestrator, CaseOutcome, CaseReport, CycleReport, OrchestratorConfig,
    OrchestratorError, OrchestratorStatus, ReconcileReport,
};
pub use record_store::{
    build_record_store, Case, CaseStatus, NotionRecordStore, RecordStore, RecordStoreConfig,
    RecordStoreError, StatusLabels,
};
pub use relay::{build_relay, relay_case_folder, RelayConfig, RelayError, RelaySink};
pub use text::{CasePreFilter, CredentialParser, Credentials, TextConfig, TextServices};
