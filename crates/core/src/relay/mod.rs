//! Relay of collected artifacts to durable storage.

mod config;
mod directory;
mod dropbox;
mod folder;
mod types;

pub use config::{
    DirectoryRelayConfig, DropboxConfig, RelayBackend, RelayConfig, MAX_SINGLE_REQUEST_BYTES,
};
pub use directory::DirectoryRelay;
pub use dropbox::{header_safe_json, DropboxRelay};
pub use folder::{relay_case_folder, RelayReport};
pub use types::{RelayError, RelaySink, UploadedFile};

use std::sync::Arc;

/// Build the configured relay sink.
pub fn build_relay(config: &RelayConfig) -> Result<Arc<dyn RelaySink>, RelayError> {
    match config.backend {
        RelayBackend::Dropbox => {
            let dropbox = config
                .dropbox
                .clone()
                .ok_or_else(|| RelayError::NotConfigured("missing [relay.dropbox]".to_string()))?;
            Ok(Arc::new(DropboxRelay::new(dropbox)?))
        }
        RelayBackend::Directory => {
            let directory = config.directory.clone().ok_or_else(|| {
                RelayError::NotConfigured("missing [relay.directory]".to_string())
            })?;
            Ok(Arc::new(DirectoryRelay::new(directory)))
        }
    }
}
