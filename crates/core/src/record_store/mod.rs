//! Record store abstraction.
//!
//! The external record store is the only durable state shared between workers.
//! Cases are read and updated exclusively through the [`RecordStore`] trait; the
//! store offers no transactions, so claims are best-effort.

mod config;
mod notion;
mod store;
mod types;

pub use config::{
    NotionConfig, NotionProperties, RecordStoreConfig, StatusLabels, StatusPropertyKind,
    StoreBackend,
};
pub use notion::NotionRecordStore;
pub use store::{RecordStore, RecordStoreError};
pub use types::{Case, CaseStatus};

use std::sync::Arc;

/// Build the configured record store.
pub fn build_record_store(
    config: &RecordStoreConfig,
) -> Result<Arc<dyn RecordStore>, RecordStoreError> {
    match config.backend {
        StoreBackend::Notion => {
            let notion = config.notion.clone().ok_or_else(|| {
                RecordStoreError::InvalidData("missing [store.notion] section".to_string())
            })?;
            Ok(Arc::new(NotionRecordStore::new(notion, config.labels.clone())?))
        }
    }
}
