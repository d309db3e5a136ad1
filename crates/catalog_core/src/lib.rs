//! Core logic for the catalog document store.
//! The canonical dataset in the content store is the single source of truth;
//! the SQLite mirror and published snapshots are derived from it.

pub mod cache;
pub mod config;
pub mod content;
pub mod db;
pub mod logging;
pub mod mirror;
pub mod model;
pub mod repo;
pub mod service;
pub mod snapshot;

pub use cache::DatasetCache;
pub use config::{resolve, ConfigError, StoreConfig};
pub use content::{ContentApi, ContentError, HttpContentClient, InMemoryContentStore};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use mirror::mirror_repo::{MirrorError, MirrorRepository, SqliteMirrorRepository};
pub use mirror::reconciler::{MirrorReconciler, SyncError, SyncOptions, SyncReport};
pub use model::outcome::{Outcome, StepResult, WorkflowReport};
pub use model::record::{CatalogItem, Collection, Record, UserRequest};
pub use model::versioned::{VersionToken, Versioned};
pub use repo::dataset_repo::{DatasetLayout, DatasetRepository, RepoError, RepoResult};
pub use service::catalog_service::{CatalogService, MirrorUpdate, ServiceError};
pub use service::reader::{CatalogReader, ReadSource};
pub use service::readiness::readiness_check;
pub use snapshot::{PublishError, PublishOptions, PublishReport, SnapshotPublisher};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
