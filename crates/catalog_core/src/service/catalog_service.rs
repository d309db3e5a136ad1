//! Catalog write workflows.
//!
//! # Responsibility
//! - Write the canonical dataset first, then update the mirror, then
//!   optionally republish the snapshot.
//! - Route mirror updates through full reconciliation unless the caller
//!   opts into single-record updates.
//! - Report every sub-step so partial success is visible to the caller.
//!
//! # Invariants
//! - A canonical write failure aborts the workflow before any other step.
//! - Mirror and publish failures are recorded as failed steps, never
//!   propagated; the canonical dataset stays the source of truth and the
//!   next reconciliation repairs the mirror.

use crate::mirror::mirror_repo::MirrorRepository;
use crate::mirror::reconciler::{MirrorReconciler, SyncOptions};
use crate::model::outcome::{StepResult, WorkflowReport};
use crate::model::record::CatalogItem;
use crate::repo::dataset_repo::{DatasetRepository, RepoError};
use crate::snapshot::{DatasetSource, MirrorSource, PublishOptions, SnapshotPublisher};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const STEP_CANONICAL_WRITE: &str = "canonical_write";
pub const STEP_MIRROR_UPDATE: &str = "mirror_update";
pub const STEP_PUBLISH: &str = "publish";

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Write workflow failure; only the canonical step can produce one.
#[derive(Debug)]
pub enum ServiceError {
    /// Target item does not exist in the canonical dataset.
    ItemNotFound(String),
    /// Canonical dataset changed concurrently; refetch and retry.
    Conflict { path: String },
    Repo(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound(key) => write!(f, "item not found: {key}"),
            Self::Conflict { path } => {
                write!(f, "dataset `{path}` was modified concurrently; retry the write")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { key } => Self::ItemNotFound(key),
            RepoError::Conflict { path } => Self::Conflict { path },
            other => Self::Repo(other),
        }
    }
}

/// How a write workflow brings the mirror up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorUpdate {
    /// Run an idempotent full reconciliation after the write.
    #[default]
    FullSync,
    /// Upsert or delete only the touched row; cheaper on large catalogs,
    /// leaves other drift for the next full sync.
    SingleRecord,
}

/// Catalog item workflows over the canonical dataset and its mirror.
pub struct CatalogService<'a, M: MirrorRepository> {
    dataset: &'a DatasetRepository<CatalogItem>,
    mirror: &'a M,
    mirror_update: MirrorUpdate,
    sync_options: SyncOptions,
    publisher: Option<&'a SnapshotPublisher<CatalogItem>>,
    publish_options: PublishOptions,
}

impl<'a, M: MirrorRepository> CatalogService<'a, M> {
    pub fn new(dataset: &'a DatasetRepository<CatalogItem>, mirror: &'a M) -> Self {
        Self {
            dataset,
            mirror,
            mirror_update: MirrorUpdate::default(),
            sync_options: SyncOptions::default(),
            publisher: None,
            publish_options: PublishOptions::default(),
        }
    }

    pub fn with_mirror_update(mut self, mirror_update: MirrorUpdate) -> Self {
        self.mirror_update = mirror_update;
        self
    }

    pub fn with_sync_options(mut self, options: SyncOptions) -> Self {
        self.sync_options = options;
        self
    }

    /// Enables the optional publish step.
    pub fn with_publisher(
        mut self,
        publisher: &'a SnapshotPublisher<CatalogItem>,
        options: PublishOptions,
    ) -> Self {
        self.publisher = Some(publisher);
        self.publish_options = options;
        self
    }

    /// Inserts or replaces `item`.
    pub fn save_item(&self, item: CatalogItem, publish: bool) -> ServiceResult<WorkflowReport> {
        let key = item.slug.clone();
        info!("event=catalog_save module=service status=start key={key}");

        let mut report = WorkflowReport::new();
        let written = self.dataset.upsert_latest(item.clone())?;
        report.push(StepResult::ok_with(
            STEP_CANONICAL_WRITE,
            format!("version {}", written.version),
        ));

        report.push(match self.mirror_update {
            MirrorUpdate::FullSync => self.full_sync_step(),
            MirrorUpdate::SingleRecord => {
                let mirrored = self.reconciler().upsert_one(&item);
                match mirrored.warnings.first() {
                    None => StepResult::ok(STEP_MIRROR_UPDATE),
                    Some(warning) => StepResult::failed(STEP_MIRROR_UPDATE, warning.clone()),
                }
            }
        });

        if publish {
            report.push(self.publish_step());
        }
        log_finished("catalog_save", &key, &report);
        Ok(report)
    }

    /// Removes the item keyed by `key`.
    pub fn delete_item(&self, key: &str, publish: bool) -> ServiceResult<WorkflowReport> {
        info!("event=catalog_delete module=service status=start key={key}");

        let mut report = WorkflowReport::new();
        let written = self.dataset.remove_latest(key)?;
        report.push(StepResult::ok_with(
            STEP_CANONICAL_WRITE,
            format!("version {}", written.version),
        ));

        report.push(match self.mirror_update {
            MirrorUpdate::FullSync => self.full_sync_step(),
            MirrorUpdate::SingleRecord => {
                let removed = self.reconciler().remove_one(key);
                match removed.warnings.first() {
                    None if removed.value => StepResult::ok(STEP_MIRROR_UPDATE),
                    None => StepResult::ok_with(STEP_MIRROR_UPDATE, "row already absent"),
                    Some(warning) => StepResult::failed(STEP_MIRROR_UPDATE, warning.clone()),
                }
            }
        });

        if publish {
            report.push(self.publish_step());
        }
        log_finished("catalog_delete", key, &report);
        Ok(report)
    }

    fn reconciler(&self) -> MirrorReconciler<'a, M> {
        MirrorReconciler::new(self.dataset, self.mirror).with_options(self.sync_options)
    }

    fn full_sync_step(&self) -> StepResult {
        match self.reconciler().sync_all() {
            Ok(report) => StepResult::ok_with(
                STEP_MIRROR_UPDATE,
                format!(
                    "{} rows, {} orphans deleted",
                    report.after_count, report.deleted_count
                ),
            ),
            Err(err) => {
                warn!("event=catalog_mirror_sync module=service status=warn error={err}");
                StepResult::failed(STEP_MIRROR_UPDATE, err.to_string())
            }
        }
    }

    fn publish_step(&self) -> StepResult {
        let Some(publisher) = self.publisher else {
            return StepResult::failed(STEP_PUBLISH, "no snapshot publisher configured");
        };
        let primary = MirrorSource::new(self.mirror);
        let fallback = DatasetSource::new(self.dataset);
        match publisher.publish(&primary, Some(&fallback), self.publish_options) {
            Ok(outcome) => {
                let mut detail = format!(
                    "{} records in {} chunks from {}",
                    outcome.value.meta.total, outcome.value.meta.chunk_count, outcome.value.source
                );
                for warning in &outcome.warnings {
                    detail.push_str("; ");
                    detail.push_str(warning);
                }
                StepResult::ok_with(STEP_PUBLISH, detail)
            }
            Err(err) => StepResult::failed(STEP_PUBLISH, err.to_string()),
        }
    }
}

fn log_finished(event: &str, key: &str, report: &WorkflowReport) {
    if report.all_ok() {
        info!("event={event} module=service status=ok key={key}");
    } else {
        let failed = report
            .steps
            .iter()
            .filter(|step| !step.ok)
            .map(|step| step.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        warn!("event={event} module=service status=warn key={key} failed_steps={failed}");
    }
}
