//! Canonical-to-mirror reconciliation.
//!
//! # Responsibility
//! - Upsert every canonical record into the mirror in bounded batches.
//! - Delete mirror rows whose key is absent from the canonical dataset.
//! - Offer best-effort single-record mirror updates that report, rather
//!   than propagate, their failures.
//!
//! # Invariants
//! - Re-running `sync_all` over an unchanged dataset leaves every mirror row
//!   untouched and deletes nothing.
//! - A failed batch aborts the run; earlier batches stay committed.

use crate::mirror::mirror_repo::{MirrorError, MirrorRepository};
use crate::model::outcome::Outcome;
use crate::model::record::{CatalogItem, Record};
use crate::repo::dataset_repo::{DatasetRepository, RepoError};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 200;
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 500;

/// Reconciliation phase that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Upsert,
    Delete,
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Reconciliation failure.
#[derive(Debug)]
pub enum SyncError {
    InvalidOptions(String),
    /// Canonical dataset could not be read.
    Dataset(RepoError),
    /// Mirror failed before any batch committed.
    Mirror(MirrorError),
    /// A batch failed after `committed_batches` earlier batches committed.
    /// Safe to retry: reconciliation is idempotent.
    PartialSync {
        stage: SyncStage,
        committed_batches: usize,
        total_batches: usize,
        source: MirrorError,
    },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOptions(message) => write!(f, "invalid sync options: {message}"),
            Self::Dataset(err) => write!(f, "failed to read canonical dataset: {err}"),
            Self::Mirror(err) => write!(f, "mirror unavailable: {err}"),
            Self::PartialSync {
                stage,
                committed_batches,
                total_batches,
                source,
            } => write!(
                f,
                "{stage:?} batch {} of {total_batches} failed after {committed_batches} committed: {source}",
                committed_batches + 1
            ),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidOptions(_) => None,
            Self::Dataset(err) => Some(err),
            Self::Mirror(err) => Some(err),
            Self::PartialSync { source, .. } => Some(source),
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Dataset(value)
    }
}

impl From<MirrorError> for SyncError {
    fn from(value: MirrorError) -> Self {
        Self::Mirror(value)
    }
}

/// Batch sizing for one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub upsert_batch_size: usize,
    pub delete_batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
        }
    }
}

/// Counts observed by one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub before_count: u64,
    pub canonical_count: u64,
    pub after_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
}

/// Reconciles the catalog mirror against the canonical dataset.
pub struct MirrorReconciler<'a, M: MirrorRepository> {
    dataset: &'a DatasetRepository<CatalogItem>,
    mirror: &'a M,
    options: SyncOptions,
}

impl<'a, M: MirrorRepository> MirrorReconciler<'a, M> {
    pub fn new(dataset: &'a DatasetRepository<CatalogItem>, mirror: &'a M) -> Self {
        Self {
            dataset,
            mirror,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Makes the mirror match the canonical dataset.
    pub fn sync_all(&self) -> SyncResult<SyncReport> {
        if self.options.upsert_batch_size == 0 || self.options.delete_batch_size == 0 {
            return Err(SyncError::InvalidOptions(
                "batch sizes must be greater than zero".to_string(),
            ));
        }

        let started_at = Instant::now();
        info!("event=mirror_sync module=mirror status=start");

        let canonical = self.dataset.fetch_fresh()?.value;
        let before_count = self.mirror.count()?;

        let upsert_batches = canonical.chunks(self.options.upsert_batch_size).collect::<Vec<_>>();
        for (index, batch) in upsert_batches.iter().enumerate() {
            self.mirror
                .upsert_batch(batch)
                .map_err(|source| batch_failure(SyncStage::Upsert, index, upsert_batches.len(), source))?;
        }

        let canonical_keys = canonical.iter().map(Record::key).collect::<HashSet<_>>();
        let orphans = self
            .mirror
            .list_keys()?
            .into_iter()
            .filter(|key| !canonical_keys.contains(key.as_str()))
            .collect::<Vec<_>>();

        let delete_batches = orphans.chunks(self.options.delete_batch_size).collect::<Vec<_>>();
        let mut deleted_count = 0u64;
        for (index, batch) in delete_batches.iter().enumerate() {
            let deleted = self
                .mirror
                .delete_keys(batch)
                .map_err(|source| {
                    if upsert_batches.is_empty() {
                        batch_failure(SyncStage::Delete, index, delete_batches.len(), source)
                    } else {
                        partial(SyncStage::Delete, index, delete_batches.len(), source)
                    }
                })?;
            deleted_count += deleted as u64;
        }

        let report = SyncReport {
            before_count,
            canonical_count: canonical.len() as u64,
            after_count: self.mirror.count()?,
            deleted_count,
            upserted_count: canonical.len() as u64,
        };
        info!(
            "event=mirror_sync module=mirror status=ok before={} canonical={} after={} deleted={} duration_ms={}",
            report.before_count,
            report.canonical_count,
            report.after_count,
            report.deleted_count,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Mirrors one record; failures become warnings.
    pub fn upsert_one(&self, item: &CatalogItem) -> Outcome<bool> {
        match self.mirror.upsert_batch(std::slice::from_ref(item)) {
            Ok(_) => Outcome::clean(true),
            Err(err) => {
                warn!(
                    "event=mirror_upsert_one module=mirror status=warn key={} error={err}",
                    item.slug
                );
                Outcome::with_warnings(
                    false,
                    vec![format!("mirror upsert of `{}` failed: {err}", item.slug)],
                )
            }
        }
    }

    /// Removes one mirror row; failures become warnings.
    ///
    /// The value is whether a row was actually deleted.
    pub fn remove_one(&self, key: &str) -> Outcome<bool> {
        match self.mirror.delete_one(key) {
            Ok(deleted) => Outcome::clean(deleted),
            Err(err) => {
                warn!("event=mirror_remove_one module=mirror status=warn key={key} error={err}");
                Outcome::with_warnings(
                    false,
                    vec![format!("mirror delete of `{key}` failed: {err}")],
                )
            }
        }
    }
}

/// Failure of batch `index` within its own stage. The first batch of a run
/// has nothing committed before it.
fn batch_failure(stage: SyncStage, index: usize, total: usize, source: MirrorError) -> SyncError {
    if index == 0 {
        warn!(
            "event=mirror_sync module=mirror status=error stage={stage:?} batch=1 total_batches={total}"
        );
        return SyncError::Mirror(source);
    }
    partial(stage, index, total, source)
}

fn partial(stage: SyncStage, index: usize, total: usize, source: MirrorError) -> SyncError {
    warn!(
        "event=mirror_sync module=mirror status=error stage={stage:?} batch={} total_batches={total}",
        index + 1
    );
    SyncError::PartialSync {
        stage,
        committed_batches: index,
        total_batches: total,
        source,
    }
}
