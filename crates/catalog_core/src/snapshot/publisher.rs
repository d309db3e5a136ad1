//! Snapshot publication into the content store.
//!
//! # Responsibility
//! - Pick a record source, preferring the primary and recording a warning
//!   when the fallback had to be used.
//! - Write every chunk, then `meta.json`, then invalidate the cache.
//! - Remove chunk artifacts left over from a larger previous snapshot.
//!
//! # Invariants
//! - `meta.json` is written last, so readers never see metadata that points
//!   at chunks which have not been written yet.
//! - Pruning is best-effort; its failures are warnings.

use crate::cache::DatasetCache;
use crate::content::{current_version, ContentApi, ContentError};
use crate::model::outcome::Outcome;
use crate::model::record::Record;
use crate::repo::paths::{chunk_index_from_path, EntityPaths};
use crate::snapshot::source::SnapshotSource;
use crate::snapshot::{build_snapshot, sort_for_snapshot, Snapshot, SnapshotMeta};
use chrono::Utc;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

pub type PublishResult<T> = Result<T, PublishError>;

/// Snapshot publication failure.
#[derive(Debug)]
pub enum PublishError {
    InvalidOptions(String),
    /// Neither the primary nor the fallback source could be read.
    SourcesUnavailable {
        primary: String,
        fallback: Option<String>,
    },
    Content(ContentError),
    Serialize(serde_json::Error),
    /// A published artifact could not be decoded.
    Parse { path: String, message: String },
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOptions(message) => write!(f, "invalid publish options: {message}"),
            Self::SourcesUnavailable { primary, fallback } => match fallback {
                Some(fallback) => write!(
                    f,
                    "no snapshot source available (primary: {primary}; fallback: {fallback})"
                ),
                None => write!(f, "no snapshot source available: {primary}"),
            },
            Self::Content(err) => write!(f, "{err}"),
            Self::Serialize(err) => write!(f, "failed to serialize snapshot: {err}"),
            Self::Parse { path, message } => write!(f, "invalid snapshot artifact `{path}`: {message}"),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Content(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::InvalidOptions(_) | Self::SourcesUnavailable { .. } | Self::Parse { .. } => None,
        }
    }
}

impl From<ContentError> for PublishError {
    fn from(value: ContentError) -> Self {
        Self::Content(value)
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// Snapshot shape parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub page_size: usize,
    pub chunk_size: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PublishOptions {
    fn validate(&self) -> PublishResult<()> {
        if self.page_size == 0 || self.chunk_size == 0 {
            return Err(PublishError::InvalidOptions(
                "page size and chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What one publication wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    /// Name of the source the records came from.
    pub source: String,
    pub meta: SnapshotMeta,
    pub chunk_paths: Vec<String>,
    pub meta_path: String,
    pub pruned_paths: Vec<String>,
}

/// Publishes snapshots of one entity type.
pub struct SnapshotPublisher<T: Record> {
    api: Arc<dyn ContentApi>,
    cache: DatasetCache,
    paths: EntityPaths,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> SnapshotPublisher<T> {
    pub fn new(api: Arc<dyn ContentApi>, cache: DatasetCache, data_root: Option<&str>) -> Self {
        Self {
            api,
            cache,
            paths: EntityPaths::for_record::<T>(data_root),
            _record: PhantomData,
        }
    }

    pub fn paths(&self) -> &EntityPaths {
        &self.paths
    }

    /// Generates and publishes a snapshot.
    ///
    /// Warnings record a fallback source, a count that moved during the
    /// read, or chunks that could not be pruned.
    pub fn publish(
        &self,
        primary: &dyn SnapshotSource<T>,
        fallback: Option<&dyn SnapshotSource<T>>,
        options: PublishOptions,
    ) -> PublishResult<Outcome<PublishReport>> {
        options.validate()?;
        let started_at = Instant::now();
        info!(
            "event=snapshot_publish module=snapshot status=start entity={} page_size={} chunk_size={}",
            T::ENTITY,
            options.page_size,
            options.chunk_size
        );

        let mut warnings = Vec::new();
        let (source_name, mut records) = self.load_records(primary, fallback, &mut warnings)?;
        sort_for_snapshot(&mut records);
        let snapshot = build_snapshot(&records, options.page_size, options.chunk_size, Utc::now());

        let message = format!(
            "Publish {} snapshot ({} records, {} chunks)",
            T::ENTITY,
            snapshot.meta.total,
            snapshot.meta.chunk_count
        );
        let mut chunk_paths = Vec::with_capacity(snapshot.chunks.len());
        for (index, chunk) in snapshot.chunks.iter().enumerate() {
            let path = self.paths.chunk(index + 1);
            self.write_artifact(&path, chunk, &message)?;
            chunk_paths.push(path);
        }
        let meta_path = self.paths.meta();
        self.write_artifact(&meta_path, &snapshot.meta, &message)?;

        let pruned_paths = self.prune_stale_chunks(snapshot.meta.chunk_count, &mut warnings);
        self.cache.invalidate(self.paths.root());

        info!(
            "event=snapshot_publish module=snapshot status=ok entity={} source={source_name} total={} chunks={} pruned={} warnings={} duration_ms={}",
            T::ENTITY,
            snapshot.meta.total,
            snapshot.meta.chunk_count,
            pruned_paths.len(),
            warnings.len(),
            started_at.elapsed().as_millis()
        );
        Ok(Outcome::with_warnings(
            PublishReport {
                source: source_name.to_string(),
                meta: snapshot.meta,
                chunk_paths,
                meta_path,
                pruned_paths,
            },
            warnings,
        ))
    }

    fn load_records(
        &self,
        primary: &dyn SnapshotSource<T>,
        fallback: Option<&dyn SnapshotSource<T>>,
        warnings: &mut Vec<String>,
    ) -> PublishResult<(&'static str, Vec<T>)> {
        let primary_error = match read_source(primary, warnings) {
            Ok(records) => return Ok((primary.name(), records)),
            Err(err) => err,
        };
        warn!(
            "event=snapshot_source module=snapshot status=warn source={} error={primary_error}",
            primary.name()
        );
        let Some(fallback) = fallback else {
            return Err(PublishError::SourcesUnavailable {
                primary: primary_error,
                fallback: None,
            });
        };
        warnings.push(format!(
            "{} unavailable, published from {}: {primary_error}",
            primary.name(),
            fallback.name()
        ));
        match read_source(fallback, warnings) {
            Ok(records) => Ok((fallback.name(), records)),
            Err(fallback_error) => Err(PublishError::SourcesUnavailable {
                primary: primary_error,
                fallback: Some(fallback_error),
            }),
        }
    }

    fn write_artifact<V: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &V,
        message: &str,
    ) -> PublishResult<()> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        let previous = current_version(self.api.as_ref(), path)?;
        self.api.put(path, &bytes, previous.as_ref(), message)?;
        Ok(())
    }

    fn prune_stale_chunks(&self, chunk_count: usize, warnings: &mut Vec<String>) -> Vec<String> {
        let entries = match self.api.list(&self.paths.pages_dir()) {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => return Vec::new(),
            Err(err) => {
                warnings.push(format!("could not list published chunks: {err}"));
                return Vec::new();
            }
        };

        let mut pruned = Vec::new();
        for entry in entries {
            let stale = chunk_index_from_path(&entry.path).is_some_and(|index| index > chunk_count);
            if !stale {
                continue;
            }
            match self
                .api
                .delete(&entry.path, &entry.version, "Prune stale snapshot chunk")
            {
                Ok(()) => pruned.push(entry.path),
                Err(err) => {
                    warn!(
                        "event=snapshot_prune module=snapshot status=warn path={} error={err}",
                        entry.path
                    );
                    warnings.push(format!("could not prune `{}`: {err}", entry.path));
                }
            }
        }
        pruned.sort();
        pruned
    }
}

fn read_source<T: Record>(
    source: &dyn SnapshotSource<T>,
    warnings: &mut Vec<String>,
) -> Result<Vec<T>, String> {
    let counted = source.count().map_err(|err| err.to_string())?;
    let records = source.load_all().map_err(|err| err.to_string())?;
    if counted != records.len() as u64 {
        warnings.push(format!(
            "{} count moved during publish: counted {counted}, loaded {}",
            source.name(),
            records.len()
        ));
    }
    Ok(records)
}

/// Reads a published snapshot back from the content store.
pub fn read_snapshot<T: DeserializeOwned>(
    api: &dyn ContentApi,
    paths: &EntityPaths,
) -> PublishResult<Snapshot<T>> {
    let meta: SnapshotMeta = read_artifact(api, &paths.meta())?;
    let mut chunks = Vec::with_capacity(meta.chunk_count);
    for index in 1..=meta.chunk_count {
        chunks.push(read_artifact::<Vec<T>>(api, &paths.chunk(index))?);
    }
    Ok(Snapshot { meta, chunks })
}

fn read_artifact<V: DeserializeOwned>(api: &dyn ContentApi, path: &str) -> PublishResult<V> {
    let file = api.get(path)?;
    serde_json::from_slice(&file.bytes).map_err(|err| PublishError::Parse {
        path: path.to_string(),
        message: err.to_string(),
    })
}
