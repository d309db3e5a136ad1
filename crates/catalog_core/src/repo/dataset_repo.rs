//! Dataset repository over the content API.
//!
//! # Responsibility
//! - Fetch, upsert and remove records of one entity type.
//! - Bootstrap an empty dataset the first time an entity is read.
//! - Keep the optional per-record blob layout consistent with the index.
//!
//! # Invariants
//! - Natural keys are unique within a dataset; a blob violating this is a
//!   parse failure, never silently deduplicated.
//! - `remove` of an absent key performs no write.
//! - A stale version token yields `RepoError::Conflict`; the caller decides
//!   whether to refetch and reapply.
//! - Per-record layout without an index trades single-file atomicity for
//!   size: its version token is a digest of the item listing, checked
//!   immediately before each item write.

use crate::cache::DatasetCache;
use crate::content::{current_version, ContentApi, ContentEntry, ContentError};
use crate::model::record::{validate_key, KeyValidationError, Record};
use crate::model::versioned::{VersionToken, Versioned};
use crate::repo::paths::{key_from_item_path, EntityPaths};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const LISTING_VERSION_PREFIX: &str = "listing-";

pub type RepoResult<T> = Result<T, RepoError>;

/// Dataset repository failure.
#[derive(Debug)]
pub enum RepoError {
    /// No record with this natural key.
    NotFound { key: String },
    /// The dataset changed since it was read.
    Conflict { path: String },
    /// Stored blob is not a valid dataset; fatal, no partial recovery.
    Parse { path: String, message: String },
    InvalidRecord(KeyValidationError),
    Serialize(serde_json::Error),
    Content(ContentError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "record not found: {key}"),
            Self::Conflict { path } => {
                write!(f, "dataset `{path}` changed since it was read; refetch and reapply")
            }
            Self::Parse { path, message } => write!(f, "invalid dataset `{path}`: {message}"),
            Self::InvalidRecord(err) => write!(f, "invalid record: {err}"),
            Self::Serialize(err) => write!(f, "failed to serialize dataset: {err}"),
            Self::Content(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidRecord(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::Content(err) => Some(err),
            Self::NotFound { .. } | Self::Conflict { .. } | Self::Parse { .. } => None,
        }
    }
}

impl From<ContentError> for RepoError {
    fn from(value: ContentError) -> Self {
        match value {
            ContentError::Conflict { path } => Self::Conflict { path },
            other => Self::Content(other),
        }
    }
}

impl From<KeyValidationError> for RepoError {
    fn from(value: KeyValidationError) -> Self {
        Self::InvalidRecord(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// How a dataset is laid out in the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetLayout {
    /// One JSON array blob at `<entity>/index.json`.
    #[default]
    Monolithic,
    /// One blob per record at `<entity>/items/<key>.json`, optionally
    /// alongside the monolithic index.
    PerRecord { maintain_index: bool },
}

/// Whether an upsert added a record or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Replaced,
}

/// Replaces the record sharing `record`'s key, or appends it.
pub fn upsert_record<T: Record>(mut items: Vec<T>, record: T) -> (Vec<T>, UpsertKind) {
    match items.iter().position(|item| item.key() == record.key()) {
        Some(index) => {
            items[index] = record;
            (items, UpsertKind::Replaced)
        }
        None => {
            items.push(record);
            (items, UpsertKind::Inserted)
        }
    }
}

/// Returns `items` without `key`, or `None` when `key` is absent.
pub fn remove_record<T: Record>(items: &[T], key: &str) -> Option<Vec<T>> {
    if !items.iter().any(|item| item.key() == key) {
        return None;
    }
    Some(
        items
            .iter()
            .filter(|item| item.key() != key)
            .cloned()
            .collect(),
    )
}

/// Repository for one entity's canonical dataset.
pub struct DatasetRepository<T: Record> {
    api: Arc<dyn ContentApi>,
    cache: DatasetCache,
    paths: EntityPaths,
    layout: DatasetLayout,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> DatasetRepository<T> {
    pub fn new(api: Arc<dyn ContentApi>, cache: DatasetCache) -> Self {
        Self {
            api,
            cache,
            paths: EntityPaths::for_record::<T>(None),
            layout: DatasetLayout::Monolithic,
            _record: PhantomData,
        }
    }

    pub fn with_data_root(mut self, data_root: Option<&str>) -> Self {
        self.paths = EntityPaths::for_record::<T>(data_root);
        self
    }

    pub fn with_layout(mut self, layout: DatasetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn paths(&self) -> &EntityPaths {
        &self.paths
    }

    pub fn layout(&self) -> DatasetLayout {
        self.layout
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    /// Returns the dataset, served from cache when fresh.
    pub fn fetch(&self) -> RepoResult<Versioned<Vec<T>>> {
        if let Some(hit) = self.cache.get::<T>(self.paths.root()) {
            return Ok(hit);
        }
        self.fetch_fresh()
    }

    /// Reads the dataset from the content store, bypassing the cache.
    ///
    /// A missing dataset is created as an empty array and returned as such.
    pub fn fetch_fresh(&self) -> RepoResult<Versioned<Vec<T>>> {
        let started_at = Instant::now();
        let dataset = match self.layout {
            DatasetLayout::Monolithic
            | DatasetLayout::PerRecord {
                maintain_index: true,
            } => self.fetch_index()?,
            DatasetLayout::PerRecord {
                maintain_index: false,
            } => self.fetch_items()?,
        };
        debug!(
            "event=dataset_fetch module=repo status=ok entity={} count={} duration_ms={}",
            T::ENTITY,
            dataset.value.len(),
            started_at.elapsed().as_millis()
        );
        self.cache.insert(self.paths.root(), &dataset);
        Ok(dataset)
    }

    /// Looks up one record by natural key.
    pub fn find(&self, key: &str) -> RepoResult<Option<T>> {
        if let DatasetLayout::PerRecord { .. } = self.layout {
            let path = self.paths.item(key);
            return match self.api.get(&path) {
                Ok(file) => Ok(Some(parse_record(&path, &file.bytes)?)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err.into()),
            };
        }
        let dataset = self.fetch()?;
        Ok(dataset.value.into_iter().find(|item| item.key() == key))
    }

    /// Inserts or replaces `record` in the dataset read at `current.version`.
    pub fn upsert(&self, current: Versioned<Vec<T>>, record: T) -> RepoResult<Versioned<Vec<T>>> {
        validate_key(record.key())?;
        let key = record.key().to_string();
        let (items, kind) = upsert_record(current.value, record.clone());
        let message = format!("Upsert {}/{key}", T::ENTITY);

        let version = match self.layout {
            DatasetLayout::Monolithic => self.write_index(&items, &current.version, &message)?,
            DatasetLayout::PerRecord {
                maintain_index: true,
            } => {
                let version = self.write_index(&items, &current.version, &message)?;
                let item_path = self.paths.item(&key);
                let item_version = current_version(self.api.as_ref(), &item_path)?;
                self.api.put(
                    &item_path,
                    &to_json_bytes(&record)?,
                    item_version.as_ref(),
                    &message,
                )?;
                version
            }
            DatasetLayout::PerRecord {
                maintain_index: false,
            } => {
                let mut listing = self.checked_listing(&current.version)?;
                let item_path = self.paths.item(&key);
                let item_version = self.api.put(
                    &item_path,
                    &to_json_bytes(&record)?,
                    listing.get(&item_path),
                    &message,
                )?;
                listing.insert(item_path, item_version);
                listing_version(&listing)
            }
        };

        self.cache.invalidate(self.paths.root());
        info!(
            "event=dataset_upsert module=repo status=ok entity={} key={key} kind={kind:?} count={}",
            T::ENTITY,
            items.len()
        );
        Ok(Versioned::new(items, version))
    }

    /// Removes `key` from the dataset read at `current.version`.
    ///
    /// Fails with `RepoError::NotFound` and writes nothing when `key` is absent.
    pub fn remove(&self, current: Versioned<Vec<T>>, key: &str) -> RepoResult<Versioned<Vec<T>>> {
        validate_key(key)?;
        let Some(items) = remove_record(&current.value, key) else {
            return Err(RepoError::NotFound {
                key: key.to_string(),
            });
        };
        let message = format!("Remove {}/{key}", T::ENTITY);
        let item_path = self.paths.item(key);

        let version = match self.layout {
            DatasetLayout::Monolithic => self.write_index(&items, &current.version, &message)?,
            DatasetLayout::PerRecord {
                maintain_index: true,
            } => {
                let version = self.write_index(&items, &current.version, &message)?;
                match current_version(self.api.as_ref(), &item_path)? {
                    Some(item_version) => self.api.delete(&item_path, &item_version, &message)?,
                    None => warn!(
                        "event=dataset_remove module=repo status=warn entity={} key={key} reason=item_blob_missing",
                        T::ENTITY
                    ),
                }
                version
            }
            DatasetLayout::PerRecord {
                maintain_index: false,
            } => {
                let mut listing = self.checked_listing(&current.version)?;
                let item_version =
                    listing
                        .remove(&item_path)
                        .ok_or_else(|| RepoError::Conflict {
                            path: item_path.clone(),
                        })?;
                self.api.delete(&item_path, &item_version, &message)?;
                listing_version(&listing)
            }
        };

        self.cache.invalidate(self.paths.root());
        info!(
            "event=dataset_remove module=repo status=ok entity={} key={key} count={}",
            T::ENTITY,
            items.len()
        );
        Ok(Versioned::new(items, version))
    }

    /// Fetches the latest dataset and upserts `record` into it.
    ///
    /// One read-modify-write cycle; a concurrent writer still yields `Conflict`.
    pub fn upsert_latest(&self, record: T) -> RepoResult<Versioned<Vec<T>>> {
        let current = self.fetch_fresh()?;
        self.upsert(current, record)
    }

    /// Fetches the latest dataset and removes `key` from it.
    pub fn remove_latest(&self, key: &str) -> RepoResult<Versioned<Vec<T>>> {
        let current = self.fetch_fresh()?;
        self.remove(current, key)
    }

    fn fetch_index(&self) -> RepoResult<Versioned<Vec<T>>> {
        let path = self.paths.index();
        match self.api.get(&path) {
            Ok(file) => Ok(Versioned::new(
                parse_dataset(&path, &file.bytes)?,
                file.version,
            )),
            Err(err) if err.is_not_found() => self.bootstrap_index(&path),
            Err(err) => Err(err.into()),
        }
    }

    fn bootstrap_index(&self, path: &str) -> RepoResult<Versioned<Vec<T>>> {
        let message = format!("Initialize {} dataset", T::ENTITY);
        match self.api.put(path, b"[]\n", None, &message) {
            Ok(version) => {
                info!(
                    "event=dataset_bootstrap module=repo status=ok entity={} path={path}",
                    T::ENTITY
                );
                Ok(Versioned::new(Vec::new(), version))
            }
            // Another writer created it first; read theirs.
            Err(err) if err.is_conflict() => {
                let file = self.api.get(path)?;
                Ok(Versioned::new(
                    parse_dataset(path, &file.bytes)?,
                    file.version,
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn fetch_items(&self) -> RepoResult<Versioned<Vec<T>>> {
        let listing = self.listing()?;
        let mut items = Vec::with_capacity(listing.len());
        for path in listing.keys() {
            let file = self.api.get(path)?;
            let record: T = parse_record(path, &file.bytes)?;
            if key_from_item_path(path) != Some(record.key()) {
                return Err(RepoError::Parse {
                    path: path.clone(),
                    message: format!("blob holds record `{}`", record.key()),
                });
            }
            items.push(record);
        }
        Ok(Versioned::new(items, listing_version(&listing)))
    }

    fn listing(&self) -> RepoResult<BTreeMap<String, VersionToken>> {
        let entries = match self.api.list(&self.paths.items_dir()) {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(entries
            .into_iter()
            .filter(|entry| entry.path.ends_with(".json"))
            .map(|ContentEntry { path, version }| (path, version))
            .collect())
    }

    fn checked_listing(&self, expected: &VersionToken) -> RepoResult<BTreeMap<String, VersionToken>> {
        let listing = self.listing()?;
        if &listing_version(&listing) != expected {
            return Err(RepoError::Conflict {
                path: self.paths.items_dir(),
            });
        }
        Ok(listing)
    }

    fn write_index(
        &self,
        items: &[T],
        version: &VersionToken,
        message: &str,
    ) -> RepoResult<VersionToken> {
        let path = self.paths.index();
        let bytes = to_json_bytes(&items)?;
        match self.api.put(&path, &bytes, Some(version), message) {
            Ok(version) => Ok(version),
            Err(err) => {
                warn!(
                    "event=dataset_write module=repo status=error entity={} path={path} conflict={}",
                    T::ENTITY,
                    err.is_conflict()
                );
                Err(err.into())
            }
        }
    }
}

fn parse_dataset<T: Record>(path: &str, bytes: &[u8]) -> RepoResult<Vec<T>> {
    let items: Vec<T> = serde_json::from_slice(bytes).map_err(|err| RepoError::Parse {
        path: path.to_string(),
        message: err.to_string(),
    })?;
    if let Some(err) = items.iter().find_map(|item| validate_key(item.key()).err()) {
        return Err(RepoError::Parse {
            path: path.to_string(),
            message: err.to_string(),
        });
    }
    if let Some(key) = first_duplicate_key(&items) {
        return Err(RepoError::Parse {
            path: path.to_string(),
            message: format!("duplicate natural key `{key}`"),
        });
    }
    Ok(items)
}

fn first_duplicate_key<T: Record>(items: &[T]) -> Option<String> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .find(|item| !seen.insert(item.key()))
        .map(|item| item.key().to_string())
}

fn parse_record<T: Record>(path: &str, bytes: &[u8]) -> RepoResult<T> {
    let record: T = serde_json::from_slice(bytes).map_err(|err| RepoError::Parse {
        path: path.to_string(),
        message: err.to_string(),
    })?;
    validate_key(record.key()).map_err(|err| RepoError::Parse {
        path: path.to_string(),
        message: err.to_string(),
    })?;
    Ok(record)
}

fn to_json_bytes<V: serde::Serialize + ?Sized>(value: &V) -> RepoResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Digest over `(path, version)` pairs of an item listing.
fn listing_version(listing: &BTreeMap<String, VersionToken>) -> VersionToken {
    let mut material = String::new();
    for (path, version) in listing {
        material.push_str(path);
        material.push('@');
        material.push_str(version.as_str());
        material.push('\n');
    }
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, material.as_bytes());
    VersionToken::new(format!("{LISTING_VERSION_PREFIX}{}", digest.simple()))
}
