//! Record sources a snapshot can be generated from.

use crate::mirror::mirror_repo::{MirrorError, MirrorRepository};
use crate::model::record::{CatalogItem, Record};
use crate::repo::dataset_repo::{DatasetRepository, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rows read per ranged mirror query.
const MIRROR_READ_PAGE: u64 = 1000;

/// Failure reading from a snapshot source.
#[derive(Debug)]
pub enum SourceError {
    Mirror(MirrorError),
    Dataset(RepoError),
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mirror(err) => write!(f, "mirror read failed: {err}"),
            Self::Dataset(err) => write!(f, "dataset read failed: {err}"),
        }
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mirror(err) => Some(err),
            Self::Dataset(err) => Some(err),
        }
    }
}

impl From<MirrorError> for SourceError {
    fn from(value: MirrorError) -> Self {
        Self::Mirror(value)
    }
}

impl From<RepoError> for SourceError {
    fn from(value: RepoError) -> Self {
        Self::Dataset(value)
    }
}

/// Anything that can count and enumerate records for publication.
pub trait SnapshotSource<T: Record> {
    /// Short label used in logs and reports.
    fn name(&self) -> &'static str;
    fn count(&self) -> Result<u64, SourceError>;
    /// Every record, in any order.
    fn load_all(&self) -> Result<Vec<T>, SourceError>;
}

/// Reads catalog items from the relational mirror in ranged pages.
pub struct MirrorSource<'a, M: MirrorRepository> {
    mirror: &'a M,
}

impl<'a, M: MirrorRepository> MirrorSource<'a, M> {
    pub fn new(mirror: &'a M) -> Self {
        Self { mirror }
    }
}

impl<M: MirrorRepository> SnapshotSource<CatalogItem> for MirrorSource<'_, M> {
    fn name(&self) -> &'static str {
        "mirror"
    }

    fn count(&self) -> Result<u64, SourceError> {
        Ok(self.mirror.count()?)
    }

    fn load_all(&self) -> Result<Vec<CatalogItem>, SourceError> {
        let mut items = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self.mirror.list_sorted(offset, Some(MIRROR_READ_PAGE))?;
            let fetched = page.len() as u64;
            items.extend(page);
            if fetched < MIRROR_READ_PAGE {
                return Ok(items);
            }
            offset += fetched;
        }
    }
}

/// Reads the canonical dataset directly, bypassing the cache.
pub struct DatasetSource<'a, T: Record> {
    repo: &'a DatasetRepository<T>,
}

impl<'a, T: Record> DatasetSource<'a, T> {
    pub fn new(repo: &'a DatasetRepository<T>) -> Self {
        Self { repo }
    }
}

impl<T: Record> SnapshotSource<T> for DatasetSource<'_, T> {
    fn name(&self) -> &'static str {
        "dataset"
    }

    fn count(&self) -> Result<u64, SourceError> {
        Ok(self.repo.fetch_fresh()?.value.len() as u64)
    }

    fn load_all(&self) -> Result<Vec<T>, SourceError> {
        Ok(self.repo.fetch_fresh()?.value)
    }
}
