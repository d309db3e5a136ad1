//! Consumer read path with layered fallbacks.
//!
//! Reads prefer the relational mirror, fall back to the canonical dataset
//! when the mirror fails, and finally serve a bundled static copy. Every
//! skipped layer leaves a warning on the returned outcome.

use crate::mirror::mirror_repo::MirrorRepository;
use crate::model::outcome::Outcome;
use crate::model::record::{CatalogItem, Record};
use crate::repo::dataset_repo::DatasetRepository;
use crate::snapshot::sort_for_snapshot;
use log::warn;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Layer that served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Mirror,
    Dataset,
    Bundled,
}

/// Rejected read arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    InvalidPage { page: usize, per_page: usize },
}

impl Display for ReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPage { page, per_page } => write!(
                f,
                "invalid page request page={page} per_page={per_page}; both must be at least 1"
            ),
        }
    }
}

impl Error for ReadError {}

/// One page of catalog items in publication order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPage {
    pub items: Vec<CatalogItem>,
    /// Total items available from the serving layer.
    pub total: u64,
    pub page: usize,
    pub per_page: usize,
    pub source: ReadSource,
}

/// A single-item lookup result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadItem {
    pub item: Option<CatalogItem>,
    pub source: ReadSource,
}

/// Read-only view over every catalog layer.
pub struct CatalogReader<'a> {
    mirror: Option<&'a dyn MirrorRepository>,
    dataset: Option<&'a DatasetRepository<CatalogItem>>,
    bundled: Vec<CatalogItem>,
}

impl<'a> CatalogReader<'a> {
    /// A reader that serves only `bundled` until layers are attached.
    pub fn new(mut bundled: Vec<CatalogItem>) -> Self {
        sort_for_snapshot(&mut bundled);
        Self {
            mirror: None,
            dataset: None,
            bundled,
        }
    }

    pub fn with_mirror(mut self, mirror: &'a dyn MirrorRepository) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_dataset(mut self, dataset: &'a DatasetRepository<CatalogItem>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Returns the 1-based `page` of `per_page` items.
    pub fn page(&self, page: usize, per_page: usize) -> Result<Outcome<ReadPage>, ReadError> {
        if page == 0 || per_page == 0 {
            return Err(ReadError::InvalidPage { page, per_page });
        }
        let offset = (page - 1).saturating_mul(per_page);
        let mut warnings = Vec::new();

        if let Some(mirror) = self.mirror {
            let read = mirror.count().and_then(|total| {
                mirror
                    .list_sorted(offset as u64, Some(per_page as u64))
                    .map(|items| (total, items))
            });
            match read {
                Ok((total, items)) => {
                    return Ok(Outcome::with_warnings(
                        ReadPage {
                            items,
                            total,
                            page,
                            per_page,
                            source: ReadSource::Mirror,
                        },
                        warnings,
                    ))
                }
                Err(err) => skipped(&mut warnings, ReadSource::Mirror, &err),
            }
        }

        if let Some(dataset) = self.dataset {
            match dataset.fetch() {
                Ok(current) => {
                    let mut items = current.value;
                    sort_for_snapshot(&mut items);
                    return Ok(Outcome::with_warnings(
                        slice_page(&items, page, per_page, ReadSource::Dataset),
                        warnings,
                    ));
                }
                Err(err) => skipped(&mut warnings, ReadSource::Dataset, &err),
            }
        }

        Ok(Outcome::with_warnings(
            slice_page(&self.bundled, page, per_page, ReadSource::Bundled),
            warnings,
        ))
    }

    /// Looks up one item by natural key.
    pub fn get(&self, key: &str) -> Outcome<ReadItem> {
        let mut warnings = Vec::new();

        if let Some(mirror) = self.mirror {
            match mirror.get(key) {
                Ok(item) => {
                    return Outcome::with_warnings(
                        ReadItem {
                            item,
                            source: ReadSource::Mirror,
                        },
                        warnings,
                    )
                }
                Err(err) => skipped(&mut warnings, ReadSource::Mirror, &err),
            }
        }

        if let Some(dataset) = self.dataset {
            match dataset.find(key) {
                Ok(item) => {
                    return Outcome::with_warnings(
                        ReadItem {
                            item,
                            source: ReadSource::Dataset,
                        },
                        warnings,
                    )
                }
                Err(err) => skipped(&mut warnings, ReadSource::Dataset, &err),
            }
        }

        let item = self.bundled.iter().find(|item| item.key() == key).cloned();
        Outcome::with_warnings(
            ReadItem {
                item,
                source: ReadSource::Bundled,
            },
            warnings,
        )
    }
}

/// Parses a bundled static catalog copy.
pub fn parse_bundled(bytes: &[u8]) -> Result<Vec<CatalogItem>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

fn slice_page(items: &[CatalogItem], page: usize, per_page: usize, source: ReadSource) -> ReadPage {
    let start = (page - 1).saturating_mul(per_page).min(items.len());
    let end = start.saturating_add(per_page).min(items.len());
    ReadPage {
        items: items[start..end].to_vec(),
        total: items.len() as u64,
        page,
        per_page,
        source,
    }
}

fn skipped(warnings: &mut Vec<String>, source: ReadSource, err: &dyn Error) {
    warn!("event=catalog_read module=service status=warn source={source:?} error={err}");
    warnings.push(format!("{source:?} read failed: {err}"));
}

#[cfg(test)]
mod tests {
    use super::{slice_page, CatalogReader, ReadSource};
    use crate::model::record::CatalogItem;

    fn items(count: usize) -> Vec<CatalogItem> {
        (0..count)
            .map(|n| CatalogItem::new(format!("item-{n:02}"), format!("Item {n}")))
            .collect()
    }

    #[test]
    fn slice_page_clamps_past_the_end() {
        let all = items(5);
        let page = slice_page(&all, 2, 3, ReadSource::Bundled);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);

        let empty = slice_page(&all, 9, 3, ReadSource::Bundled);
        assert!(empty.items.is_empty());
    }

    #[test]
    fn bundled_only_reader_serves_without_warnings() {
        let reader = CatalogReader::new(items(3));
        let page = reader.page(1, 2).unwrap();
        assert_eq!(page.value.source, ReadSource::Bundled);
        assert_eq!(page.value.items[0].slug, "item-00");
        assert!(!page.is_degraded());

        let hit = reader.get("item-02");
        assert_eq!(hit.value.item.map(|item| item.slug).as_deref(), Some("item-02"));
        assert!(reader.get("missing").value.item.is_none());
    }

    #[test]
    fn zero_page_is_rejected() {
        let reader = CatalogReader::new(Vec::new());
        assert!(reader.page(0, 10).is_err());
        assert!(reader.page(1, 0).is_err());
    }
}
