//! Paginated read-only snapshots of a dataset.
//!
//! # Responsibility
//! - Order records deterministically for publication.
//! - Partition the ordered records into fixed-size chunks plus metadata.
//! - Publish and read back snapshot artifacts in the content store.
//!
//! # Invariants
//! - Ordering is recency descending, natural key ascending on ties;
//!   records without a recency timestamp sort last.
//! - Chunks are a contiguous, non-overlapping, ordered partition; only the
//!   final chunk may be shorter than `chunk_size`.
//! - `meta.total` equals the number of records the snapshot was built from.

use crate::model::record::Record;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub mod publisher;
pub mod source;

pub use publisher::{
    read_snapshot, PublishError, PublishOptions, PublishReport, PublishResult, SnapshotPublisher,
};
pub use source::{DatasetSource, MirrorSource, SnapshotSource, SourceError};

/// Snapshot metadata artifact (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// RFC 3339 UTC timestamp of generation.
    pub generated_at: String,
    /// Page size consumers use within one chunk.
    pub per_page: usize,
    pub chunk_size: usize,
    pub total: usize,
    pub chunk_count: usize,
}

/// A generated snapshot: metadata plus ordered chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub meta: SnapshotMeta,
    pub chunks: Vec<Vec<T>>,
}

impl<T: Clone> Snapshot<T> {
    /// Concatenates every chunk in order.
    pub fn records(&self) -> Vec<T> {
        self.chunks.iter().flatten().cloned().collect()
    }
}

/// Publication order: newest first, then natural key ascending.
pub fn compare_for_snapshot<T: Record>(a: &T, b: &T) -> Ordering {
    b.recency()
        .cmp(&a.recency())
        .then_with(|| a.key().cmp(b.key()))
}

/// Sorts `records` into publication order.
pub fn sort_for_snapshot<T: Record>(records: &mut [T]) {
    records.sort_by(compare_for_snapshot);
}

/// Builds a snapshot from records already in publication order.
///
/// `chunk_size` and `per_page` must be non-zero; callers validate.
pub fn build_snapshot<T: Clone>(
    records: &[T],
    per_page: usize,
    chunk_size: usize,
    generated_at: DateTime<Utc>,
) -> Snapshot<T> {
    let chunks = records
        .chunks(chunk_size.max(1))
        .map(<[T]>::to_vec)
        .collect::<Vec<_>>();
    Snapshot {
        meta: SnapshotMeta {
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            per_page,
            chunk_size,
            total: records.len(),
            chunk_count: chunks.len(),
        },
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_snapshot, sort_for_snapshot};
    use crate::model::record::{CatalogItem, Record};
    use chrono::{TimeZone, Utc};

    fn item(slug: &str, updated_at: Option<&str>) -> CatalogItem {
        let mut item = CatalogItem::new(slug, slug);
        item.updated_at = updated_at.map(str::to_string);
        item
    }

    #[test]
    fn sort_orders_by_recency_then_key() {
        let mut records = vec![
            item("zeta", Some("2026-01-01T00:00:00Z")),
            item("undated", None),
            item("alpha", Some("2026-01-01T00:00:00Z")),
            item("newest", Some("2026-05-01T00:00:00Z")),
        ];
        sort_for_snapshot(&mut records);
        let keys = records.iter().map(Record::key).collect::<Vec<_>>();
        assert_eq!(keys, vec!["newest", "alpha", "zeta", "undated"]);
    }

    #[test]
    fn sort_is_independent_of_input_order() {
        let a = item("a", Some("2026-01-01"));
        let b = item("b", Some("2026-01-01"));
        let mut first = vec![a.clone(), b.clone()];
        let mut second = vec![b, a];
        sort_for_snapshot(&mut first);
        sort_for_snapshot(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn build_snapshot_partitions_into_chunks() {
        let records = (0..2500).collect::<Vec<u32>>();
        let at = Utc.with_ymd_and_hms(2026, 2, 4, 10, 0, 0).unwrap();
        let snapshot = build_snapshot(&records, 20, 1000, at);

        assert_eq!(snapshot.meta.total, 2500);
        assert_eq!(snapshot.meta.chunk_count, 3);
        assert_eq!(snapshot.meta.per_page, 20);
        assert_eq!(snapshot.meta.generated_at, "2026-02-04T10:00:00.000Z");
        assert_eq!(snapshot.chunks[0].len(), 1000);
        assert_eq!(snapshot.chunks[2].len(), 500);
        assert_eq!(snapshot.records(), records);
    }

    #[test]
    fn build_snapshot_of_nothing_has_no_chunks() {
        let snapshot = build_snapshot::<u32>(&[], 20, 1000, Utc::now());
        assert_eq!(snapshot.meta.total, 0);
        assert_eq!(snapshot.meta.chunk_count, 0);
        assert!(snapshot.chunks.is_empty());
    }

    #[test]
    fn meta_serializes_camel_case() {
        let snapshot = build_snapshot(&[1u8, 2, 3], 2, 2, Utc::now());
        let json = serde_json::to_value(&snapshot.meta).unwrap();
        assert_eq!(json["perPage"], 2);
        assert_eq!(json["chunkSize"], 2);
        assert_eq!(json["chunkCount"], 2);
        assert_eq!(json["total"], 3);
        assert!(json["generatedAt"].is_string());
    }
}
