use catalog_core::content::InMemoryContentStore;
use catalog_core::db::open_db_in_memory;
use catalog_core::mirror::mirror_repo::{
    MirrorError, MirrorRepository, MirrorResult, SqliteMirrorRepository,
};
use catalog_core::mirror::reconciler::MirrorReconciler;
use catalog_core::model::record::{CatalogItem, Collection, Record};
use catalog_core::repo::dataset_repo::DatasetRepository;
use catalog_core::snapshot::{
    read_snapshot, sort_for_snapshot, DatasetSource, MirrorSource, PublishError, PublishOptions,
    SnapshotPublisher,
};
use catalog_core::DatasetCache;
use std::sync::Arc;
use std::time::Duration;

fn item(n: usize) -> CatalogItem {
    let mut item = CatalogItem::new(format!("app-{n:04}"), format!("App {n}"));
    // Many records share a timestamp so the key tie-break matters.
    item.updated_at = Some(format!("2026-03-{:02}T12:00:00Z", n % 7 + 1));
    item
}

fn seed(store: &InMemoryContentStore, items: &[CatalogItem]) {
    store.seed("software/index.json", serde_json::to_vec(items).unwrap());
}

fn options(chunk_size: usize) -> PublishOptions {
    PublishOptions {
        page_size: 20,
        chunk_size,
    }
}

fn slugs(items: &[CatalogItem]) -> Vec<String> {
    items.iter().map(|item| item.key().to_string()).collect()
}

/// Mirror whose every call fails.
struct UnreachableMirror;

fn down() -> MirrorError {
    MirrorError::InvalidData("mirror unreachable".to_string())
}

impl MirrorRepository for UnreachableMirror {
    fn count(&self) -> MirrorResult<u64> {
        Err(down())
    }
    fn upsert_batch(&self, _items: &[CatalogItem]) -> MirrorResult<usize> {
        Err(down())
    }
    fn list_keys(&self) -> MirrorResult<Vec<String>> {
        Err(down())
    }
    fn delete_keys(&self, _keys: &[String]) -> MirrorResult<usize> {
        Err(down())
    }
    fn list_sorted(&self, _offset: u64, _limit: Option<u64>) -> MirrorResult<Vec<CatalogItem>> {
        Err(down())
    }
    fn get(&self, _slug: &str) -> MirrorResult<Option<CatalogItem>> {
        Err(down())
    }
    fn delete_one(&self, _slug: &str) -> MirrorResult<bool> {
        Err(down())
    }
}

#[test]
fn publish_from_mirror_chunks_in_recency_order() {
    let store = Arc::new(InMemoryContentStore::new());
    let items = (0..2500).map(item).collect::<Vec<_>>();
    seed(&store, &items);
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    MirrorReconciler::new(&dataset, &mirror).sync_all().unwrap();
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);

    let outcome = publisher
        .publish(
            &MirrorSource::new(&mirror),
            Some(&DatasetSource::new(&dataset)),
            options(1000),
        )
        .unwrap();

    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    let report = outcome.value;
    assert_eq!(report.source, "mirror");
    assert_eq!(report.meta.total, 2500);
    assert_eq!(report.meta.chunk_count, 3);
    assert_eq!(report.meta.per_page, 20);
    assert_eq!(
        report.chunk_paths,
        vec![
            "software/pages/latest/chunk-0001.json",
            "software/pages/latest/chunk-0002.json",
            "software/pages/latest/chunk-0003.json",
        ]
    );

    let published = read_snapshot::<CatalogItem>(&*store, publisher.paths()).unwrap();
    let sizes = published.chunks.iter().map(Vec::len).collect::<Vec<_>>();
    assert_eq!(sizes, vec![1000, 1000, 500]);

    let mut expected = items;
    sort_for_snapshot(&mut expected);
    assert_eq!(slugs(&published.records()), slugs(&expected));
    assert_eq!(published.records()[0].slug, "app-0006");
    assert_eq!(published.records()[1].slug, "app-0013");
}

#[test]
fn unreachable_mirror_falls_back_to_dataset_with_warning() {
    let store = Arc::new(InMemoryContentStore::new());
    seed(&store, &(0..5).map(item).collect::<Vec<_>>());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);

    let outcome = publisher
        .publish(
            &MirrorSource::new(&UnreachableMirror),
            Some(&DatasetSource::new(&dataset)),
            options(2),
        )
        .unwrap();

    assert_eq!(outcome.value.source, "dataset");
    assert_eq!(outcome.value.meta.total, 5);
    assert_eq!(outcome.value.meta.chunk_count, 3);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("mirror unavailable"));
}

#[test]
fn no_readable_source_is_an_error() {
    let store = Arc::new(InMemoryContentStore::new());
    store.fail_reads_under("software/");
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);

    let err = publisher
        .publish(
            &MirrorSource::new(&UnreachableMirror),
            Some(&DatasetSource::new(&dataset)),
            PublishOptions::default(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::SourcesUnavailable {
            fallback: Some(_),
            ..
        }
    ));
    assert_eq!(store.write_count(), 0);
}

#[test]
fn smaller_snapshot_prunes_stale_chunks() {
    let store = Arc::new(InMemoryContentStore::new());
    seed(&store, &(0..25).map(item).collect::<Vec<_>>());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);
    let source = DatasetSource::new(&dataset);

    publisher.publish(&source, None, options(10)).unwrap();
    assert!(store.contains("software/pages/latest/chunk-0003.json"));

    seed(&store, &(0..12).map(item).collect::<Vec<_>>());
    let outcome = publisher.publish(&source, None, options(10)).unwrap();

    assert_eq!(outcome.value.meta.chunk_count, 2);
    assert_eq!(
        outcome.value.pruned_paths,
        vec!["software/pages/latest/chunk-0003.json"]
    );
    assert!(!store.contains("software/pages/latest/chunk-0003.json"));
    assert!(store.contains("software/pages/latest/chunk-0002.json"));
    assert!(outcome.warnings.is_empty());
}

#[test]
fn prune_failures_are_warnings() {
    let store = Arc::new(InMemoryContentStore::new());
    seed(&store, &(0..25).map(item).collect::<Vec<_>>());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);
    let source = DatasetSource::new(&dataset);
    publisher.publish(&source, None, options(10)).unwrap();

    seed(&store, &(0..5).map(item).collect::<Vec<_>>());
    store.fail_writes_under("software/pages/latest/chunk-0003");
    let outcome = publisher.publish(&source, None, options(10)).unwrap();

    assert_eq!(outcome.value.meta.chunk_count, 1);
    assert_eq!(
        outcome.value.pruned_paths,
        vec!["software/pages/latest/chunk-0002.json"]
    );
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("chunk-0003"));
}

#[test]
fn meta_is_not_written_when_a_chunk_write_fails() {
    let store = Arc::new(InMemoryContentStore::new());
    seed(&store, &(0..30).map(item).collect::<Vec<_>>());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);
    store.fail_writes_under("software/pages/latest/chunk-0002");

    let err = publisher
        .publish(&DatasetSource::new(&dataset), None, options(10))
        .unwrap_err();

    assert!(matches!(err, PublishError::Content(_)), "got {err}");
    assert!(store.contains("software/pages/latest/chunk-0001.json"));
    assert!(!store.contains("software/pages/latest/meta.json"));
}

#[test]
fn empty_dataset_publishes_meta_without_chunks() {
    let store = Arc::new(InMemoryContentStore::new());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);

    let outcome = publisher
        .publish(&DatasetSource::new(&dataset), None, PublishOptions::default())
        .unwrap();

    assert_eq!(outcome.value.meta.total, 0);
    assert_eq!(outcome.value.meta.chunk_count, 0);
    assert!(outcome.value.chunk_paths.is_empty());
    assert!(store.contains("software/pages/latest/meta.json"));
    assert!(!store.contains("software/pages/latest/chunk-0001.json"));
}

#[test]
fn zero_chunk_size_is_rejected() {
    let store = Arc::new(InMemoryContentStore::new());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), DatasetCache::disabled(), None);

    let err = publisher
        .publish(&DatasetSource::new(&dataset), None, options(0))
        .unwrap_err();

    assert!(matches!(err, PublishError::InvalidOptions(_)));
    assert_eq!(store.write_count(), 0);
}

#[test]
fn publish_invalidates_the_shared_cache() {
    let store = Arc::new(InMemoryContentStore::new());
    seed(&store, &[item(1)]);
    let cache = DatasetCache::new(Duration::from_secs(300));
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), cache.clone());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), cache, None);
    assert_eq!(dataset.fetch().unwrap().value.len(), 1);

    seed(&store, &[item(1), item(2)]);
    assert_eq!(dataset.fetch().unwrap().value.len(), 1);

    publisher
        .publish(&DatasetSource::new(&dataset), None, PublishOptions::default())
        .unwrap();

    assert_eq!(dataset.fetch().unwrap().value.len(), 2);
}

#[test]
fn stale_cache_does_not_skew_dataset_count() {
    let store = Arc::new(InMemoryContentStore::new());
    seed(&store, &[item(1)]);
    let cache = DatasetCache::new(Duration::from_secs(300));
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), cache.clone());
    let publisher = SnapshotPublisher::<CatalogItem>::new(store.clone(), cache, None);
    dataset.fetch().unwrap();

    // Written by another process; the local cache still holds one record.
    seed(&store, &[item(1), item(2)]);

    let outcome = publisher
        .publish(&DatasetSource::new(&dataset), None, PublishOptions::default())
        .unwrap();

    assert_eq!(outcome.value.meta.total, 2);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
}

#[test]
fn any_record_type_can_be_published_under_a_data_root() {
    let store = Arc::new(InMemoryContentStore::new());
    let mut newer = Collection {
        slug: "editors".to_string(),
        title: "Editors".to_string(),
        description: None,
        item_slugs: vec!["gimp".to_string()],
        updated_at: Some("2026-04-01".to_string()),
        extra: Default::default(),
    };
    let older = Collection {
        slug: "audio".to_string(),
        updated_at: Some("2026-01-01".to_string()),
        ..newer.clone()
    };
    newer.item_slugs.push("krita".to_string());
    store.seed(
        "public/data/collections/index.json",
        serde_json::to_vec(&vec![older, newer]).unwrap(),
    );
    let dataset = DatasetRepository::<Collection>::new(store.clone(), DatasetCache::disabled())
        .with_data_root(Some("public/data"));
    let publisher =
        SnapshotPublisher::<Collection>::new(store.clone(), DatasetCache::disabled(), Some("public/data"));

    publisher
        .publish(&DatasetSource::new(&dataset), None, PublishOptions::default())
        .unwrap();

    let published = read_snapshot::<Collection>(&*store, publisher.paths()).unwrap();
    let order = published
        .records()
        .into_iter()
        .map(|collection| collection.slug)
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["editors", "audio"]);
}
