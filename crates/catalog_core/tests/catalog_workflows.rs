use catalog_core::content::InMemoryContentStore;
use catalog_core::db::open_db_in_memory;
use catalog_core::mirror::mirror_repo::{MirrorRepository, SqliteMirrorRepository};
use catalog_core::model::record::CatalogItem;
use catalog_core::repo::dataset_repo::DatasetRepository;
use catalog_core::service::catalog_service::{
    CatalogService, MirrorUpdate, ServiceError, STEP_CANONICAL_WRITE, STEP_MIRROR_UPDATE,
    STEP_PUBLISH,
};
use catalog_core::service::reader::{parse_bundled, CatalogReader, ReadSource};
use catalog_core::service::readiness::{
    readiness_check, STEP_FIRST_CHUNK, STEP_ITEM_BLOB, STEP_META, STEP_MIRROR,
};
use catalog_core::snapshot::{PublishOptions, SnapshotPublisher};
use catalog_core::{DatasetCache, DatasetLayout};
use std::sync::Arc;

fn item(slug: &str, updated_at: &str) -> CatalogItem {
    let mut item = CatalogItem::new(slug, slug.to_uppercase());
    item.updated_at = Some(updated_at.to_string());
    item
}

struct Fixture {
    store: Arc<InMemoryContentStore>,
    dataset: DatasetRepository<CatalogItem>,
    publisher: SnapshotPublisher<CatalogItem>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryContentStore::new());
    let cache = DatasetCache::default();
    Fixture {
        dataset: DatasetRepository::new(store.clone(), cache.clone()),
        publisher: SnapshotPublisher::new(store.clone(), cache, None),
        store,
    }
}

#[test]
fn save_item_writes_canonical_mirror_and_snapshot() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    let service =
        CatalogService::new(&fx.dataset, &mirror).with_publisher(&fx.publisher, PublishOptions::default());

    let report = service
        .save_item(item("gimp", "2026-01-01T00:00:00Z"), true)
        .unwrap();

    assert!(report.all_ok(), "{report:?}");
    let names = report.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec![STEP_CANONICAL_WRITE, STEP_MIRROR_UPDATE, STEP_PUBLISH]);
    assert_eq!(fx.dataset.fetch_fresh().unwrap().value.len(), 1);
    assert!(mirror.get("gimp").unwrap().is_some());
    assert!(fx.store.contains("software/pages/latest/chunk-0001.json"));
}

#[test]
fn save_item_without_publish_skips_the_publish_step() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);

    let report = CatalogService::new(&fx.dataset, &mirror)
        .save_item(item("gimp", "2026-01-01"), false)
        .unwrap();

    assert_eq!(report.steps.len(), 2);
    assert!(report.step(STEP_PUBLISH).is_none());
    assert!(!fx.store.contains("software/pages/latest/meta.json"));
}

#[test]
fn failed_publish_is_reported_not_raised() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    fx.store.fail_writes_under("software/pages/");
    let service =
        CatalogService::new(&fx.dataset, &mirror).with_publisher(&fx.publisher, PublishOptions::default());

    let report = service.save_item(item("gimp", "2026-01-01"), true).unwrap();

    assert!(report.step(STEP_CANONICAL_WRITE).unwrap().ok);
    assert!(report.step(STEP_MIRROR_UPDATE).unwrap().ok);
    let publish = report.step(STEP_PUBLISH).unwrap();
    assert!(!publish.ok);
    assert!(publish.detail.as_deref().unwrap().contains("503"));
    assert!(!report.all_ok());
}

#[test]
fn canonical_failure_aborts_before_the_mirror() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    fx.dataset.fetch().unwrap();
    fx.store.fail_writes_under("software/index.json");

    let err = CatalogService::new(&fx.dataset, &mirror)
        .save_item(item("gimp", "2026-01-01"), false)
        .unwrap_err();

    assert!(matches!(err, ServiceError::Repo(_)), "got {err}");
    assert_eq!(mirror.count().unwrap(), 0);
}

#[test]
fn delete_item_removes_from_every_layer() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    let service =
        CatalogService::new(&fx.dataset, &mirror).with_publisher(&fx.publisher, PublishOptions::default());
    service.save_item(item("gimp", "2026-01-01"), false).unwrap();
    service.save_item(item("krita", "2026-02-01"), false).unwrap();

    let report = service.delete_item("gimp", true).unwrap();

    assert!(report.all_ok(), "{report:?}");
    assert!(mirror.get("gimp").unwrap().is_none());
    let keys = fx
        .dataset
        .fetch_fresh()
        .unwrap()
        .value
        .into_iter()
        .map(|item| item.slug)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["krita"]);
}

#[test]
fn full_sync_mode_repairs_unrelated_mirror_drift() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    mirror
        .upsert_batch(&[item("orphan", "2025-01-01")])
        .unwrap();

    let report = CatalogService::new(&fx.dataset, &mirror)
        .save_item(item("gimp", "2026-01-01"), false)
        .unwrap();

    let step = report.step(STEP_MIRROR_UPDATE).unwrap();
    assert!(step.ok);
    assert_eq!(step.detail.as_deref(), Some("1 rows, 1 orphans deleted"));
    assert!(mirror.get("orphan").unwrap().is_none());
}

#[test]
fn single_record_mode_touches_only_the_written_row() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    mirror
        .upsert_batch(&[item("orphan", "2025-01-01")])
        .unwrap();
    let service =
        CatalogService::new(&fx.dataset, &mirror).with_mirror_update(MirrorUpdate::SingleRecord);

    service.save_item(item("gimp", "2026-01-01"), false).unwrap();
    assert_eq!(mirror.count().unwrap(), 2);

    let report = service.delete_item("gimp", false).unwrap();
    assert!(report.step(STEP_MIRROR_UPDATE).unwrap().ok);
    assert!(mirror.get("gimp").unwrap().is_none());
    assert!(mirror.get("orphan").unwrap().is_some());
}

#[test]
fn mirror_failure_is_a_failed_step_after_the_canonical_write() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    conn.execute_batch("DROP TABLE catalog_items;").unwrap();

    let report = CatalogService::new(&fx.dataset, &mirror)
        .save_item(item("gimp", "2026-01-01"), false)
        .unwrap();

    assert!(report.step(STEP_CANONICAL_WRITE).unwrap().ok);
    assert!(!report.step(STEP_MIRROR_UPDATE).unwrap().ok);
    assert_eq!(fx.dataset.fetch_fresh().unwrap().value.len(), 1);
}

#[test]
fn delete_of_unknown_item_is_not_found() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);

    let err = CatalogService::new(&fx.dataset, &mirror)
        .delete_item("ghost", false)
        .unwrap_err();

    assert!(matches!(err, ServiceError::ItemNotFound(ref key) if key == "ghost"));
}

#[test]
fn reader_prefers_mirror_then_dataset_then_bundled() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    let service = CatalogService::new(&fx.dataset, &mirror);
    service.save_item(item("older", "2026-01-01"), false).unwrap();
    service.save_item(item("newer", "2026-02-01"), false).unwrap();
    let bundled = parse_bundled(br#"[{"slug": "bundled-app", "name": "Bundled"}]"#).unwrap();

    let reader = CatalogReader::new(bundled.clone())
        .with_mirror(&mirror)
        .with_dataset(&fx.dataset);
    let page = reader.page(1, 10).unwrap();
    assert_eq!(page.value.source, ReadSource::Mirror);
    assert_eq!(page.value.total, 2);
    assert_eq!(page.value.items[0].slug, "newer");
    assert!(page.warnings.is_empty());

    // Mirror table gone: dataset serves, with a warning.
    conn.execute_batch("DROP TABLE catalog_items;").unwrap();
    let page = reader.page(1, 1).unwrap();
    assert_eq!(page.value.source, ReadSource::Dataset);
    assert_eq!(page.value.items.len(), 1);
    assert_eq!(page.value.items[0].slug, "newer");
    assert_eq!(page.warnings.len(), 1);

    let found = reader.get("older");
    assert_eq!(found.value.source, ReadSource::Dataset);
    assert!(found.value.item.is_some());

    // Content store down as well: bundled copy serves.
    fx.dataset.cache().invalidate(fx.dataset.paths().root());
    fx.store.fail_reads_under("software/");
    let page = reader.page(1, 10).unwrap();
    assert_eq!(page.value.source, ReadSource::Bundled);
    assert_eq!(page.value.items, bundled);
    assert_eq!(page.warnings.len(), 2);
}

#[test]
fn readiness_reports_each_check() {
    let fx = fixture();
    let conn = open_db_in_memory().unwrap();
    let mirror = SqliteMirrorRepository::new(&conn);
    let paths = fx.publisher.paths().clone();

    let before = readiness_check(Some(&mirror), &*fx.store, &paths, None);
    assert!(before.step(STEP_MIRROR).unwrap().ok);
    assert!(!before.step(STEP_META).unwrap().ok);
    assert!(!before.step(STEP_FIRST_CHUNK).unwrap().ok);
    assert!(!before.all_ok());

    CatalogService::new(&fx.dataset, &mirror)
        .with_publisher(&fx.publisher, PublishOptions::default())
        .save_item(item("gimp", "2026-01-01"), true)
        .unwrap();

    let after = readiness_check(Some(&mirror), &*fx.store, &paths, None);
    assert!(after.all_ok(), "{after:?}");
    assert!(after.step(STEP_ITEM_BLOB).is_none());

    // Monolithic layout keeps no per-record blob.
    let with_blob = readiness_check(Some(&mirror), &*fx.store, &paths, Some("gimp"));
    assert!(!with_blob.step(STEP_ITEM_BLOB).unwrap().ok);

    let no_mirror = readiness_check(None, &*fx.store, &paths, None);
    assert!(!no_mirror.step(STEP_MIRROR).unwrap().ok);
}

#[test]
fn readiness_finds_per_record_blobs() {
    let store = Arc::new(InMemoryContentStore::new());
    let dataset = DatasetRepository::<CatalogItem>::new(store.clone(), DatasetCache::disabled())
        .with_layout(DatasetLayout::PerRecord {
            maintain_index: true,
        });
    dataset.upsert_latest(item("gimp", "2026-01-01")).unwrap();

    let report = readiness_check(None, &*store, dataset.paths(), Some("gimp"));

    let blob = report.step(STEP_ITEM_BLOB).unwrap();
    assert!(blob.ok);
    assert_eq!(blob.detail.as_deref(), Some("gimp"));
}
