//! Deployment readiness probe.
//!
//! Checks that the mirror answers and that the latest snapshot artifacts
//! exist. Each check is one step of the returned report; nothing here
//! fails fast.

use crate::content::ContentApi;
use crate::mirror::mirror_repo::MirrorRepository;
use crate::model::outcome::{StepResult, WorkflowReport};
use crate::repo::paths::EntityPaths;
use crate::snapshot::SnapshotMeta;
use log::{info, warn};

pub const STEP_MIRROR: &str = "mirror_readable";
pub const STEP_META: &str = "snapshot_meta";
pub const STEP_FIRST_CHUNK: &str = "snapshot_first_chunk";
pub const STEP_ITEM_BLOB: &str = "item_blob";

/// Probes the mirror and published snapshot of one entity.
///
/// `sample_key`, when given, also requires `items/<key>.json` to exist.
pub fn readiness_check(
    mirror: Option<&dyn MirrorRepository>,
    api: &dyn ContentApi,
    paths: &EntityPaths,
    sample_key: Option<&str>,
) -> WorkflowReport {
    let mut report = WorkflowReport::new();

    report.push(match mirror {
        None => StepResult::failed(STEP_MIRROR, "mirror not configured"),
        Some(mirror) => match mirror.count() {
            Ok(count) => StepResult::ok_with(STEP_MIRROR, format!("{count} rows")),
            Err(err) => StepResult::failed(STEP_MIRROR, err.to_string()),
        },
    });

    let meta = api.get(&paths.meta()).map_err(|err| err.to_string()).and_then(|file| {
        serde_json::from_slice::<SnapshotMeta>(&file.bytes).map_err(|err| err.to_string())
    });
    let chunk_count = match meta {
        Ok(meta) => {
            report.push(StepResult::ok_with(
                STEP_META,
                format!("{} records, generated {}", meta.total, meta.generated_at),
            ));
            Some(meta.chunk_count)
        }
        Err(message) => {
            report.push(StepResult::failed(STEP_META, message));
            None
        }
    };

    report.push(match chunk_count {
        Some(0) => StepResult::ok_with(STEP_FIRST_CHUNK, "snapshot is empty"),
        _ => match api.get(&paths.chunk(1)) {
            Ok(_) => StepResult::ok(STEP_FIRST_CHUNK),
            Err(err) => StepResult::failed(STEP_FIRST_CHUNK, err.to_string()),
        },
    });

    if let Some(key) = sample_key {
        report.push(match api.get(&paths.item(key)) {
            Ok(_) => StepResult::ok_with(STEP_ITEM_BLOB, key),
            Err(err) => StepResult::failed(STEP_ITEM_BLOB, err.to_string()),
        });
    }

    if report.all_ok() {
        info!("event=readiness module=service status=ok entity_root={}", paths.root());
    } else {
        warn!("event=readiness module=service status=warn entity_root={}", paths.root());
    }
    report
}
