//! `catalog` command-line entry point.
//!
//! # Responsibility
//! - Resolve store configuration and wire the core components together.
//! - Print machine-readable JSON reports on stdout; logs go to stderr.

use anyhow::{bail, Context, Result};
use catalog_core::config::{load_settings, StoreConfig};
use catalog_core::db::Connection;
use catalog_core::service::reader::parse_bundled;
use catalog_core::snapshot::{DatasetSource, MirrorSource};
use catalog_core::{
    default_log_level, init_stderr_logging, open_db, readiness_check, resolve, CatalogItem,
    CatalogReader, CatalogService, ContentApi, DatasetCache, DatasetRepository,
    HttpContentClient, MirrorReconciler, MirrorRepository, PublishOptions, SnapshotPublisher,
    SqliteMirrorRepository, SyncOptions,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Catalog document store administration
#[derive(Parser, Debug)]
#[clap(name = "catalog", version)]
struct Cli {
    /// Persisted settings JSON file
    #[clap(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical catalog dataset, or one item
    Fetch {
        /// Natural key of a single item
        #[clap(long)]
        key: Option<String>,
    },

    /// Reconcile the SQLite mirror against the canonical dataset
    Sync {
        #[clap(long, default_value_t = 200)]
        upsert_batch: usize,

        #[clap(long, default_value_t = 500)]
        delete_batch: usize,
    },

    /// Publish the paginated snapshot
    Publish {
        #[clap(long, default_value_t = 20)]
        page_size: usize,

        #[clap(long, default_value_t = 1000)]
        chunk_size: usize,
    },

    /// Insert or replace an item from a JSON file
    Save {
        /// Path to one catalog item as JSON
        file: PathBuf,

        /// Republish the snapshot afterwards
        #[clap(long)]
        publish: bool,
    },

    /// Delete an item by natural key
    Delete {
        key: String,

        /// Republish the snapshot afterwards
        #[clap(long)]
        publish: bool,
    },

    /// Read one page through the mirror, dataset and bundled fallbacks
    Read {
        #[clap(long, default_value_t = 1)]
        page: usize,

        #[clap(long, default_value_t = 20)]
        per_page: usize,

        /// Bundled static catalog copy used when every live layer fails
        #[clap(long)]
        bundled: Option<PathBuf>,
    },

    /// Check mirror and snapshot availability
    Readiness {
        /// Also require this item's per-record blob
        #[clap(long)]
        sample_key: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    if let Err(err) = init_stderr_logging(level) {
        eprintln!("logging disabled: {err}");
    }

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => None,
    };
    let config = resolve(settings.as_ref())?;
    let api: Arc<dyn ContentApi> =
        Arc::new(HttpContentClient::new(&config).context("failed to build content client")?);
    let cache = DatasetCache::new(config.cache_ttl);
    let dataset = DatasetRepository::<CatalogItem>::new(Arc::clone(&api), cache.clone())
        .with_data_root(config.data_root.as_deref())
        .with_layout(config.layout);
    let publisher =
        SnapshotPublisher::<CatalogItem>::new(Arc::clone(&api), cache, config.data_root.as_deref());

    match cli.command {
        Command::Fetch { key: Some(key) } => match dataset.find(&key)? {
            Some(item) => print_json(&item),
            None => bail!("item not found: {key}"),
        },
        Command::Fetch { key: None } => {
            let current = dataset.fetch_fresh()?;
            print_json(&serde_json::json!({
                "version": current.version,
                "items": current.value,
            }))
        }
        Command::Sync {
            upsert_batch,
            delete_batch,
        } => {
            let conn = open_mirror(&config)?;
            let mirror = SqliteMirrorRepository::new(&conn);
            let report = MirrorReconciler::new(&dataset, &mirror)
                .with_options(SyncOptions {
                    upsert_batch_size: upsert_batch,
                    delete_batch_size: delete_batch,
                })
                .sync_all()?;
            print_json(&report)
        }
        Command::Publish {
            page_size,
            chunk_size,
        } => {
            let options = PublishOptions {
                page_size,
                chunk_size,
            };
            let fallback = DatasetSource::new(&dataset);
            let outcome = match open_mirror(&config) {
                Ok(conn) => {
                    let mirror = SqliteMirrorRepository::new(&conn);
                    publisher.publish(&MirrorSource::new(&mirror), Some(&fallback), options)?
                }
                Err(err) => {
                    log::warn!("event=cli_publish module=cli status=warn error={err:#}");
                    publisher.publish(&fallback, None, options)?
                }
            };
            print_json(&serde_json::json!({
                "report": outcome.value,
                "warnings": outcome.warnings,
            }))
        }
        Command::Save { file, publish } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let item: CatalogItem = serde_json::from_slice(&bytes)
                .with_context(|| format!("{} is not a catalog item", file.display()))?;
            let conn = open_mirror(&config)?;
            let mirror = SqliteMirrorRepository::new(&conn);
            let report = CatalogService::new(&dataset, &mirror)
                .with_publisher(&publisher, PublishOptions::default())
                .save_item(item, publish)?;
            print_json(&report)
        }
        Command::Delete { key, publish } => {
            let conn = open_mirror(&config)?;
            let mirror = SqliteMirrorRepository::new(&conn);
            let report = CatalogService::new(&dataset, &mirror)
                .with_publisher(&publisher, PublishOptions::default())
                .delete_item(&key, publish)?;
            print_json(&report)
        }
        Command::Read {
            page,
            per_page,
            bundled,
        } => {
            let bundled = match bundled {
                Some(path) => {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    parse_bundled(&bytes)
                        .with_context(|| format!("invalid bundled catalog {}", path.display()))?
                }
                None => Vec::new(),
            };
            let conn = open_mirror(&config).ok();
            let mirror = conn.as_ref().map(SqliteMirrorRepository::new);
            let mut reader = CatalogReader::new(bundled).with_dataset(&dataset);
            if let Some(mirror) = &mirror {
                reader = reader.with_mirror(mirror);
            }
            let outcome = reader.page(page, per_page)?;
            print_json(&serde_json::json!({
                "page": outcome.value,
                "warnings": outcome.warnings,
            }))
        }
        Command::Readiness { sample_key } => {
            let conn = open_mirror(&config).ok();
            let mirror = conn.as_ref().map(SqliteMirrorRepository::new);
            let report = readiness_check(
                mirror.as_ref().map(|m| m as &dyn MirrorRepository),
                api.as_ref(),
                publisher.paths(),
                sample_key.as_deref(),
            );
            print_json(&report)?;
            if !report.all_ok() {
                bail!("store is not ready");
            }
            Ok(())
        }
    }
}

fn open_mirror(config: &StoreConfig) -> Result<Connection> {
    let Some(path) = &config.mirror_path else {
        bail!("mirror path is not configured; set CATALOG_MIRROR_PATH");
    };
    open_db(path).with_context(|| format!("failed to open mirror {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
