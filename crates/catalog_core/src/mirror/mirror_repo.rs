//! Mirror repository contract and SQLite implementation.
//!
//! # Invariants
//! - `slug` is unique; upserts are insert-or-update by slug.
//! - Each `upsert_batch`/`delete_keys` call commits atomically.
//! - Read paths reject invalid persisted JSON instead of masking it.

use crate::db::DbError;
use crate::model::record::{CatalogItem, Record};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

const ITEM_SELECT_SQL: &str = "SELECT
    slug,
    name,
    summary,
    description,
    version,
    size_in_bytes,
    platforms,
    categories,
    item_type,
    website_url,
    download_url,
    is_featured,
    release_date,
    created_at,
    updated_at,
    developer,
    stats,
    media,
    requirements,
    changelog,
    extra
FROM catalog_items";

const ITEM_UPSERT_SQL: &str = "INSERT INTO catalog_items (
    slug, name, summary, description, version, size_in_bytes, platforms,
    categories, item_type, website_url, download_url, is_featured,
    release_date, created_at, updated_at, developer, stats, media,
    requirements, changelog, extra, recency_ms, synced_at
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
)
ON CONFLICT(slug) DO UPDATE SET
    name = excluded.name,
    summary = excluded.summary,
    description = excluded.description,
    version = excluded.version,
    size_in_bytes = excluded.size_in_bytes,
    platforms = excluded.platforms,
    categories = excluded.categories,
    item_type = excluded.item_type,
    website_url = excluded.website_url,
    download_url = excluded.download_url,
    is_featured = excluded.is_featured,
    release_date = excluded.release_date,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at,
    developer = excluded.developer,
    stats = excluded.stats,
    media = excluded.media,
    requirements = excluded.requirements,
    changelog = excluded.changelog,
    extra = excluded.extra,
    recency_ms = excluded.recency_ms,
    synced_at = excluded.synced_at
WHERE catalog_items.name IS NOT excluded.name
    OR catalog_items.summary IS NOT excluded.summary
    OR catalog_items.description IS NOT excluded.description
    OR catalog_items.version IS NOT excluded.version
    OR catalog_items.size_in_bytes IS NOT excluded.size_in_bytes
    OR catalog_items.platforms IS NOT excluded.platforms
    OR catalog_items.categories IS NOT excluded.categories
    OR catalog_items.item_type IS NOT excluded.item_type
    OR catalog_items.website_url IS NOT excluded.website_url
    OR catalog_items.download_url IS NOT excluded.download_url
    OR catalog_items.is_featured IS NOT excluded.is_featured
    OR catalog_items.release_date IS NOT excluded.release_date
    OR catalog_items.created_at IS NOT excluded.created_at
    OR catalog_items.updated_at IS NOT excluded.updated_at
    OR catalog_items.developer IS NOT excluded.developer
    OR catalog_items.stats IS NOT excluded.stats
    OR catalog_items.media IS NOT excluded.media
    OR catalog_items.requirements IS NOT excluded.requirements
    OR catalog_items.changelog IS NOT excluded.changelog
    OR catalog_items.extra IS NOT excluded.extra
    OR catalog_items.recency_ms IS NOT excluded.recency_ms;";

pub type MirrorResult<T> = Result<T, MirrorError>;

/// Mirror persistence failure.
#[derive(Debug)]
pub enum MirrorError {
    Db(DbError),
    Serialize(serde_json::Error),
    InvalidData(String),
}

impl Display for MirrorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialize(err) => write!(f, "failed to encode mirror column: {err}"),
            Self::InvalidData(message) => write!(f, "invalid mirror row: {message}"),
        }
    }
}

impl Error for MirrorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for MirrorError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MirrorError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// Relational mirror operations used by reconciliation and reads.
pub trait MirrorRepository {
    fn count(&self) -> MirrorResult<u64>;
    /// Insert-or-update every item in one transaction; returns rows written.
    /// Rows whose content already matches are left untouched.
    fn upsert_batch(&self, items: &[CatalogItem]) -> MirrorResult<usize>;
    fn list_keys(&self) -> MirrorResult<Vec<String>>;
    /// Deletes rows by slug in one transaction; returns rows deleted.
    fn delete_keys(&self, keys: &[String]) -> MirrorResult<usize>;
    /// Rows ordered newest first, ties broken by slug ascending.
    fn list_sorted(&self, offset: u64, limit: Option<u64>) -> MirrorResult<Vec<CatalogItem>>;
    fn get(&self, slug: &str) -> MirrorResult<Option<CatalogItem>>;
    /// Returns whether a row was deleted.
    fn delete_one(&self, slug: &str) -> MirrorResult<bool>;
}

/// SQLite-backed mirror.
pub struct SqliteMirrorRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMirrorRepository<'conn> {
    /// Wraps a connection returned by [`crate::db::open_db`].
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MirrorRepository for SqliteMirrorRepository<'_> {
    fn count(&self) -> MirrorResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM catalog_items;", [], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| MirrorError::InvalidData(format!("negative count {count}")))
    }

    fn upsert_batch(&self, items: &[CatalogItem]) -> MirrorResult<usize> {
        let synced_at = Utc::now().timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(ITEM_UPSERT_SQL)?;
            for item in items {
                written += stmt.execute(params![
                    item.slug.as_str(),
                    item.name.as_str(),
                    item.summary.as_deref(),
                    item.description.as_deref(),
                    item.version.as_deref(),
                    item.size_in_bytes,
                    serde_json::to_string(&item.platforms)?,
                    serde_json::to_string(&item.categories)?,
                    item.item_type.as_str(),
                    item.website_url.as_deref(),
                    item.download_url.as_deref(),
                    i64::from(item.is_featured),
                    item.release_date.as_deref(),
                    item.created_at.as_deref(),
                    item.updated_at.as_deref(),
                    json_column(&item.developer)?,
                    json_column(&item.stats)?,
                    json_column(&item.media)?,
                    json_column(&item.requirements)?,
                    json_column(&item.changelog)?,
                    serde_json::to_string(&item.extra)?,
                    item.recency().map(|at| at.timestamp_millis()),
                    synced_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn list_keys(&self) -> MirrorResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT slug FROM catalog_items ORDER BY slug ASC;")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[String]) -> MirrorResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM catalog_items WHERE slug = ?1;")?;
            for key in keys {
                deleted += stmt.execute([key])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn list_sorted(&self, offset: u64, limit: Option<u64>) -> MirrorResult<Vec<CatalogItem>> {
        let mut sql = format!("{ITEM_SELECT_SQL} ORDER BY recency_ms DESC, slug ASC");
        let mut bind_values: Vec<SqlValue> = Vec::new();

        match limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                bind_values.push(SqlValue::Integer(to_sql_int(limit)));
                bind_values.push(SqlValue::Integer(to_sql_int(offset)));
            }
            None if offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                bind_values.push(SqlValue::Integer(to_sql_int(offset)));
            }
            None => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn get(&self, slug: &str) -> MirrorResult<Option<CatalogItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ITEM_SELECT_SQL} WHERE slug = ?1;"))?;
        let mut rows = stmt.query([slug])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_item_row(row)?)),
            None => Ok(None),
        }
    }

    fn delete_one(&self, slug: &str) -> MirrorResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM catalog_items WHERE slug = ?1;", [slug])?;
        Ok(changed > 0)
    }
}

fn json_column(value: &Option<Value>) -> MirrorResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_json<T: DeserializeOwned>(slug: &str, column: &str, raw: &str) -> MirrorResult<T> {
    serde_json::from_str(raw).map_err(|err| {
        MirrorError::InvalidData(format!(
            "invalid JSON in catalog_items.{column} for `{slug}`: {err}"
        ))
    })
}

fn parse_optional_json(slug: &str, column: &str, raw: Option<String>) -> MirrorResult<Option<Value>> {
    raw.map(|text| parse_json(slug, column, &text)).transpose()
}

fn parse_item_row(row: &Row<'_>) -> MirrorResult<CatalogItem> {
    let slug: String = row.get("slug")?;

    let is_featured = match row.get::<_, i64>("is_featured")? {
        0 => false,
        1 => true,
        other => {
            return Err(MirrorError::InvalidData(format!(
                "invalid is_featured value `{other}` for `{slug}`"
            )))
        }
    };

    let platforms: Vec<String> =
        parse_json(&slug, "platforms", &row.get::<_, String>("platforms")?)?;
    let categories: Vec<String> =
        parse_json(&slug, "categories", &row.get::<_, String>("categories")?)?;
    let extra: Map<String, Value> = parse_json(&slug, "extra", &row.get::<_, String>("extra")?)?;

    Ok(CatalogItem {
        name: row.get("name")?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        version: row.get("version")?,
        size_in_bytes: row.get("size_in_bytes")?,
        platforms,
        categories,
        item_type: row.get("item_type")?,
        website_url: row.get("website_url")?,
        download_url: row.get("download_url")?,
        is_featured,
        release_date: row.get("release_date")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        developer: parse_optional_json(&slug, "developer", row.get("developer")?)?,
        stats: parse_optional_json(&slug, "stats", row.get("stats")?)?,
        media: parse_optional_json(&slug, "media", row.get("media")?)?,
        requirements: parse_optional_json(&slug, "requirements", row.get("requirements")?)?,
        changelog: parse_optional_json(&slug, "changelog", row.get("changelog")?)?,
        extra,
        slug,
    })
}
