//! Content path layout per entity.
//!
//! ```text
//! <root>/<entity>/index.json
//! <root>/<entity>/items/<key>.json
//! <root>/<entity>/pages/latest/meta.json
//! <root>/<entity>/pages/latest/chunk-0001.json
//! ```

use crate::model::record::Record;

const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SUFFIX: &str = ".json";

/// Resolves every content path used for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPaths {
    root: String,
}

impl EntityPaths {
    pub fn new(data_root: Option<&str>, entity: &str) -> Self {
        let entity = entity.trim_matches('/');
        let root = match data_root.map(|r| r.trim_matches('/')).filter(|r| !r.is_empty()) {
            Some(prefix) => format!("{prefix}/{entity}"),
            None => entity.to_string(),
        };
        Self { root }
    }

    pub fn for_record<T: Record>(data_root: Option<&str>) -> Self {
        Self::new(data_root, T::ENTITY)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn index(&self) -> String {
        format!("{}/index.json", self.root)
    }

    pub fn items_dir(&self) -> String {
        format!("{}/items", self.root)
    }

    pub fn item(&self, key: &str) -> String {
        format!("{}/items/{key}.json", self.root)
    }

    pub fn pages_dir(&self) -> String {
        format!("{}/pages/latest", self.root)
    }

    pub fn meta(&self) -> String {
        format!("{}/meta.json", self.pages_dir())
    }

    /// Chunk artifact path; `index` is 1-based.
    pub fn chunk(&self, index: usize) -> String {
        format!("{}/{CHUNK_PREFIX}{index:04}{CHUNK_SUFFIX}", self.pages_dir())
    }
}

/// Extracts the natural key from an item blob path.
pub fn key_from_item_path(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    file.strip_suffix(".json").filter(|key| !key.is_empty())
}

/// Extracts the 1-based chunk index from a chunk artifact path.
pub fn chunk_index_from_path(path: &str) -> Option<usize> {
    let file = path.rsplit('/').next()?;
    file.strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::{chunk_index_from_path, key_from_item_path, EntityPaths};

    #[test]
    fn paths_follow_default_layout() {
        let paths = EntityPaths::new(None, "software");
        assert_eq!(paths.index(), "software/index.json");
        assert_eq!(paths.item("vlc"), "software/items/vlc.json");
        assert_eq!(paths.meta(), "software/pages/latest/meta.json");
        assert_eq!(paths.chunk(1), "software/pages/latest/chunk-0001.json");
        assert_eq!(paths.chunk(12), "software/pages/latest/chunk-0012.json");
    }

    #[test]
    fn data_root_is_prefixed_once() {
        let paths = EntityPaths::new(Some("/public/data/"), "software");
        assert_eq!(paths.index(), "public/data/software/index.json");
        assert_eq!(EntityPaths::new(Some(""), "software").root(), "software");
    }

    #[test]
    fn path_parsers_extract_keys_and_indexes() {
        assert_eq!(key_from_item_path("software/items/vlc.json"), Some("vlc"));
        assert_eq!(key_from_item_path("software/items/.json"), None);
        assert_eq!(
            chunk_index_from_path("software/pages/latest/chunk-0003.json"),
            Some(3)
        );
        assert_eq!(chunk_index_from_path("software/pages/latest/meta.json"), None);
    }
}
