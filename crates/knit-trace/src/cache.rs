//! Trace cache: load records by canonical name, persisted between runs.
//!
//! The cache never evicts on its own. Records go stale through the freshness
//! check in the pipeline (config hash and modification time), or when the
//! embedder calls [`TraceCache::invalidate`] / [`TraceCache::clear`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use knit_graph::TreeEntry;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Canonical name → cached entry.
///
/// Only [`TreeEntry::Present`] and [`TreeEntry::Excluded`] are ever stored.
/// Serialized as a JSON object of record objects and `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceCache {
    entries: BTreeMap<String, TreeEntry>,
}

impl TraceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut TreeEntry> {
        self.entries.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TreeEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Drop one entry so the next trace recomputes it.
    pub fn invalidate(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TreeEntry)> {
        self.entries.iter()
    }

    /// Start a trace session: every ordinary record must be re-validated
    /// before reuse.
    pub fn start_session(&mut self) {
        for record in self.entries.values_mut().filter_map(TreeEntry::record_mut) {
            if !record.is_conditional() {
                record.fresh = false;
            }
        }
    }

    /// Load a cache written by [`save`](Self::save).
    ///
    /// Returns `Ok(None)` if the file doesn't exist (cold start). A corrupt
    /// file is an error; callers usually log it and start empty.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(path).map_err(|e| {
            TraceError::Cache(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut cache: Self = serde_json::from_slice(&bytes).map_err(|e| {
            TraceError::Cache(format!(
                "Failed to deserialize trace cache {}: {}",
                path.display(),
                e
            ))
        })?;
        cache.entries.retain(|_, entry| !matches!(entry, TreeEntry::SatisfiedElsewhere));
        Ok(Some(cache))
    }

    /// Write the cache as JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                TraceError::Cache(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let bytes = serde_json::to_vec(self)
            .map_err(|e| TraceError::Cache(format!("Failed to serialize trace cache: {}", e)))?;

        // Write to a temp file, then rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes).map_err(|e| {
            TraceError::Cache(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, path).map_err(|e| {
            TraceError::Cache(format!("Failed to write {}: {}", path.display(), e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knit_graph::{Conditional, LoadRecord, ModuleFormat};
    use tempfile::TempDir;

    fn record(name: &str) -> LoadRecord {
        LoadRecord::builder(name)
            .format(ModuleFormat::Esm)
            .source("export default 1;")
            .path(name)
            .timestamp(42)
            .config_hash("hash")
            .fresh(true)
            .build()
    }

    #[test]
    fn test_start_session_resets_ordinary_records() {
        let mut cache = TraceCache::new();
        cache.insert("a.js", TreeEntry::Present(record("a.js")));
        cache.insert("b.js", TreeEntry::Excluded);

        cache.start_session();

        assert!(!cache.get("a.js").unwrap().record().unwrap().fresh);
        assert_eq!(cache.get("b.js"), Some(&TreeEntry::Excluded));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache").join("trace-cache.json");

        let mut cache = TraceCache::new();
        cache.insert("a.js", TreeEntry::Present(record("a.js")));
        cache.insert("native.js", TreeEntry::Excluded);
        cache.insert(
            "impl.js#?env.js|browser",
            TreeEntry::Present(LoadRecord::conditional(
                "impl.js#?env.js|browser",
                Conditional::Boolean {
                    condition: "env.js|browser".to_string(),
                    branch: "impl.js".to_string(),
                },
                "hash",
            )),
        );
        cache.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["native.js"], serde_json::Value::Bool(false));
        assert_eq!(json["a.js"]["configHash"], "hash");
        assert!(json["a.js"].get("fresh").is_none());

        let loaded = TraceCache::load(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 3);
        let a = loaded.get("a.js").unwrap().record().unwrap();
        assert_eq!(a.timestamp, Some(42));
        assert!(!a.fresh);
        assert!(
            loaded
                .get("impl.js#?env.js|browser")
                .unwrap()
                .record()
                .unwrap()
                .is_conditional()
        );
    }

    #[test]
    fn test_load_missing_is_cold_start() {
        let dir = TempDir::new().unwrap();
        assert!(TraceCache::load(&dir.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace-cache.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(TraceCache::load(&path), Err(TraceError::Cache(_))));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = TraceCache::new();
        cache.insert("a.js", TreeEntry::Present(record("a.js")));
        cache.insert("b.js", TreeEntry::Excluded);

        assert!(cache.invalidate("a.js").is_some());
        assert!(cache.get("a.js").is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
