//! Trace, cache and global settings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Value assigned to a condition key in a conditional environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Include every variation (`true`) or none (`false`).
    Bool(bool),
    /// Include only the listed branch labels.
    List(Vec<String>),
}

impl From<bool> for ConditionValue {
    fn from(value: bool) -> Self {
        ConditionValue::Bool(value)
    }
}

impl From<Vec<String>> for ConditionValue {
    fn from(value: Vec<String>) -> Self {
        ConditionValue::List(value)
    }
}

impl<const N: usize> From<[&str; N]> for ConditionValue {
    fn from(value: [&str; N]) -> Self {
        ConditionValue::List(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Settings that drive a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Default for condition keys missing from `conditions`: include (`true`)
    /// or exclude (`false`) their branches.
    #[serde(default = "default_true")]
    pub trace_all_conditionals: bool,

    /// Conditional environment, keyed by `<module>|<export>` (optionally `~`-negated).
    #[serde(default)]
    pub conditions: IndexMap<String, ConditionValue>,

    /// Trace plugins that opted out of static builds as runtime dependencies.
    #[serde(default = "default_true")]
    pub trace_runtime_plugin: bool,

    /// Canonical names never traced.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            trace_all_conditionals: true,
            conditions: IndexMap::new(),
            trace_runtime_plugin: true,
            exclude: Vec::new(),
        }
    }
}

/// Trace cache persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding `trace-cache.json`.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/knit")
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

impl CacheSettings {
    /// Location of the serialized trace cache.
    pub fn cache_file(&self) -> PathBuf {
        self.dir.join("trace-cache.json")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub log_level: Option<String>,
}
