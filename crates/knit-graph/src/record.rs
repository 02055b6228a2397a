//! Load records and tree entries.
//!
//! A [`LoadRecord`] is the per-module result of the locate → fetch → translate →
//! instantiate pipeline. It is either *ordinary* (source, deps, format) or
//! *conditional* (a [`Conditional`] describing environment-dependent branches),
//! never both; the two constructors are the only way to obtain one.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::conditional::condition_module;

/// Module formats understood by the external compilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    Esm,
    Amd,
    Cjs,
    Global,
    Register,
    Defined,
    Json,
}

impl ModuleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleFormat::Esm => "esm",
            ModuleFormat::Amd => "amd",
            ModuleFormat::Cjs => "cjs",
            ModuleFormat::Global => "global",
            ModuleFormat::Register => "register",
            ModuleFormat::Defined => "defined",
            ModuleFormat::Json => "json",
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "esm" | "es6" => Ok(ModuleFormat::Esm),
            "amd" => Ok(ModuleFormat::Amd),
            "cjs" => Ok(ModuleFormat::Cjs),
            "global" => Ok(ModuleFormat::Global),
            "register" => Ok(ModuleFormat::Register),
            "defined" => Ok(ModuleFormat::Defined),
            "json" => Ok(ModuleFormat::Json),
            other => Err(format!("Unknown module format: {}", other)),
        }
    }
}

/// One entry of an environment-map conditional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBranch {
    /// Canonical condition key, optionally `~`-negated.
    pub condition: String,
    /// Canonical name of the branch module.
    pub branch: String,
}

/// Environment-dependent dependency of a conditional record.
///
/// Serialized verbatim in the trace cache, so the field names are part of the
/// persisted format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Conditional {
    /// `module#?condition`: the branch or `@empty`.
    Boolean { condition: String, branch: String },
    /// `package/#:subpath`: a package's per-environment map plus the
    /// non-conditional fallback.
    Environment {
        envs: Vec<EnvBranch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
    /// `module-#{condition}`: file variations discovered by globbing, keyed by
    /// the interpolated label.
    Interpolation {
        condition: String,
        branches: BTreeMap<String, String>,
    },
}

impl Conditional {
    /// Every module this conditional may depend on, condition modules first,
    /// in declaration order and without duplicates.
    pub fn all_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        fn push<'a>(name: &'a str, targets: &mut Vec<&'a str>) {
            if !targets.contains(&name) {
                targets.push(name);
            }
        }
        match self {
            Conditional::Boolean { condition, branch } => {
                push(condition_module(condition), &mut targets);
                push(branch, &mut targets);
            }
            Conditional::Environment { envs, fallback } => {
                for env in envs {
                    push(condition_module(&env.condition), &mut targets);
                }
                for env in envs {
                    push(&env.branch, &mut targets);
                }
                if let Some(fallback) = fallback {
                    push(fallback, &mut targets);
                }
            }
            Conditional::Interpolation {
                condition,
                branches,
            } => {
                push(condition_module(condition), &mut targets);
                for branch in branches.values() {
                    push(branch, &mut targets);
                }
            }
        }
        targets
    }
}

/// Per-module load record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRecord {
    pub name: String,

    /// Base-relative file path, if file-backed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ModuleFormat>,

    /// Raw dependency specifiers in source order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,

    /// Raw specifier → canonical name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dep_map: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Known up to date within the current trace session. Never persisted.
    #[serde(skip)]
    pub fresh: bool,

    /// Modification time (ms since epoch) observed when the record was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    #[serde(default)]
    pub config_hash: String,

    /// Canonical name of the plugin that produced this module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// The plugin opted out of static builds and must ship at runtime.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub runtime_plugin: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Conditional>,

    /// Hook metadata carried with the record (`bundle`, `globals`, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LoadRecord {
    /// Start building an ordinary record.
    pub fn builder(name: impl Into<String>) -> LoadRecordBuilder {
        LoadRecordBuilder {
            record: Self::empty(name.into()),
        }
    }

    /// Create a conditional record. Conditional records carry no source.
    pub fn conditional(
        name: impl Into<String>,
        conditional: Conditional,
        config_hash: impl Into<String>,
    ) -> Self {
        let mut record = Self::empty(name.into());
        record.conditional = Some(conditional);
        record.config_hash = config_hash.into();
        record
    }

    fn empty(name: String) -> Self {
        Self {
            name,
            path: None,
            format: None,
            deps: Vec::new(),
            dep_map: IndexMap::new(),
            source: None,
            fresh: false,
            timestamp: None,
            config_hash: String::new(),
            plugin: None,
            runtime_plugin: false,
            conditional: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.conditional.is_some()
    }

    /// Whether the hooks flagged this source as a prebuilt bundle.
    pub fn is_bundle(&self) -> bool {
        self.metadata
            .get("bundle")
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Canonical dependencies of an ordinary record: the runtime plugin first
    /// (when it must ship and `include_runtime_plugin` is set), then every
    /// entry of `deps` resolved through `dep_map`.
    ///
    /// Conditional records return nothing here; their edges depend on the
    /// environment (see [`crate::conditional`]).
    pub fn dependencies(&self, include_runtime_plugin: bool) -> Vec<&str> {
        if self.conditional.is_some() {
            return Vec::new();
        }

        let mut deps = Vec::with_capacity(self.deps.len() + 1);
        if include_runtime_plugin && self.runtime_plugin {
            if let Some(plugin) = &self.plugin {
                deps.push(plugin.as_str());
            }
        }
        for dep in &self.deps {
            if let Some(canonical) = self.dep_map.get(dep) {
                if !deps.contains(&canonical.as_str()) {
                    deps.push(canonical.as_str());
                }
            }
        }
        deps
    }
}

/// Builder for ordinary load records.
#[derive(Debug)]
pub struct LoadRecordBuilder {
    record: LoadRecord,
}

impl LoadRecordBuilder {
    pub fn format(mut self, format: ModuleFormat) -> Self {
        self.record.format = Some(format);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.record.source = Some(source.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.record.path = Some(path.into());
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.record.timestamp = Some(timestamp);
        self
    }

    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.record.config_hash = hash.into();
        self
    }

    /// Append a raw dependency and its canonical resolution.
    pub fn dep(mut self, raw: impl Into<String>, canonical: impl Into<String>) -> Self {
        let raw = raw.into();
        if !self.record.dep_map.contains_key(&raw) {
            self.record.deps.push(raw.clone());
        }
        self.record.dep_map.insert(raw, canonical.into());
        self
    }

    pub fn plugin(mut self, plugin: impl Into<String>, runtime: bool) -> Self {
        self.record.plugin = Some(plugin.into());
        self.record.runtime_plugin = runtime;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.record.metadata.insert(key.into(), value);
        self
    }

    pub fn fresh(mut self, fresh: bool) -> Self {
        self.record.fresh = fresh;
        self
    }

    pub fn build(self) -> LoadRecord {
        self.record
    }
}

/// Value stored for one canonical name in a resolved tree or trace cache.
///
/// Serialized as the record object, `false` or `true` respectively.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEntry {
    /// A fully loaded record.
    Present(LoadRecord),
    /// Deliberately not built (`build: false`, registry-provided). Inert leaf.
    Excluded,
    /// Needed, but provided by a prebuilt bundle. Membership tests only.
    SatisfiedElsewhere,
}

impl TreeEntry {
    pub fn record(&self) -> Option<&LoadRecord> {
        match self {
            TreeEntry::Present(record) => Some(record),
            _ => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut LoadRecord> {
        match self {
            TreeEntry::Present(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, TreeEntry::Present(_))
    }
}

impl From<LoadRecord> for TreeEntry {
    fn from(record: LoadRecord) -> Self {
        TreeEntry::Present(record)
    }
}

impl Serialize for TreeEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            TreeEntry::Present(record) => record.serialize(serializer),
            TreeEntry::Excluded => serializer.serialize_bool(false),
            TreeEntry::SatisfiedElsewhere => serializer.serialize_bool(true),
        }
    }
}

impl<'de> Deserialize<'de> for TreeEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Flag(bool),
            Record(Box<LoadRecord>),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Flag(false) => TreeEntry::Excluded,
            Wire::Flag(true) => TreeEntry::SatisfiedElsewhere,
            Wire::Record(record) => TreeEntry::Present(*record),
        })
    }
}
