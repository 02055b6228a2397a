//! Loader configuration: base URL, path rules and package tables.
//!
//! These tables are consumed read-only by the canonical name resolver in
//! `knit-graph`. Declaration order is significant (exact path rules are tried
//! first-to-last), so every table is an [`IndexMap`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "file:///";

/// Address-level configuration of the host loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Base URL every relative address resolves against. Must end with `/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path rules: module name pattern → address template.
    ///
    /// Patterns and templates may contain at most one `*` wildcard.
    #[serde(default)]
    pub paths: IndexMap<String, String>,

    /// Packages keyed by canonical package root.
    #[serde(default)]
    pub packages: IndexMap<String, PackageConfig>,

    /// Split plugin syntax at the first `!` (`plugin!module`) rather than the
    /// last one (`module!plugin`).
    #[serde(default)]
    pub plugin_first: bool,

    /// Extension appended to extensionless non-plugin addresses (e.g. `.js`).
    #[serde(default)]
    pub default_extension: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Per-package configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Subdirectory of the package holding its public modules (e.g. `lib`).
    #[serde(default)]
    pub base_path: Option<String>,

    /// Package-relative map (`./sub` → target or environment map).
    #[serde(default)]
    pub map: IndexMap<String, MapTarget>,
}

/// Target of a package map entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapTarget {
    /// Plain alias to another module.
    Alias(String),
    /// Environment map: condition → target, in declaration order.
    ///
    /// Conditions without `|` refer to exports of `@system-env`
    /// (`browser` ≡ `@system-env|browser`); a leading `~` negates.
    Conditional(IndexMap<String, String>),
}

impl LoaderConfig {
    /// Create a configuration rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            paths: IndexMap::new(),
            packages: IndexMap::new(),
            plugin_first: false,
            default_extension: None,
        }
    }

    /// Add a path rule.
    pub fn with_path(mut self, pattern: impl Into<String>, target: impl Into<String>) -> Self {
        self.paths.insert(pattern.into(), target.into());
        self
    }

    /// Add a package.
    pub fn with_package(mut self, root: impl Into<String>, package: PackageConfig) -> Self {
        self.packages.insert(root.into(), package);
        self
    }

    /// Toggle plugin-first syntax.
    pub fn with_plugin_first(mut self, plugin_first: bool) -> Self {
        self.plugin_first = plugin_first;
        self
    }

    /// Set the default extension.
    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = Some(extension.into());
        self
    }

    /// Check structural constraints the resolver relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.ends_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "loader.base_url".to_string(),
                hint: format!("`{}` must end with `/`", self.base_url),
            });
        }

        for (pattern, target) in &self.paths {
            let pattern_wildcards = pattern.matches('*').count();
            let target_wildcards = target.matches('*').count();
            if pattern_wildcards > 1 || target_wildcards > 1 {
                return Err(ConfigError::InvalidPathRule {
                    pattern: pattern.clone(),
                    reason: "at most one `*` is allowed".to_string(),
                });
            }
            if pattern_wildcards != target_wildcards {
                return Err(ConfigError::InvalidPathRule {
                    pattern: pattern.clone(),
                    reason: format!("wildcard mismatch with target `{target}`"),
                });
            }
        }

        for (root, package) in &self.packages {
            if root.ends_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: format!("loader.packages.{root}"),
                    hint: "package roots must not end with `/`".to_string(),
                });
            }
            if let Some(base_path) = &package.base_path {
                if base_path.starts_with('/') || base_path.ends_with('/') {
                    return Err(ConfigError::InvalidValue {
                        field: format!("loader.packages.{root}.base_path"),
                        hint: "base_path must be a bare relative directory".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Fingerprint of this configuration.
    ///
    /// Load records remember the fingerprint they were produced under; a record
    /// whose fingerprint differs from the live configuration is always stale.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(LoaderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_trailing_slash() {
        let config = LoaderConfig::new("file:///app");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_double_wildcard() {
        let config = LoaderConfig::new("file:///app/").with_path("a/*/*", "lib/*/*");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPathRule { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wildcard_mismatch() {
        let config = LoaderConfig::new("file:///app/").with_path("a/*", "lib/a.js");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let a = LoaderConfig::new("file:///app/");
        let b = LoaderConfig::new("file:///app/").with_path("jquery", "vendor/jquery.js");

        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_map_target_shapes() {
        let package: PackageConfig = serde_json::from_value(serde_json::json!({
            "base_path": "lib",
            "map": {
                "./index.js": "./main.js",
                "./fs.js": { "browser": "./fs-browser.js", "~node": "@empty" }
            }
        }))
        .unwrap();

        assert_eq!(package.base_path.as_deref(), Some("lib"));
        assert_eq!(
            package.map["./index.js"],
            MapTarget::Alias("./main.js".to_string())
        );
        match &package.map["./fs.js"] {
            MapTarget::Conditional(envs) => {
                let keys: Vec<_> = envs.keys().collect();
                assert_eq!(keys, vec!["browser", "~node"]);
            }
            other => panic!("expected environment map, got {other:?}"),
        }
    }
}
