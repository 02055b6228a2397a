//! Top-level configuration and layered loading.
//!
//! Sources are merged with increasing priority:
//! defaults < `knit.toml` / `knit.json` < `KNIT_*` environment variables.
//! Nested keys use a double underscore in the environment
//! (`KNIT_TRACE__TRACE_ALL_CONDITIONALS=false`).

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::loader::LoaderConfig;
use crate::settings::{CacheSettings, GlobalSettings, TraceSettings};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "KNIT_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnitConfig {
    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub trace: TraceSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub settings: GlobalSettings,
}

impl KnitConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KnitConfig = toml::from_str(content).map_err(|e| ConfigError::InvalidValue {
            field: "toml".to_string(),
            hint: format!("Invalid TOML syntax: {}", e),
        })?;
        config.loader.validate()?;
        Ok(config)
    }

    /// Create from a `serde_json::Value` (programmatic config).
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: KnitConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
                field: "config".to_string(),
                hint: e.to_string(),
            })?;
        config.loader.validate()?;
        Ok(config)
    }

    /// Load layered configuration for a project rooted at `root`.
    ///
    /// A missing config file is not an error: defaults and environment
    /// variables still apply.
    pub fn load(root: &Path) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(KnitConfig::default()));

        let toml_path = root.join("knit.toml");
        if toml_path.exists() {
            tracing::debug!("Loading config from {}", toml_path.display());
            figment = figment.merge(Toml::file(toml_path));
        }

        let json_path = root.join("knit.json");
        if json_path.exists() {
            tracing::debug!("Loading config from {}", json_path.display());
            figment = figment.merge(Json::file(json_path));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load a specific config file, still honouring environment overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        let figment = Figment::new().merge(Serialized::defaults(KnitConfig::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            Some("toml") => figment.merge(Toml::file(path)),
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "config".to_string(),
                    hint: format!("unsupported config extension {:?}", other),
                });
            }
        };

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: KnitConfig = figment.extract().map_err(|e| ConfigError::InvalidValue {
            field: "configuration".to_string(),
            hint: e.to_string(),
        })?;
        config.loader.validate()?;
        Ok(config)
    }
}
