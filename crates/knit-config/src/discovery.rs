//! File-based config discovery.
//!
//! Handles finding and loading knit configuration files from the filesystem.

use std::path::{Path, PathBuf};

use crate::config::KnitConfig;
use crate::error::{ConfigError, Result};

/// Searches for a knit configuration file in a project root.
///
/// # Example
///
/// ```no_run
/// use knit_config::ConfigDiscovery;
///
/// let discovery = ConfigDiscovery::new(".");
/// let config = discovery.load().unwrap();
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
}

impl ConfigDiscovery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Find a config file in the root directory.
    ///
    /// Searches in this order:
    /// 1. `knit.toml`
    /// 2. `knit.json`
    pub fn find(&self) -> Option<PathBuf> {
        ["knit.toml", "knit.json"]
            .iter()
            .map(|name| self.root.join(name))
            .find(|path| path.exists())
    }

    /// Load config from the discovered file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if no config file is found.
    pub fn load(&self) -> Result<KnitConfig> {
        let path = self.find().ok_or(ConfigError::NotFound)?;
        KnitConfig::load_file(&path)
    }
}

/// Discover and load config from the current directory.
pub fn discover() -> Result<KnitConfig> {
    let root = std::env::current_dir()?;
    ConfigDiscovery::new(&root).load()
}
