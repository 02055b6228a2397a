//! # knit-config
//!
//! Configuration for the knit trace engine: the loader tables consumed by the
//! canonical name resolver (`base_url`, `paths`, `packages`, `plugin_first`),
//! trace settings (conditional environment, defaults) and cache settings.
//!
//! Library users build a [`KnitConfig`] directly or from a `serde_json::Value`;
//! tools load it with [`KnitConfig::load`] or [`ConfigDiscovery`].

pub mod config;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod settings;

pub use config::*;
pub use discovery::{ConfigDiscovery, discover};
pub use error::*;
pub use loader::*;
pub use settings::*;
