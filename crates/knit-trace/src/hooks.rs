//! Loader hooks.
//!
//! The embedding loader supplies name normalization and the four load stages.
//! Each [`Tracer`](crate::Tracer) owns its hooks; nothing is global.

use async_trait::async_trait;
use knit_graph::ModuleFormat;
use serde_json::{Map, Value};
use std::fmt;

/// Failure reported by a hook. The pipeline adds the hook, module and parent
/// chain before surfacing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure(pub String);

impl HookFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HookFailure {}

impl From<crate::runtime::RuntimeError> for HookFailure {
    fn from(err: crate::runtime::RuntimeError) -> Self {
        HookFailure(err.to_string())
    }
}

pub type HookResult<T> = Result<T, HookFailure>;

/// Metadata threaded through the load stages.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadMetadata {
    /// Cleared by `locate` to opt the module out of the build.
    pub build: bool,
    /// Format detected or declared so far.
    pub format: Option<ModuleFormat>,
    /// Set by plugins that must run at runtime instead of being inlined.
    pub runtime_plugin: bool,
    /// Anything else the hooks want to keep with the record (`bundle`, ...).
    pub extra: Map<String, Value>,
}

impl Default for LoadMetadata {
    fn default() -> Self {
        Self {
            build: true,
            format: None,
            runtime_plugin: false,
            extra: Map::new(),
        }
    }
}

/// The load in progress, as seen by the hooks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookLoad {
    /// Normalized name.
    pub name: String,
    pub metadata: LoadMetadata,
    /// Set after `locate`.
    pub address: Option<String>,
    /// Set after `fetch`, replaced by `translate`.
    pub source: Option<String>,
}

impl HookLoad {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or_default()
    }
}

/// Result of static dependency analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instantiated {
    /// Raw dependency specifiers in source order.
    pub deps: Vec<String>,
}

/// Host loader interface.
///
/// Hooks mutate the [`HookLoad`] they receive: `locate` may clear
/// `metadata.build`, `instantiate` may set `metadata.format`.
#[async_trait]
pub trait LoaderHooks: Send + Sync {
    /// Resolve `name` as requested by `parent` (a normalized name) located at
    /// `parent_address`.
    async fn normalize(
        &self,
        name: &str,
        parent: Option<&str>,
        parent_address: Option<&str>,
    ) -> HookResult<String>;

    /// Whether the host registry already provides this module.
    fn has(&self, _normalized: &str) -> bool {
        false
    }

    async fn locate(&self, load: &mut HookLoad) -> HookResult<String>;

    async fn fetch(&self, load: &mut HookLoad) -> HookResult<String>;

    async fn translate(&self, load: &mut HookLoad) -> HookResult<String> {
        Ok(load.source().to_string())
    }

    /// `None` means the module cannot be analysed statically.
    async fn instantiate(&self, load: &mut HookLoad) -> HookResult<Option<Instantiated>>;
}
