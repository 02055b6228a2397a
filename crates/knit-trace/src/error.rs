//! Error types for tracing.
//!
//! Errors are `Clone` because a single failed load is observed by every
//! caller coalesced onto it.

use std::fmt;

use knit_graph::GraphError;
use thiserror::Error;

use crate::runtime::RuntimeError;

pub type Result<T> = std::result::Result<T, TraceError>;

/// Loader hook that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Normalize,
    Locate,
    Fetch,
    Translate,
    Instantiate,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::Normalize => "normalize",
            HookKind::Locate => "locate",
            HookKind::Fetch => "fetch",
            HookKind::Translate => "translate",
            HookKind::Instantiate => "instantiate",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// Canonicalization, conditional, algebra or ordering failure
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A loader hook failed while loading a module
    #[error("{}", format_hook_error(.hook, .canonical, .normalized, .parents, .message))]
    Hook {
        hook: HookKind,
        canonical: String,
        normalized: String,
        /// Modules that led to this load, outermost first
        parents: Vec<String>,
        message: String,
    },

    /// Stat or read failure outside of a hook
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Trace cache could not be read or written
    #[error("Trace cache error: {0}")]
    Cache(String),

    /// Invalid configuration or trace options
    #[error("Configuration error: {0}")]
    Config(String),
}

fn format_hook_error(
    hook: &HookKind,
    canonical: &str,
    normalized: &str,
    parents: &[String],
    message: &str,
) -> String {
    let mut out = format!("Error on {} for {} at {}", hook, canonical, normalized);
    for parent in parents.iter().rev() {
        out.push_str("\n\tLoading ");
        out.push_str(parent);
    }
    out.push_str("\n\t");
    out.push_str(message);
    out
}

impl From<knit_config::ConfigError> for TraceError {
    fn from(err: knit_config::ConfigError) -> Self {
        TraceError::Config(err.to_string())
    }
}
