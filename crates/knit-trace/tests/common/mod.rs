//! Shared fixtures: a tracer over a [`MemoryHost`] rooted at `/project`.

#![allow(dead_code)]

use std::sync::Arc;

use knit_config::LoaderConfig;
use knit_graph::ResolvedTree;
use knit_trace::{MemoryHost, MemoryRuntime, Runtime, Tracer};

pub const BASE_URL: &str = "file:///project/";

pub fn config() -> LoaderConfig {
    LoaderConfig::new(BASE_URL)
}

pub fn setup() -> (Arc<MemoryHost>, Tracer) {
    setup_with(&config())
}

pub fn setup_with(config: &LoaderConfig) -> (Arc<MemoryHost>, Tracer) {
    let host = Arc::new(MemoryHost::new(BASE_URL, MemoryRuntime::new("/project")));
    let tracer = tracer_for(&host, config);
    (host, tracer)
}

/// A second tracer over the same host and files.
pub fn tracer_for(host: &Arc<MemoryHost>, config: &LoaderConfig) -> Tracer {
    let runtime: Arc<dyn Runtime> = Arc::new(host.runtime().clone());
    Tracer::new(config, host.clone(), runtime).expect("valid config")
}

pub fn names(tree: &ResolvedTree) -> Vec<&str> {
    tree.names().collect()
}
