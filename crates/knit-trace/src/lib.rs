#![cfg_attr(docsrs, feature(doc_cfg))]

//! # knit-trace
//!
//! The I/O half of the knit trace engine, built on the pure graph model of
//! `knit-graph`.
//!
//! - [`Tracer`]: traces module trees through [`LoaderHooks`], with request
//!   coalescing and a freshness-checked [`TraceCache`]
//! - [`arithmetic`]: `+` / `-` / `&` expressions over traced trees
//! - [`host`]: ready-made hooks over a [`Runtime`]
//! - [`runtime`]: file system abstraction (native and in-memory)
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use knit_config::LoaderConfig;
//! use knit_trace::{FileSystemHost, NativeRuntime, TraceOptions, Tracer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoaderConfig::new("file:///project/").with_default_extension(".js");
//! let runtime = Arc::new(NativeRuntime::new("/project"));
//! let hooks = Arc::new(FileSystemHost::new(&config, runtime.clone()));
//!
//! let tracer = Tracer::new(&config, hooks, runtime)?;
//! let tree = tracer.trace_module("app/main.js", &TraceOptions::default()).await?;
//! let compile = knit_graph::order(&tree, &["app/main.js"])?;
//! println!("{:?}", compile.modules);
//! # Ok(()) }
//! ```

pub mod arithmetic;
pub mod cache;
pub mod error;
pub mod hooks;
pub mod host;
pub mod runtime;
pub mod trace;

mod pipeline;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

pub use arithmetic::{Operand, Operation, Operator, parse_expression, trace_expression};
pub use cache::TraceCache;
pub use error::{HookKind, Result, TraceError};
pub use hooks::{HookFailure, HookLoad, HookResult, Instantiated, LoadMetadata, LoaderHooks};
pub use host::{FileSystemHost, MemoryHost, ModuleSpec, detect_module};
pub use runtime::{
    FileMetadata, MemoryRuntime, NativeRuntime, Runtime, RuntimeError, RuntimeResult,
    glob_files,
};
pub use trace::{TraceOptions, Tracer};
