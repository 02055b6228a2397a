//! Load record pipeline.
//!
//! Turns a canonical name into a cache entry: reuse a fresh cached record,
//! synthesize a conditional record, or run locate → fetch → translate →
//! instantiate through the hooks. Concurrent requests for the same name share
//! one computation.

use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use knit_config::MapTarget;
use knit_graph::paths::{file_url_to_path, join_url, path_to_file_url};
use knit_graph::{
    Canonicalizer, Conditional, EnvBranch, LoadRecord, TreeEntry, expand_condition_key,
    split_interpolation,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use crate::cache::TraceCache;
use crate::error::{HookKind, Result, TraceError};
use crate::hooks::{HookFailure, HookLoad, LoaderHooks};
use crate::runtime::{Runtime, glob_files};

type SharedLoad = Shared<BoxFuture<'static, Result<TreeEntry>>>;

/// Shared state behind a [`Tracer`](crate::Tracer).
pub(crate) struct Pipeline {
    pub(crate) hooks: Arc<dyn LoaderHooks>,
    pub(crate) runtime: Arc<dyn Runtime>,
    pub(crate) canonicalizer: Canonicalizer,
    pub(crate) config_hash: String,
    pub(crate) cache: Mutex<TraceCache>,
    in_flight: Mutex<FxHashMap<String, SharedLoad>>,
}

/// Identity of the load a hook failure belongs to.
struct LoadContext<'a> {
    canonical: &'a str,
    normalized: &'a str,
    parents: &'a [String],
}

impl LoadContext<'_> {
    fn error(&self, hook: HookKind, failure: HookFailure) -> TraceError {
        TraceError::Hook {
            hook,
            canonical: self.canonical.to_string(),
            normalized: self.normalized.to_string(),
            parents: self.parents.to_vec(),
            message: failure.0,
        }
    }
}

impl Pipeline {
    pub(crate) fn new(
        hooks: Arc<dyn LoaderHooks>,
        runtime: Arc<dyn Runtime>,
        canonicalizer: Canonicalizer,
        config_hash: String,
    ) -> Self {
        Self {
            hooks,
            runtime,
            canonicalizer,
            config_hash,
            cache: Mutex::new(TraceCache::new()),
            in_flight: Mutex::new(FxHashMap::default()),
        }
    }

    /// The cache entry for `canonical`, computing it if the cached one is
    /// missing or stale. `parents` is the chain of modules that led here,
    /// outermost first, used for error reporting.
    pub(crate) async fn get_load_record(
        self: &Arc<Self>,
        canonical: &str,
        parents: &[String],
    ) -> Result<TreeEntry> {
        if let Some(entry) = self.cached_fresh(canonical).await {
            trace!(module = canonical, "Reusing cached load record");
            return Ok(entry);
        }

        let shared = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(canonical) {
                Some(shared) => shared.clone(),
                None => {
                    let shared = self.spawn_load(canonical.to_string(), parents.to_vec());
                    in_flight.insert(canonical.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    fn spawn_load(self: &Arc<Self>, canonical: String, parents: Vec<String>) -> SharedLoad {
        let pipeline = Arc::clone(self);
        async move {
            let result = pipeline.compute(&canonical, &parents).await;
            if let Ok(entry) = &result {
                pipeline.cache.lock().insert(canonical.clone(), entry.clone());
            }
            pipeline.in_flight.lock().remove(&canonical);
            result
        }
        .boxed()
        .shared()
    }

    async fn cached_fresh(&self, canonical: &str) -> Option<TreeEntry> {
        let mut record = match self.cache.lock().get(canonical) {
            Some(TreeEntry::Present(record)) => record.clone(),
            _ => return None,
        };
        if !self.is_fresh(&record).await {
            return None;
        }

        record.fresh = true;
        if let Some(cached) = self.cache.lock().get_mut(canonical).and_then(TreeEntry::record_mut) {
            cached.fresh = true;
        }
        Some(TreeEntry::Present(record))
    }

    /// Whether a cached record can be reused without running the hooks.
    fn is_fresh<'a>(&'a self, record: &'a LoadRecord) -> BoxFuture<'a, bool> {
        async move {
            if record.is_conditional() || record.config_hash != self.config_hash {
                return false;
            }
            if record.fresh {
                return true;
            }

            let (Some(path), Some(timestamp)) = (record.path.as_deref(), record.timestamp) else {
                return false;
            };
            let Some(file) = self.file_path(path) else {
                return false;
            };
            match self.runtime.metadata(&file).await {
                Ok(metadata) if metadata.modified == Some(timestamp) => {}
                _ => return false,
            }

            let Some(plugin) = record.plugin.as_deref() else {
                return true;
            };
            let plugin_record = match self.cache.lock().get(plugin) {
                Some(TreeEntry::Present(plugin)) => plugin.clone(),
                Some(_) => return true,
                None => return false,
            };
            self.is_fresh(&plugin_record).await
        }
        .boxed()
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        file_url_to_path(&join_url(self.canonicalizer.base_url(), path))
    }

    async fn compute(&self, canonical: &str, parents: &[String]) -> Result<TreeEntry> {
        let normalized = self.canonicalizer.decanonicalize(canonical);
        let context = LoadContext {
            canonical,
            normalized: &normalized,
            parents,
        };

        if self.hooks.has(&normalized) {
            debug!(module = canonical, "Module provided by the host registry");
            return Ok(TreeEntry::Excluded);
        }

        if let Some(index) = canonical.rfind("#?") {
            let conditional = Conditional::Boolean {
                condition: canonical[index + 2..].to_string(),
                branch: canonical[..index].to_string(),
            };
            return Ok(self.conditional_record(canonical, conditional));
        }

        if !canonical.contains('!') {
            if let Some(index) = canonical.find("#:") {
                let conditional = self.environment_map(&context, &canonical[..index], &canonical[index + 2..])?;
                return Ok(self.conditional_record(canonical, conditional));
            }
            if let Some((before, condition, after)) = split_interpolation(canonical) {
                let conditional = self.interpolation(&context, before, condition, after).await?;
                return Ok(self.conditional_record(canonical, conditional));
            }
        }

        self.load(&context).await
    }

    fn conditional_record(&self, canonical: &str, conditional: Conditional) -> TreeEntry {
        debug!(module = canonical, "Built conditional record");
        TreeEntry::Present(LoadRecord::conditional(
            canonical,
            conditional,
            self.config_hash.clone(),
        ))
    }

    /// `pkg/#:./sub` → the package's environment map for `./sub`.
    fn environment_map(
        &self,
        context: &LoadContext<'_>,
        package: &str,
        subpath: &str,
    ) -> Result<Conditional> {
        let root = package.trim_end_matches('/');
        let map = match self.canonicalizer.package(root).and_then(|config| config.map.get(subpath)) {
            Some(MapTarget::Conditional(map)) => map,
            _ => {
                return Err(context.error(
                    HookKind::Locate,
                    HookFailure(format!("No environment map for {} in package {}", subpath, root)),
                ));
            }
        };

        let resolve = |target: &str| -> Result<String> {
            match target.strip_prefix("./") {
                Some(relative) => Ok(format!("{}/{}", root, relative)),
                None => Ok(self
                    .canonicalizer
                    .canonicalize(&self.canonicalizer.decanonicalize(target), false)?),
            }
        };

        let mut envs = Vec::with_capacity(map.len());
        for (condition, target) in map {
            envs.push(EnvBranch {
                condition: self
                    .canonicalizer
                    .canonicalize_condition(&expand_condition_key(condition))?,
                branch: resolve(target)?,
            });
        }

        Ok(Conditional::Environment {
            envs,
            fallback: Some(resolve(subpath)?),
        })
    }

    /// `a-#{cond}.js` → one branch per file matching `a-*.js`.
    async fn interpolation(
        &self,
        context: &LoadContext<'_>,
        before: &str,
        condition: &str,
        after: &str,
    ) -> Result<Conditional> {
        let address = self
            .canonicalizer
            .decanonicalize(&format!("{}*{}", before, after));
        let path = file_url_to_path(&address)
            .map(|path| path.to_string_lossy().into_owned())
            .ok_or_else(|| {
                context.error(
                    HookKind::Locate,
                    HookFailure(format!("Unable to glob {}: not a file: address", address)),
                )
            })?;

        let star = path.find('*').unwrap_or(path.len());
        let dir_end = path[..star].rfind('/').map_or(0, |index| index + 1);
        let (prefix, suffix) = (&path[..star], path.get(star + 1..).unwrap_or_default());

        let files = glob_files(
            self.runtime.as_ref(),
            std::path::Path::new(&path[..dir_end]),
            &path[dir_end..],
        )
        .await
        .map_err(|err| context.error(HookKind::Locate, err.into()))?;

        let mut branches = BTreeMap::new();
        for file in files {
            let file_str = file.to_string_lossy();
            let Some(label) = file_str
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
            else {
                continue;
            };
            let branch = self
                .canonicalizer
                .canonicalize(&path_to_file_url(&file), false)?;
            branches.insert(label.to_string(), branch);
        }

        Ok(Conditional::Interpolation {
            condition: condition.to_string(),
            branches,
        })
    }

    /// locate → fetch → translate → instantiate.
    async fn load(&self, context: &LoadContext<'_>) -> Result<TreeEntry> {
        let hooks = self.hooks.as_ref();
        let mut load = HookLoad::new(context.normalized);

        let address = hooks
            .locate(&mut load)
            .await
            .map_err(|e| context.error(HookKind::Locate, e))?;
        load.address = Some(address.clone());
        if !load.metadata.build {
            debug!(module = context.canonical, "Module opted out of the build");
            return Ok(TreeEntry::Excluded);
        }

        let (path, timestamp) = self.stat(&address).await;

        let source = hooks
            .fetch(&mut load)
            .await
            .map_err(|e| context.error(HookKind::Fetch, e))?;
        load.source = Some(source);

        let translated = hooks
            .translate(&mut load)
            .await
            .map_err(|e| context.error(HookKind::Translate, e))?;
        load.source = Some(translated);

        let instantiated = hooks
            .instantiate(&mut load)
            .await
            .map_err(|e| context.error(HookKind::Instantiate, e))?
            .ok_or_else(|| {
                context.error(
                    HookKind::Instantiate,
                    HookFailure::new("Native modules are not supported"),
                )
            })?;

        let mut builder = LoadRecord::builder(context.canonical)
            .source(load.source.take().unwrap_or_default())
            .config_hash(self.config_hash.clone())
            .fresh(true);
        if let Some(format) = load.metadata.format {
            builder = builder.format(format);
        }
        if let (Some(path), Some(timestamp)) = (path, timestamp) {
            builder = builder.path(path).timestamp(timestamp);
        }

        for dep in instantiated.deps {
            let normalized = hooks
                .normalize(&dep, Some(context.normalized), Some(&address))
                .await
                .map_err(|e| context.error(HookKind::Normalize, e))?;
            let canonical = self.canonicalizer.canonicalize(&normalized, false)?;
            builder = builder.dep(dep, canonical);
        }

        if let Some(plugin) = self.plugin_of(context.canonical) {
            builder = builder.plugin(plugin, load.metadata.runtime_plugin);
        }
        for (key, value) in std::mem::take(&mut load.metadata.extra) {
            builder = builder.metadata(key, value);
        }

        let record = builder.build();
        debug!(
            module = context.canonical,
            format = record.format.map(|f| f.as_str()),
            deps = record.deps.len(),
            "Computed load record"
        );
        Ok(TreeEntry::Present(record))
    }

    /// Base-relative path and modification time of a `file:` address under
    /// the base URL.
    async fn stat(&self, address: &str) -> (Option<String>, Option<u64>) {
        let base_url = self.canonicalizer.base_url();
        let Some(relative) = address.strip_prefix(base_url) else {
            return (None, None);
        };
        let Some(file) = file_url_to_path(address) else {
            return (None, None);
        };
        match self.runtime.metadata(&file).await {
            Ok(metadata) => (Some(relative.to_string()), metadata.modified),
            Err(_) => (None, None),
        }
    }

    fn plugin_of<'a>(&self, canonical: &'a str) -> Option<&'a str> {
        if self.canonicalizer.plugin_first() {
            canonical.split_once('!').map(|(plugin, _)| plugin)
        } else {
            canonical.rsplit_once('!').map(|(_, plugin)| plugin)
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("runtime", &self.runtime)
            .field("config_hash", &self.config_hash)
            .field("cached", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}
