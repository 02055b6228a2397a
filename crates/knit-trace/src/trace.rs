//! Trace engine.
//!
//! Expands a root module into the [`ResolvedTree`] of everything it depends
//! on. Siblings are traced concurrently and every name is expanded once, so
//! cycles terminate. Any load failure aborts the whole trace.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use globset::{Glob, GlobSet, GlobSetBuilder};
use knit_config::{CacheSettings, KnitConfig, LoaderConfig, TraceSettings};
use knit_graph::{
    Canonicalizer, ConditionalEnv, LoadRecord, ResolvedTree, TreeEntry, conditional_dependencies,
    is_system_module,
};
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::{Instrument, debug, info, info_span};

use crate::cache::TraceCache;
use crate::error::{HookKind, Result, TraceError};
use crate::hooks::LoaderHooks;
use crate::pipeline::Pipeline;
use crate::runtime::Runtime;

static BUNDLE_REGISTER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?:System|SystemJS)\.register(?:Dynamic)?\(\s*['"]([^'"]+)['"]"#).ok()
});
static BUNDLE_DEFINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"\bdefine\(\s*['"]([^'"]+)['"]"#).ok());

/// Options for a single trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    /// Include branches of conditions the environment does not pin.
    pub trace_all_conditionals: bool,
    /// Canonical conditional environment.
    pub conditions: ConditionalEnv,
    /// Follow only the condition modules of conditional records, not their
    /// branches.
    pub conditions_only: bool,
    /// Trace runtime plugins as dependencies of the modules they load.
    pub trace_runtime_plugin: bool,
    /// Canonical names (or `*` globs over them) never traced.
    pub exclude: Vec<String>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            trace_all_conditionals: true,
            conditions: ConditionalEnv::new(),
            conditions_only: false,
            trace_runtime_plugin: true,
            exclude: Vec::new(),
        }
    }
}

impl TraceOptions {
    /// Build options from configuration, canonicalizing the environment.
    pub fn from_settings(settings: &TraceSettings, canonicalizer: &Canonicalizer) -> Result<Self> {
        Ok(Self {
            trace_all_conditionals: settings.trace_all_conditionals,
            conditions: ConditionalEnv::canonicalize(&settings.conditions, canonicalizer)?,
            conditions_only: false,
            trace_runtime_plugin: settings.trace_runtime_plugin,
            exclude: settings.exclude.clone(),
        })
    }

    pub fn with_conditions(mut self, conditions: ConditionalEnv) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_trace_all_conditionals(mut self, trace_all: bool) -> Self {
        self.trace_all_conditionals = trace_all;
        self
    }

    pub fn with_conditions_only(mut self, conditions_only: bool) -> Self {
        self.conditions_only = conditions_only;
        self
    }

    pub fn with_exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    fn exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern).map_err(|e| {
                TraceError::Config(format!("Invalid exclude pattern {}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| TraceError::Config(format!("Invalid exclude patterns: {}", e)))
    }
}

/// State shared by every branch of one trace.
struct TraceState<'o> {
    options: &'o TraceOptions,
    exclude: GlobSet,
    claimed: Mutex<FxHashSet<String>>,
    tree: Mutex<ResolvedTree>,
}

impl TraceState<'_> {
    /// Claim a name for expansion. Returns `false` if it is already claimed.
    fn claim(&self, name: &str) -> bool {
        self.claimed.lock().insert(name.to_string())
    }
}

/// Traces module trees through a set of loader hooks.
///
/// Cloning is cheap and clones share the trace cache.
#[derive(Debug, Clone)]
pub struct Tracer {
    pipeline: Arc<Pipeline>,
    options: TraceOptions,
    /// Persisted cache location, when caching is enabled in settings.
    cache_file: Option<PathBuf>,
}

impl Tracer {
    /// Create a tracer for a configuration snapshot. Starts a fresh session
    /// on an empty cache.
    pub fn new(
        config: &LoaderConfig,
        hooks: Arc<dyn LoaderHooks>,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = Pipeline::new(
            hooks,
            runtime,
            Canonicalizer::new(config),
            config.fingerprint(),
        );
        Ok(Self {
            pipeline: Arc::new(pipeline),
            options: TraceOptions::default(),
            cache_file: None,
        })
    }

    /// Create a tracer from a full configuration.
    ///
    /// Trace settings become the default [`options`](Self::options). With
    /// `cache.enabled`, the persisted cache is loaded from
    /// [`CacheSettings::cache_file`] (relative to the runtime's working
    /// directory) and [`persist_cache`](Self::persist_cache) writes it back.
    /// With caching disabled no cache file is touched.
    pub fn from_config(
        config: &KnitConfig,
        hooks: Arc<dyn LoaderHooks>,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Self> {
        let cache_file = cache_location(&config.cache, runtime.as_ref())?;
        let mut tracer = Self::new(&config.loader, hooks, runtime)?;
        tracer.options = TraceOptions::from_settings(&config.trace, tracer.canonicalizer())?;

        if let Some(path) = cache_file {
            if tracer.load_cache(&path)? {
                debug!(path = %path.display(), "Loaded persisted trace cache");
            }
            tracer.cache_file = Some(path);
        }
        Ok(tracer)
    }

    /// Options derived from configuration; the defaults for [`Tracer::new`].
    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Where [`persist_cache`](Self::persist_cache) writes, if anywhere.
    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    /// Save the cache to the configured location. Returns `false` without
    /// writing when caching is disabled.
    pub fn persist_cache(&self) -> Result<bool> {
        match &self.cache_file {
            Some(path) => {
                self.save_cache(path)?;
                debug!(path = %path.display(), "Persisted trace cache");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the trace cache, e.g. with one loaded from disk.
    pub fn with_cache(self, mut cache: TraceCache) -> Self {
        cache.start_session();
        *self.pipeline.cache.lock() = cache;
        self
    }

    /// Snapshot of the trace cache.
    pub fn cache(&self) -> TraceCache {
        self.pipeline.cache.lock().clone()
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.pipeline.canonicalizer
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.pipeline.runtime
    }

    /// Fingerprint stamped on every record built by this tracer.
    pub fn config_hash(&self) -> &str {
        &self.pipeline.config_hash
    }

    /// Start a new session: cached records are re-validated before reuse.
    pub fn new_session(&self) {
        self.pipeline.cache.lock().start_session();
    }

    /// Drop one cached record.
    pub fn invalidate(&self, canonical: &str) {
        self.pipeline.cache.lock().invalidate(canonical);
    }

    /// Load a persisted cache, if any. Returns whether one was found.
    pub fn load_cache(&self, path: &Path) -> Result<bool> {
        match TraceCache::load(path)? {
            Some(mut cache) => {
                cache.start_session();
                *self.pipeline.cache.lock() = cache;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn save_cache(&self, path: &Path) -> Result<()> {
        let cache = self.cache();
        cache.save(path)
    }

    /// Normalize a user-facing module name and canonicalize it.
    pub async fn canonical_name(&self, name: &str) -> Result<String> {
        let normalized = self
            .pipeline
            .hooks
            .normalize(name, None, None)
            .await
            .map_err(|e| TraceError::Hook {
                hook: HookKind::Normalize,
                canonical: name.to_string(),
                normalized: name.to_string(),
                parents: Vec::new(),
                message: e.0,
            })?;
        Ok(self.pipeline.canonicalizer.canonicalize(&normalized, false)?)
    }

    /// The cache entry for one canonical name, loading it if needed.
    pub async fn get_load_record(&self, canonical: &str) -> Result<TreeEntry> {
        self.pipeline.get_load_record(canonical, &[]).await
    }

    /// Trace `root` and everything it depends on.
    pub async fn trace_module(&self, root: &str, options: &TraceOptions) -> Result<ResolvedTree> {
        self.trace_entries(&[root], options).await
    }

    /// Trace several roots into one tree.
    pub async fn trace_entries<S: AsRef<str>>(
        &self,
        roots: &[S],
        options: &TraceOptions,
    ) -> Result<ResolvedTree> {
        options.conditions.validate()?;
        let state = TraceState {
            options,
            exclude: options.exclude_set()?,
            claimed: Mutex::new(FxHashSet::default()),
            tree: Mutex::new(ResolvedTree::new()),
        };

        let span = info_span!("trace", roots = roots.len());
        async {
            try_join_all(
                roots
                    .iter()
                    .map(|root| self.visit(&state, root.as_ref().to_string(), Vec::new())),
            )
            .await
        }
        .instrument(span)
        .await?;

        let tree = state.tree.into_inner();
        info!(
            roots = ?roots.iter().map(AsRef::as_ref).collect::<Vec<&str>>(),
            modules = tree.len(),
            bundled = tree
                .iter()
                .filter(|(_, entry)| matches!(entry, TreeEntry::SatisfiedElsewhere))
                .count(),
            "Traced module tree"
        );
        Ok(tree)
    }

    fn visit<'a>(
        &'a self,
        state: &'a TraceState<'a>,
        name: String,
        parents: Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if is_system_module(&name) || state.exclude.is_match(&name) || !state.claim(&name) {
                return Ok(());
            }

            let entry = self.pipeline.get_load_record(&name, &parents).await?;
            let options = state.options;
            let mut deps: Vec<String> = match entry.record() {
                Some(record) => match &record.conditional {
                    Some(conditional) => conditional_dependencies(
                        conditional,
                        &options.conditions,
                        options.trace_all_conditionals,
                        options.conditions_only,
                    ),
                    None => record
                        .dependencies(options.trace_runtime_plugin)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                },
                None => Vec::new(),
            };

            if parents.is_empty() {
                if let Some(record) = entry.record().filter(|record| record.is_bundle()) {
                    let bundled = bundled_names(record);
                    debug!(module = %name, bundled = bundled.len(), "Root is a prebuilt bundle");
                    let mut tree = state.tree.lock();
                    for bundled_name in &bundled {
                        if *bundled_name != name && state.claim(bundled_name) {
                            tree.insert(bundled_name.clone(), TreeEntry::SatisfiedElsewhere);
                        }
                    }
                    deps.retain(|dep| !bundled.contains(dep));
                }
            }

            state.tree.lock().insert(name.clone(), entry);

            let mut chain = parents;
            chain.push(name);
            try_join_all(
                deps.into_iter()
                    .map(|dep| self.visit(state, dep, chain.clone())),
            )
            .await?;
            Ok(())
        }
        .boxed()
    }
}

fn cache_location(settings: &CacheSettings, runtime: &dyn Runtime) -> Result<Option<PathBuf>> {
    if !settings.enabled {
        return Ok(None);
    }
    let file = settings.cache_file();
    if file.is_absolute() {
        return Ok(Some(file));
    }
    Ok(Some(runtime.get_cwd()?.join(file)))
}

/// Module names registered by a prebuilt bundle's source.
fn bundled_names(record: &LoadRecord) -> Vec<String> {
    let source = record.source.as_deref().unwrap_or_default();
    let mut names: Vec<String> = Vec::new();
    for re in [&BUNDLE_REGISTER, &BUNDLE_DEFINE] {
        let Some(re) = LazyLock::force(re).as_ref() else {
            continue;
        };
        for caps in re.captures_iter(source) {
            let name = caps[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}
