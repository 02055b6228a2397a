//! Ready-made loader hosts.
//!
//! [`FileSystemHost`] serves modules from a [`Runtime`] using the loader
//! configuration for name resolution and light pattern matching for format and
//! dependency detection. [`MemoryHost`] declares modules and their
//! dependencies up front and counts hook calls.

use async_trait::async_trait;
use knit_config::{LoaderConfig, MapTarget};
use knit_graph::paths::{file_url_to_path, is_absolute_url, resolve_relative};
use knit_graph::{Canonicalizer, ModuleFormat, is_system_module};
use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use crate::error::HookKind;
use crate::hooks::{HookFailure, HookLoad, HookResult, Instantiated, LoaderHooks};
use crate::runtime::{MemoryRuntime, Runtime};

static REGISTER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"\bSystem\.register(?:Dynamic)?\s*\(\s*(?:['"]([^'"]+)['"]\s*,\s*)?\[([^\]]*)\]"#).ok()
});
static AMD_DEFINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^.\w$])define\s*\(\s*(?:['"][^'"]+['"]\s*,\s*)?(?:\[([^\]]*)\])?"#).ok()
});
static ESM_DEPENDENCY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import|export)\s+(?:[^'";]*?\s+from\s+)?['"]([^'"]+)['"]"#).ok()
});
static ESM_SYNTAX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:import\s*[\w{*'\x22]|export\s+)").ok());
static CJS_REQUIRE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^.\w$])require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).ok()
});
static CJS_EXPORTS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:^|[^.\w$])(?:module\.exports|exports\.\w+)\s*=").ok());
static STRING_LITERAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).ok());

fn compiled(re: &'static LazyLock<Option<Regex>>) -> Option<&'static Regex> {
    LazyLock::force(re).as_ref()
}

const AMD_SPECIAL_DEPS: [&str; 3] = ["require", "exports", "module"];

fn string_literals(list: &str) -> Vec<String> {
    compiled(&STRING_LITERAL)
        .map(|re| {
            re.captures_iter(list)
                .map(|caps| caps[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn push_unique(deps: &mut Vec<String>, dep: String) {
    if !deps.contains(&dep) {
        deps.push(dep);
    }
}

/// Detect the format of `source` and list its dependency specifiers.
///
/// `declared` takes precedence over detection. This is a line-oriented
/// heuristic; hosts with a real parser should implement `instantiate`
/// themselves.
pub fn detect_module(
    address: &str,
    source: &str,
    declared: Option<ModuleFormat>,
) -> (ModuleFormat, Vec<String>) {
    let detect = |re: &'static LazyLock<Option<Regex>>| {
        compiled(re).is_some_and(|re| re.is_match(source))
    };

    let format = declared.unwrap_or_else(|| {
        if address.ends_with(".json") {
            ModuleFormat::Json
        } else if detect(&REGISTER) {
            ModuleFormat::Register
        } else if detect(&ESM_SYNTAX) {
            ModuleFormat::Esm
        } else if detect(&AMD_DEFINE) {
            ModuleFormat::Amd
        } else if detect(&CJS_REQUIRE) || detect(&CJS_EXPORTS) {
            ModuleFormat::Cjs
        } else {
            ModuleFormat::Global
        }
    });

    let mut deps = Vec::new();
    match format {
        ModuleFormat::Register => {
            if let Some(re) = compiled(&REGISTER) {
                for caps in re.captures_iter(source) {
                    for dep in string_literals(caps.get(2).map_or("", |m| m.as_str())) {
                        push_unique(&mut deps, dep);
                    }
                }
            }
        }
        ModuleFormat::Esm => {
            if let Some(re) = compiled(&ESM_DEPENDENCY) {
                for caps in re.captures_iter(source) {
                    push_unique(&mut deps, caps[1].to_string());
                }
            }
        }
        ModuleFormat::Amd => {
            if let Some(re) = compiled(&AMD_DEFINE) {
                for caps in re.captures_iter(source) {
                    for dep in string_literals(caps.get(1).map_or("", |m| m.as_str())) {
                        if !AMD_SPECIAL_DEPS.contains(&dep.as_str()) {
                            push_unique(&mut deps, dep);
                        }
                    }
                }
            }
        }
        ModuleFormat::Cjs => {
            if let Some(re) = compiled(&CJS_REQUIRE) {
                for caps in re.captures_iter(source) {
                    push_unique(&mut deps, caps[1].to_string());
                }
            }
        }
        ModuleFormat::Global | ModuleFormat::Defined | ModuleFormat::Json => {}
    }

    (format, deps)
}

/// Whether `source` registers more than one named module.
fn is_named_bundle(source: &str) -> bool {
    compiled(&REGISTER).is_some_and(|re| {
        re.captures_iter(source)
            .filter(|caps| caps.get(1).is_some())
            .take(2)
            .count()
            > 1
    })
}

fn split_plugin(name: &str, plugin_first: bool) -> Option<(&str, &str)> {
    let index = if plugin_first { name.find('!') } else { name.rfind('!') }?;
    let (left, right) = (&name[..index], &name[index + 1..]);
    Some(if plugin_first { (right, left) } else { (left, right) })
}

fn has_extension(address: &str) -> bool {
    address
        .rsplit('/')
        .next()
        .is_some_and(|file| file.contains('.'))
}

/// Host reading modules through a [`Runtime`].
#[derive(Debug, Clone)]
pub struct FileSystemHost {
    runtime: Arc<dyn Runtime>,
    canonicalizer: Canonicalizer,
    plugin_first: bool,
    registry: FxHashSet<String>,
}

impl FileSystemHost {
    pub fn new(config: &LoaderConfig, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            canonicalizer: Canonicalizer::new(config),
            plugin_first: config.plugin_first,
            registry: FxHashSet::default(),
        }
    }

    /// Normalized names the host provides without loading.
    pub fn with_registry<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.extend(names.into_iter().map(Into::into));
        self
    }

    fn resolve(&self, name: &str, parent_address: Option<&str>) -> String {
        if is_system_module(name) || is_absolute_url(name) {
            return name.to_string();
        }
        let address = if name.starts_with("./") || name.starts_with("../") {
            let base = parent_address.unwrap_or(self.canonicalizer.base_url());
            resolve_relative(base, name)
        } else {
            self.canonicalizer.decanonicalize(name)
        };
        self.apply_package_map(address)
    }

    /// Route an address through its package's `map`.
    fn apply_package_map(&self, address: String) -> String {
        let Some((_, package_address, package)) = self.canonicalizer.package_for(&address) else {
            return address;
        };
        let subpath = format!(".{}", &address[package_address.len()..]);
        match package.map.get(&subpath) {
            Some(MapTarget::Alias(target)) if target.starts_with("./") => {
                resolve_relative(&format!("{}/", package_address), target)
            }
            Some(MapTarget::Alias(target)) => self.resolve(target, None),
            Some(MapTarget::Conditional(_)) => format!("{}/#:{}", package_address, subpath),
            None => address,
        }
    }
}

#[async_trait]
impl LoaderHooks for FileSystemHost {
    async fn normalize(
        &self,
        name: &str,
        _parent: Option<&str>,
        parent_address: Option<&str>,
    ) -> HookResult<String> {
        if let Some((module, plugin)) = split_plugin(name, self.plugin_first) {
            let module = self.resolve(module, parent_address);
            let plugin = self.resolve(plugin, parent_address);
            return Ok(if self.plugin_first {
                format!("{}!{}", plugin, module)
            } else {
                format!("{}!{}", module, plugin)
            });
        }
        Ok(self.resolve(name, parent_address))
    }

    fn has(&self, normalized: &str) -> bool {
        is_system_module(normalized) || self.registry.contains(normalized)
    }

    async fn locate(&self, load: &mut HookLoad) -> HookResult<String> {
        let module = split_plugin(&load.name, self.plugin_first)
            .map_or(load.name.as_str(), |(module, _)| module);
        let mut address = module.to_string();
        if let Some(ext) = self.canonicalizer.default_extension() {
            if !has_extension(&address) {
                address.push_str(ext);
            }
        }
        Ok(address)
    }

    async fn fetch(&self, load: &mut HookLoad) -> HookResult<String> {
        let address = load.address();
        let path = file_url_to_path(address)
            .ok_or_else(|| HookFailure(format!("Unable to fetch {}: not a file: address", address)))?;
        let bytes = self.runtime.read_file(&path).await?;
        String::from_utf8(bytes)
            .map_err(|_| HookFailure(format!("{} is not valid UTF-8", path.display())))
    }

    async fn instantiate(&self, load: &mut HookLoad) -> HookResult<Option<Instantiated>> {
        let (format, deps) = detect_module(load.address(), load.source(), load.metadata.format);
        if format == ModuleFormat::Register && is_named_bundle(load.source()) {
            load.metadata.extra.insert("bundle".to_string(), Value::Bool(true));
        }
        load.metadata.format = Some(format);
        Ok(Some(Instantiated { deps }))
    }
}

/// Declaration of one [`MemoryHost`] module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSpec {
    pub source: String,
    pub deps: Vec<String>,
    pub format: ModuleFormat,
    /// `false` opts the module out in `locate`.
    pub build: bool,
    /// Loads through this module as a plugin keep it as a runtime dependency.
    pub runtime_plugin: bool,
    /// `None` from `instantiate`.
    pub native: bool,
    pub metadata: Map<String, Value>,
}

impl ModuleSpec {
    pub fn new(deps: &[&str]) -> Self {
        Self {
            source: String::new(),
            deps: deps.iter().map(|dep| dep.to_string()).collect(),
            format: ModuleFormat::Esm,
            build: true,
            runtime_plugin: false,
            native: false,
            metadata: Map::new(),
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn format(mut self, format: ModuleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn build(mut self, build: bool) -> Self {
        self.build = build;
        self
    }

    pub fn runtime_plugin(mut self, runtime_plugin: bool) -> Self {
        self.runtime_plugin = runtime_plugin;
        self
    }

    pub fn native(mut self, native: bool) -> Self {
        self.native = native;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Default)]
struct HookCounters {
    normalize: AtomicUsize,
    locate: AtomicUsize,
    fetch: AtomicUsize,
    translate: AtomicUsize,
    instantiate: AtomicUsize,
}

impl HookCounters {
    fn get(&self, hook: HookKind) -> &AtomicUsize {
        match hook {
            HookKind::Normalize => &self.normalize,
            HookKind::Locate => &self.locate,
            HookKind::Fetch => &self.fetch,
            HookKind::Translate => &self.translate,
            HookKind::Instantiate => &self.instantiate,
        }
    }
}

/// Host with declared modules, backed by a [`MemoryRuntime`].
///
/// Module names given to [`add`](MemoryHost::add) are relative to the base
/// URL, whose path is mirrored into the runtime so stat-based freshness
/// works. Every hook call is counted and `fetch` yields to the executor once
/// so concurrent loads interleave.
#[derive(Debug)]
pub struct MemoryHost {
    base_url: String,
    runtime: MemoryRuntime,
    modules: RwLock<FxHashMap<String, ModuleSpec>>,
    registry: RwLock<FxHashSet<String>>,
    failures: RwLock<FxHashSet<String>>,
    counters: HookCounters,
}

impl MemoryHost {
    pub fn new(base_url: impl Into<String>, runtime: MemoryRuntime) -> Self {
        Self {
            base_url: base_url.into(),
            runtime,
            modules: RwLock::new(FxHashMap::default()),
            registry: RwLock::new(FxHashSet::default()),
            failures: RwLock::new(FxHashSet::default()),
            counters: HookCounters::default(),
        }
    }

    pub fn runtime(&self) -> &MemoryRuntime {
        &self.runtime
    }

    pub fn address(&self, name: &str) -> String {
        format!("{}{}", self.base_url, name)
    }

    /// Declare an ES module `name` importing `deps`.
    pub fn add(&self, name: &str, deps: &[&str]) {
        self.add_spec(name, ModuleSpec::new(deps));
    }

    pub fn add_spec(&self, name: &str, mut spec: ModuleSpec) {
        let address = self.address(name);
        if spec.source.is_empty() {
            spec.source = format!("// {}", name);
        }
        if let Some(path) = file_url_to_path(&address) {
            self.runtime.add_file(path, spec.source.clone());
        }
        self.modules.write().insert(address, spec);
    }

    /// Bump the modification time of `name`'s backing file.
    pub fn touch(&self, name: &str) -> bool {
        file_url_to_path(&self.address(name)).is_some_and(|path| self.runtime.touch(path))
    }

    /// Treat the normalized name as provided by the host registry.
    pub fn register(&self, normalized: impl Into<String>) {
        self.registry.write().insert(normalized.into());
    }

    /// Make `fetch` fail for `name` until [`clear_failures`](Self::clear_failures).
    pub fn fail(&self, name: &str) {
        self.failures.write().insert(self.address(name));
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    pub fn calls(&self, hook: HookKind) -> usize {
        self.counters.get(hook).load(Ordering::SeqCst)
    }

    fn count(&self, hook: HookKind) {
        self.counters.get(hook).fetch_add(1, Ordering::SeqCst);
    }

    fn resolve(&self, name: &str, parent_address: Option<&str>) -> String {
        if is_system_module(name) || is_absolute_url(name) {
            name.to_string()
        } else if name.starts_with("./") || name.starts_with("../") {
            resolve_relative(parent_address.unwrap_or(&self.base_url), name)
        } else {
            self.address(name)
        }
    }
}

#[async_trait]
impl LoaderHooks for MemoryHost {
    async fn normalize(
        &self,
        name: &str,
        _parent: Option<&str>,
        parent_address: Option<&str>,
    ) -> HookResult<String> {
        self.count(HookKind::Normalize);
        if let Some((module, plugin)) = split_plugin(name, false) {
            return Ok(format!(
                "{}!{}",
                self.resolve(module, parent_address),
                self.resolve(plugin, parent_address)
            ));
        }
        Ok(self.resolve(name, parent_address))
    }

    fn has(&self, normalized: &str) -> bool {
        is_system_module(normalized) || self.registry.read().contains(normalized)
    }

    async fn locate(&self, load: &mut HookLoad) -> HookResult<String> {
        self.count(HookKind::Locate);
        let (module, plugin) = match split_plugin(&load.name, false) {
            Some((module, plugin)) => (module.to_string(), Some(plugin.to_string())),
            None => (load.name.clone(), None),
        };

        let modules = self.modules.read();
        if let Some(spec) = modules.get(&module) {
            load.metadata.build = spec.build;
        }
        if let Some(plugin) = plugin.and_then(|plugin| modules.get(&plugin)) {
            load.metadata.runtime_plugin = plugin.runtime_plugin;
        }
        Ok(module)
    }

    async fn fetch(&self, load: &mut HookLoad) -> HookResult<String> {
        self.count(HookKind::Fetch);
        tokio::task::yield_now().await;

        let address = load.address().to_string();
        if self.failures.read().contains(&address) {
            return Err(HookFailure(format!("Unable to fetch {}", address)));
        }
        let Some(path) = file_url_to_path(&address) else {
            return Err(HookFailure(format!("Module not found: {}", address)));
        };
        let bytes = self
            .runtime
            .read_file(&path)
            .await
            .map_err(|_| HookFailure(format!("Module not found: {}", address)))?;
        String::from_utf8(bytes).map_err(|_| HookFailure(format!("{} is not valid UTF-8", address)))
    }

    async fn translate(&self, load: &mut HookLoad) -> HookResult<String> {
        self.count(HookKind::Translate);
        Ok(load.source().to_string())
    }

    async fn instantiate(&self, load: &mut HookLoad) -> HookResult<Option<Instantiated>> {
        self.count(HookKind::Instantiate);
        let modules = self.modules.read();
        let Some(spec) = modules.get(load.address()) else {
            let (format, deps) = detect_module(load.address(), load.source(), None);
            load.metadata.format = Some(format);
            return Ok(Some(Instantiated { deps }));
        };
        if spec.native {
            return Ok(None);
        }
        load.metadata.format = Some(spec.format);
        load.metadata
            .extra
            .extend(spec.metadata.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(Some(Instantiated {
            deps: spec.deps.clone(),
        }))
    }
}
