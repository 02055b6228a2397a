//! Trace engine scenarios: ordering, cycles, conditionals, bundles and
//! persistence.

mod common;

use std::fs;
use std::sync::Arc;

use common::{BASE_URL, config, names, setup, setup_with, tracer_for};
use knit_config::{MapTarget, PackageConfig};
use knit_graph::paths::path_to_file_url;
use knit_graph::{Conditional, ConditionalEnv, GraphError, ModuleFormat, TreeEntry, order};
use knit_trace::{
    FileSystemHost, HookKind, MemoryHost, ModuleSpec, NativeRuntime, Runtime, TraceError, TraceOptions,
    Tracer,
};
use tempfile::TempDir;

#[tokio::test]
async fn linear_chain_compiles_dependencies_first() {
    let (host, tracer) = setup();
    host.add("first", &["./second"]);
    host.add("second", &["./third"]);
    host.add("third", &[]);

    let tree = tracer
        .trace_module("first", &TraceOptions::default())
        .await
        .expect("trace");
    let compile = order(&tree, &["first"]).expect("order");

    assert_eq!(compile.modules, vec!["third", "second", "first"]);
    assert_eq!(compile.entry_points, vec!["first"]);
}

#[tokio::test]
async fn cycles_terminate() {
    let (host, tracer) = setup();
    host.add("a.js", &["./b.js"]);
    host.add("b.js", &["./a.js"]);

    let tree = tracer
        .trace_module("a.js", &TraceOptions::default())
        .await
        .expect("trace");

    assert_eq!(names(&tree), vec!["a.js", "b.js"]);
    assert_eq!(host.calls(HookKind::Fetch), 2);
    assert_eq!(order(&tree, &["a.js"]).expect("order").modules, vec!["b.js", "a.js"]);
}

#[tokio::test]
async fn system_modules_are_not_part_of_the_tree() {
    let (host, tracer) = setup();
    host.add("a.js", &["@empty", "@@cjs-helpers"]);

    let tree = tracer
        .trace_module("a.js", &TraceOptions::default())
        .await
        .expect("trace");

    assert_eq!(names(&tree), vec!["a.js"]);
    let record = tree.get("a.js").and_then(TreeEntry::record).expect("a.js");
    assert_eq!(record.dependencies(true), vec!["@empty", "@@cjs-helpers"]);
}

#[tokio::test]
async fn trace_entries_merges_roots() {
    let (host, tracer) = setup();
    host.add("a.js", &["./shared.js"]);
    host.add("b.js", &["./shared.js"]);
    host.add("shared.js", &[]);

    let tree = tracer
        .trace_entries(&["a.js", "b.js"], &TraceOptions::default())
        .await
        .expect("trace");

    assert_eq!(names(&tree), vec!["a.js", "b.js", "shared.js"]);
}

#[tokio::test]
async fn excluded_names_are_not_traced() {
    let (host, tracer) = setup();
    host.add("a.js", &["./b.js", "./vendor/jquery.js"]);
    host.add("b.js", &[]);

    let options = TraceOptions::default()
        .with_exclude("b.js")
        .with_exclude("vendor/*");
    let tree = tracer.trace_module("a.js", &options).await.expect("trace");

    assert_eq!(names(&tree), vec!["a.js"]);
}

fn boolean_fixture(host: &MemoryHost) {
    host.add("main.js", &["browser-impl.js#?env.js|browser"]);
    host.add("browser-impl.js", &[]);
    host.add("env.js", &[]);
}

#[tokio::test]
async fn boolean_conditional_follows_the_environment() {
    let (host, tracer) = setup();
    boolean_fixture(&host);

    let mut browser = ConditionalEnv::new();
    browser.insert("env.js|browser", true);
    let options = TraceOptions::default()
        .with_trace_all_conditionals(false)
        .with_conditions(browser);
    let tree = tracer.trace_module("main.js", &options).await.expect("browser");
    assert_eq!(
        names(&tree),
        vec!["browser-impl.js", "browser-impl.js#?env.js|browser", "env.js", "main.js"]
    );
    assert_eq!(
        tree.get("browser-impl.js#?env.js|browser")
            .and_then(TreeEntry::record)
            .and_then(|record| record.conditional.clone()),
        Some(Conditional::Boolean {
            condition: "env.js|browser".to_string(),
            branch: "browser-impl.js".to_string(),
        })
    );

    let mut server = ConditionalEnv::new();
    server.insert("env.js|browser", false);
    let options = TraceOptions::default()
        .with_trace_all_conditionals(false)
        .with_conditions(server);
    let tree = tracer.trace_module("main.js", &options).await.expect("server");
    assert_eq!(
        names(&tree),
        vec!["browser-impl.js#?env.js|browser", "env.js", "main.js"]
    );
}

#[tokio::test]
async fn unpinned_conditions_follow_trace_all() {
    let (host, tracer) = setup();
    boolean_fixture(&host);

    let all = tracer
        .trace_module("main.js", &TraceOptions::default())
        .await
        .expect("trace all");
    assert!(all.contains("browser-impl.js"));

    let none = tracer
        .trace_module(
            "main.js",
            &TraceOptions::default().with_trace_all_conditionals(false),
        )
        .await
        .expect("trace none");
    assert!(!none.contains("browser-impl.js"));
    assert!(none.contains("env.js"));
}

#[tokio::test]
async fn conditions_only_traces_condition_modules() {
    let (host, tracer) = setup();
    boolean_fixture(&host);

    let tree = tracer
        .trace_module(
            "main.js",
            &TraceOptions::default().with_conditions_only(true),
        )
        .await
        .expect("trace");

    assert_eq!(
        names(&tree),
        vec!["browser-impl.js#?env.js|browser", "env.js", "main.js"]
    );
}

#[tokio::test]
async fn contradictory_environment_is_rejected() {
    let (host, tracer) = setup();
    boolean_fixture(&host);

    let mut env = ConditionalEnv::new();
    env.insert("env.js|browser", true);
    env.insert("~env.js|browser", true);
    let err = tracer
        .trace_module("main.js", &TraceOptions::default().with_conditions(env))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TraceError::Graph(GraphError::ConditionalInconsistency(_))
    ));
    assert_eq!(host.calls(HookKind::Locate), 0);
}

#[tokio::test]
async fn package_environment_map_picks_branch_or_fallback() {
    let mut package = PackageConfig::default();
    package.map.insert(
        "./fs.js".to_string(),
        MapTarget::Conditional([("browser".to_string(), "./fs-browser.js".to_string())].into()),
    );
    let config = config()
        .with_path("npm:*", "jspm_packages/npm/*")
        .with_package("npm:pkg@1.0.0", package);
    let (host, tracer) = setup_with(&config);
    host.add("main.js", &["npm:pkg@1.0.0/#:./fs.js"]);
    host.add("jspm_packages/npm/pkg@1.0.0/fs.js", &[]);
    host.add("jspm_packages/npm/pkg@1.0.0/fs-browser.js", &[]);

    let mut browser = ConditionalEnv::new();
    browser.insert("@system-env|browser", true);
    let tree = tracer
        .trace_module(
            "main.js",
            &TraceOptions::default()
                .with_trace_all_conditionals(false)
                .with_conditions(browser),
        )
        .await
        .expect("browser");
    assert_eq!(
        names(&tree),
        vec!["main.js", "npm:pkg@1.0.0/#:./fs.js", "npm:pkg@1.0.0/fs-browser.js"]
    );

    let mut node = ConditionalEnv::new();
    node.insert("@system-env|browser", false);
    let tree = tracer
        .trace_module(
            "main.js",
            &TraceOptions::default()
                .with_trace_all_conditionals(false)
                .with_conditions(node),
        )
        .await
        .expect("node");
    assert_eq!(
        names(&tree),
        vec!["main.js", "npm:pkg@1.0.0/#:./fs.js", "npm:pkg@1.0.0/fs.js"]
    );
}

#[tokio::test]
async fn interpolation_globs_variations() {
    let (host, tracer) = setup();
    host.add("main.js", &["locale-#{env.js|lang}.js"]);
    host.add("env.js", &[]);
    host.add("locale-en.js", &[]);
    host.add("locale-de.js", &[]);

    let tree = tracer
        .trace_module("main.js", &TraceOptions::default())
        .await
        .expect("all variations");
    assert_eq!(
        names(&tree),
        vec![
            "env.js",
            "locale-#{env.js|lang}.js",
            "locale-de.js",
            "locale-en.js",
            "main.js",
        ]
    );

    let mut english = ConditionalEnv::new();
    english.insert("env.js|lang", ["en"]);
    let tree = tracer
        .trace_module("main.js", &TraceOptions::default().with_conditions(english))
        .await
        .expect("english only");
    assert!(tree.contains("locale-en.js"));
    assert!(!tree.contains("locale-de.js"));
}

#[tokio::test]
async fn prebuilt_bundles_satisfy_their_modules() {
    let (host, tracer) = setup();
    host.add_spec(
        "bundle.js",
        ModuleSpec::new(&["./dep.js"])
            .source(
                "System.register('a.js', [], function () {});\n\
                 System.register('b.js', ['a.js'], function () {});",
            )
            .format(ModuleFormat::Register)
            .metadata("bundle", serde_json::Value::Bool(true)),
    );
    host.add("dep.js", &[]);

    let tree = tracer
        .trace_module("bundle.js", &TraceOptions::default())
        .await
        .expect("trace");

    assert_eq!(tree.get("a.js"), Some(&TreeEntry::SatisfiedElsewhere));
    assert_eq!(tree.get("b.js"), Some(&TreeEntry::SatisfiedElsewhere));
    assert!(tree.get("dep.js").is_some_and(TreeEntry::is_present));
    assert_eq!(host.calls(HookKind::Fetch), 2);

    assert_eq!(
        order(&tree, &["bundle.js"]).expect("order").modules,
        vec!["dep.js", "bundle.js"]
    );
    assert!(matches!(
        order(&tree, &["a.js"]),
        Err(GraphError::BundleMembership { .. })
    ));
}

#[tokio::test]
async fn persisted_cache_is_reused() {
    let dir = TempDir::new().expect("tempdir");
    let cache_file = dir.path().join("trace-cache.json");

    let (host, tracer) = setup();
    host.add("a.js", &["./b.js"]);
    host.add("b.js", &[]);
    tracer
        .trace_module("a.js", &TraceOptions::default())
        .await
        .expect("first trace");
    tracer.save_cache(&cache_file).expect("save");

    let restored = tracer_for(&host, &config());
    assert!(restored.load_cache(&cache_file).expect("load"));
    let tree = restored
        .trace_module("a.js", &TraceOptions::default())
        .await
        .expect("second trace");

    assert_eq!(names(&tree), vec!["a.js", "b.js"]);
    assert_eq!(host.calls(HookKind::Fetch), 2);
}

#[tokio::test]
async fn canonical_name_normalizes_through_the_host() {
    let (_host, tracer) = setup();
    assert_eq!(
        tracer.canonical_name("app/main.js").await.expect("canonical"),
        "app/main.js"
    );
    assert_eq!(
        tracer
            .canonical_name(&format!("{}app/main.js", BASE_URL))
            .await
            .expect("canonical"),
        "app/main.js"
    );
}

#[tokio::test]
async fn file_system_host_traces_real_files() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("lib")).expect("mkdir");
    fs::write(
        dir.path().join("main.js"),
        "import { helper } from './lib/helper';\nexport default helper;\n",
    )
    .expect("write main");
    fs::write(
        dir.path().join("lib/helper.js"),
        "define(['require', './util'], function (require, util) { return util; });\n",
    )
    .expect("write helper");
    fs::write(
        dir.path().join("lib/util.js"),
        "module.exports = 1;\n",
    )
    .expect("write util");

    let base_url = format!("{}/", path_to_file_url(dir.path()));
    let config = knit_config::LoaderConfig::new(base_url).with_default_extension(".js");
    let runtime: Arc<dyn Runtime> = Arc::new(NativeRuntime::new(dir.path()));
    let hooks = Arc::new(FileSystemHost::new(&config, runtime.clone()));
    let tracer = Tracer::new(&config, hooks, runtime).expect("tracer");

    let tree = tracer
        .trace_module("main.js", &TraceOptions::default())
        .await
        .expect("trace");

    assert_eq!(names(&tree), vec!["lib/helper", "lib/util", "main.js"]);
    let helper = tree.get("lib/helper").and_then(TreeEntry::record).expect("helper");
    assert_eq!(helper.format, Some(ModuleFormat::Amd));
    assert_eq!(helper.path.as_deref(), Some("lib/helper.js"));
    assert!(helper.timestamp.is_some());
    assert_eq!(
        order(&tree, &["main.js"]).expect("order").modules,
        vec!["lib/util", "lib/helper", "main.js"]
    );
}

fn configured(cache_dir: &std::path::Path, enabled: bool) -> knit_config::KnitConfig {
    let mut config = knit_config::KnitConfig {
        loader: config(),
        ..Default::default()
    };
    config.cache.enabled = enabled;
    config.cache.dir = cache_dir.to_path_buf();
    config
}

#[tokio::test]
async fn configured_cache_round_trips_through_settings() {
    let dir = TempDir::new().expect("tempdir");
    let config = configured(dir.path(), true);

    let (host, _) = setup();
    host.add("a.js", &["./b.js"]);
    host.add("b.js", &[]);
    let runtime: Arc<dyn Runtime> = Arc::new(host.runtime().clone());

    let tracer = Tracer::from_config(&config, host.clone(), runtime.clone()).expect("tracer");
    assert_eq!(tracer.cache_file(), Some(config.cache.cache_file().as_path()));
    tracer
        .trace_module("a.js", tracer.options())
        .await
        .expect("first trace");
    assert!(tracer.persist_cache().expect("persist"));
    assert!(config.cache.cache_file().exists());

    let restored = Tracer::from_config(&config, host.clone(), runtime).expect("restored");
    assert_eq!(restored.cache().len(), 2);
    restored
        .trace_module("a.js", restored.options())
        .await
        .expect("second trace");
    assert_eq!(host.calls(HookKind::Fetch), 2);
}

#[tokio::test]
async fn disabled_cache_never_touches_the_cache_file() {
    let dir = TempDir::new().expect("tempdir");
    let config = configured(dir.path(), false);
    let cache_file = config.cache.cache_file();
    // Unreadable as a cache: loading it would fail.
    fs::write(&cache_file, "not json").expect("write");

    let (host, _) = setup();
    host.add("a.js", &[]);
    let runtime: Arc<dyn Runtime> = Arc::new(host.runtime().clone());

    let tracer = Tracer::from_config(&config, host.clone(), runtime).expect("tracer");
    assert_eq!(tracer.cache_file(), None);
    assert!(tracer.cache().is_empty());
    tracer
        .trace_module("a.js", tracer.options())
        .await
        .expect("trace");

    assert!(!tracer.persist_cache().expect("persist"));
    assert_eq!(fs::read_to_string(&cache_file).expect("read"), "not json");
}

#[tokio::test]
async fn configured_trace_settings_become_default_options() {
    let mut config = configured(std::path::Path::new("/unused"), false);
    config.trace.trace_all_conditionals = false;
    config.trace.exclude.push("vendor/*".to_string());
    config
        .trace
        .conditions
        .insert("env.js|browser".to_string(), false.into());

    let (host, _) = setup();
    boolean_fixture(&host);
    host.add("vendor/lib.js", &[]);
    host.add("app.js", &["./main.js", "./vendor/lib.js"]);
    let runtime: Arc<dyn Runtime> = Arc::new(host.runtime().clone());

    let tracer = Tracer::from_config(&config, host.clone(), runtime).expect("tracer");
    assert!(!tracer.options().trace_all_conditionals);
    assert!(!tracer.options().conditions.includes("env.js|browser", true));

    let tree = tracer
        .trace_module("app.js", tracer.options())
        .await
        .expect("trace");
    assert_eq!(
        names(&tree),
        vec!["app.js", "browser-impl.js#?env.js|browser", "env.js", "main.js"]
    );
}
