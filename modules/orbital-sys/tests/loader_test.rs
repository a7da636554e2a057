//! Integration tests for the dynamic loader, using manifests written to a
//! temporary root directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orbital_sys::{
    Entity, Exports, FetchError, FileFetcher, Module, ModuleRegistry, Outcome, Report, ReportSink,
    ResourceFetcher, Resolver, Sys, SysConfig,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

fn write_manifest(dir: &Path, name: &str, manifest: Value) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
}

fn path_of(dir: &TempDir, name: &str) -> String {
    format!("{}/{name}", dir.path().display())
}

/// Register a resolver that logs the uuid of every entity it sees.
async fn watch(sys: &Sys) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let watcher = Resolver::from_fn(move |entity, _| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(entity.label());
            Ok(Outcome::Continue)
        }
    });
    sys.submit(Entity::new().with("uuid", "watcher").with_resolver(watcher))
        .await;
    log.lock().unwrap().clear();
    log
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn file_sys(dir: &TempDir) -> (Sys, Arc<ReportSink>) {
    let sink = Arc::new(ReportSink::new());
    let sys = Sys::builder(SysConfig::new(dir.path()))
        .capture_reports(sink.clone())
        .build();
    (sys, sink)
}

struct CountingFetcher {
    inner: FileFetcher,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ResourceFetcher for CountingFetcher {
    async fn fetch(&self, resource: &str) -> Result<Exports, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(resource).await
    }
}

// =========================================================================
// Manifests on disk
// =========================================================================

#[tokio::test]
async fn loaded_exports_run_ahead_of_queued_traffic() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(
        dir.path(),
        "a.json",
        json!({
            "first": {"uuid": "one"},
            "nested": {"uuid": "nexter", "load": "./b.json"}
        }),
    );
    write_manifest(dir.path(), "b.json", json!({"leaf": {"uuid": "leaf"}}));

    let (sys, sink) = file_sys(&dir);
    let log = watch(&sys).await;

    sys.submit_all(vec![
        json!({"uuid": "loader", "load": "./a.json"}),
        json!({"uuid": "later"}),
    ])
    .await;

    assert!(sink.is_empty(), "unexpected reports: {:?}", sink.reports());
    assert_eq!(
        entries(&log),
        vec!["loader", "one", "nexter", "leaf", "later"]
    );
}

#[tokio::test]
async fn exports_carry_provenance() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "a.json", json!({"first": {"uuid": "one"}}));

    let (sys, _) = file_sys(&dir);
    let captured: Arc<Mutex<Option<Entity>>> = Arc::new(Mutex::new(None));
    let slot = captured.clone();
    sys.submit(
        Entity::new().with("uuid", "catcher").with_resolver(
            Resolver::from_fn(move |entity, _| {
                let slot = slot.clone();
                async move {
                    if entity.uuid().as_deref() == Some("one") {
                        *slot.lock().unwrap() = Some(entity);
                    }
                    Ok(Outcome::Continue)
                }
            }),
        ),
    )
    .await;

    sys.submit(json!({"load": "./a.json"})).await;

    let one = captured.lock().unwrap().clone().expect("export was resolved");
    let provenance = one.provenance().expect("export is stamped");
    assert_eq!(provenance.key, "first");
    assert_eq!(provenance.anchor, path_of(&dir, "a.json"));
    assert_eq!(one.to_json()["_metadata"]["key"], json!("first"));
}

#[tokio::test]
async fn trailing_slash_loads_the_directory_index() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "index.json", json!({"root": {"uuid": "from-root"}}));
    write_manifest(dir.path(), "pkg/index.json", json!({"pkg": {"uuid": "from-pkg"}}));

    let (sys, sink) = file_sys(&dir);
    let log = watch(&sys).await;

    sys.submit(json!({"uuid": "boot", "load": ["./", "./pkg/"]})).await;

    assert!(sink.is_empty(), "unexpected reports: {:?}", sink.reports());
    assert_eq!(entries(&log), vec!["boot", "from-root", "from-pkg"]);
    assert!(sys.visited(&path_of(&dir, "index.json")));
    assert!(sys.visited(&path_of(&dir, "pkg/index.json")));
}

#[tokio::test]
async fn explicit_anchor_is_the_base_for_relative_references() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "nested/c.json", json!({"c": {"uuid": "see"}}));

    let (sys, _) = file_sys(&dir);
    let log = watch(&sys).await;

    let anchor = format!("{}/nested/", dir.path().display());
    sys.submit(json!({"uuid": "anchored", "anchor": anchor, "load": "./c.json"}))
        .await;

    assert_eq!(entries(&log), vec!["anchored", "see"]);
}

#[tokio::test]
async fn each_resource_is_fetched_once_per_engine() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "a.json", json!({"x": {"uuid": "x"}}));

    let calls = Arc::new(AtomicUsize::new(0));
    let sys = Sys::builder(SysConfig::new(dir.path()))
        .with_fetcher(CountingFetcher {
            inner: FileFetcher,
            calls: calls.clone(),
        })
        .build();
    let log = watch(&sys).await;

    sys.submit(json!({"uuid": "first", "load": "./a.json"})).await;
    sys.submit(json!({"uuid": "second", "load": ["./a.json", "./a.json"]}))
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["first", "x", "second"]);

    // A fresh engine keeps its own record.
    let other = Sys::builder(SysConfig::new(dir.path()))
        .with_fetcher(CountingFetcher {
            inner: FileFetcher,
            calls: calls.clone(),
        })
        .build();
    other.submit(json!({"load": "./a.json"})).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn relative_root_resolves_nested_loads() {
    // A root given relative to the working directory, as `--root site` would.
    let dir = tempfile::Builder::new()
        .prefix("relative-root")
        .tempdir_in(".")
        .unwrap();
    assert!(dir.path().is_relative());
    write_manifest(
        dir.path(),
        "a.json",
        json!({"nested": {"uuid": "nexter", "load": "./sub/b.json"}}),
    );
    write_manifest(
        dir.path(),
        "sub/b.json",
        json!({"leaf": {"uuid": "leaf", "load": "./c.json"}}),
    );
    write_manifest(dir.path(), "sub/c.json", json!({"deep": {"uuid": "deep"}}));

    let sink = Arc::new(ReportSink::new());
    let sys = Sys::builder(SysConfig::new(dir.path()))
        .capture_reports(sink.clone())
        .build();
    let log = watch(&sys).await;

    sys.submit(json!({"uuid": "boot", "load": "./a.json"})).await;

    assert!(sink.is_empty(), "unexpected reports: {:?}", sink.reports());
    assert_eq!(entries(&log), vec!["boot", "nexter", "leaf", "deep"]);
    let absolute = std::path::absolute(dir.path()).unwrap();
    assert!(sys.visited(&format!("{}/sub/c.json", absolute.display())));
}

// =========================================================================
// Failures
// =========================================================================

#[tokio::test]
async fn failed_fetch_does_not_block_sibling_references() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(dir.path(), "ok.json", json!({"ok": {"uuid": "fine"}}));

    let (sys, sink) = file_sys(&dir);
    let log = watch(&sys).await;

    sys.submit(json!({"uuid": "boot", "load": ["./missing.json", "./ok.json"]}))
        .await;

    assert_eq!(entries(&log), vec!["boot", "fine"]);
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0],
        Report::FetchFailed { resource, .. } if *resource == path_of(&dir, "missing.json")
    ));
}

#[tokio::test]
async fn references_above_the_root_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (sys, sink) = file_sys(&dir);

    sys.submit(json!({"load": "../outside.json"})).await;
    sys.submit(json!({"load": "/etc/passwd"})).await;

    let reports = sink.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports
        .iter()
        .all(|r| matches!(r, Report::Unresolvable { .. })));
}

#[tokio::test]
async fn malformed_load_field_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (sys, sink) = file_sys(&dir);
    let log = watch(&sys).await;

    sys.submit(json!({"uuid": "odd", "load": 5})).await;
    sys.submit(json!({"uuid": "off", "load": false})).await;

    assert_eq!(entries(&log), vec!["odd", "off"]);
    assert!(matches!(
        sink.reports().as_slice(),
        [Report::BadLoadField { entity, .. }] if entity == "odd"
    ));
}

#[tokio::test]
async fn null_exports_are_reported_and_siblings_survive() {
    let dir = tempfile::tempdir().unwrap();
    write_manifest(
        dir.path(),
        "mixed.json",
        json!({
            "good": {"uuid": "good"},
            "broken": null,
            "list": [null, {"uuid": "listed"}]
        }),
    );

    let (sys, sink) = file_sys(&dir);
    let log = watch(&sys).await;

    sys.submit(json!({"uuid": "boot", "load": "./mixed.json"})).await;

    assert_eq!(entries(&log), vec!["boot", "good", "listed"]);
    let keys: Vec<String> = sink
        .reports()
        .into_iter()
        .filter_map(|r| match r {
            Report::CorruptExport { key, .. } => Some(key),
            _ => None,
        })
        .collect();
    assert_eq!(keys, vec!["broken", "list"]);
}

// =========================================================================
// In-process modules
// =========================================================================

fn greeter() -> Entity {
    Entity::new().with("uuid", "demo/greeter").with_resolver(
        Resolver::from_fn(|entity, _| async move {
            entity.set("greeted", true);
            Ok(Outcome::Continue)
        })
        .with_filter(["greet"]),
    )
}

fn greeter_modules() -> ModuleRegistry {
    ModuleRegistry::new().with_module("demo/greeter", Module::new().export("greeter", greeter))
}

fn registered(sys: &Sys, uuid: &str) -> Option<Entity> {
    sys.resolvers()
        .into_iter()
        .find(|r| r.uuid().as_deref() == Some(uuid))
}

#[tokio::test]
async fn modules_can_export_resolvers() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(ReportSink::new());
    let sys = Sys::builder(SysConfig::new(dir.path()))
        .with_modules(greeter_modules())
        .capture_reports(sink.clone())
        .build();

    sys.submit(json!({"load": "demo/greeter"})).await;
    let guest = sys
        .submit(json!({"uuid": "guest", "greet": true}))
        .await
        .entity()
        .unwrap();

    assert!(sink.is_empty(), "unexpected reports: {:?}", sink.reports());
    assert_eq!(guest.get("greeted"), Some(json!(true)));
    let entry = registered(&sys, "demo/greeter").expect("greeter registered");
    assert_eq!(entry.provenance().unwrap().anchor, "demo/greeter");
}

#[tokio::test]
async fn engines_sharing_modules_get_their_own_exports() {
    let modules = greeter_modules();
    let dir = tempfile::tempdir().unwrap();
    let one = Sys::builder(SysConfig::new(dir.path()))
        .with_modules(modules.clone())
        .build();
    let two = Sys::builder(SysConfig::new(dir.path()))
        .with_modules(modules)
        .build();

    one.submit(json!({"load": "demo/greeter"})).await;
    two.submit(json!({"load": "demo/greeter"})).await;

    let in_one = registered(&one, "demo/greeter").expect("registered in one");
    let in_two = registered(&two, "demo/greeter").expect("registered in two");
    assert!(!in_one.same(&in_two));
    let (handler_one, handler_two) = (in_one.resolver().unwrap(), in_two.resolver().unwrap());
    assert!(!handler_one.same_handler(&handler_two));

    in_one.set("mutated_in_one", true);
    assert_eq!(in_two.get("mutated_in_one"), None);

    // Obliterating in one engine leaves the other untouched.
    one.submit(json!({"uuid": "demo/greeter", "obliterate": true}))
        .await;
    assert!(registered(&one, "demo/greeter").is_none());
    assert!(registered(&two, "demo/greeter").is_some());
}

#[tokio::test]
async fn unknown_module_is_a_fetch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (sys, sink) = file_sys(&dir);

    sys.submit(json!({"load": "demo/nowhere"})).await;

    assert!(matches!(
        sink.reports().as_slice(),
        [Report::FetchFailed { resource, .. }] if resource == "demo/nowhere"
    ));
}
