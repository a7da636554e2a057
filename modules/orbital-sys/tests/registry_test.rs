//! Registry behaviour as seen through a live engine.

use std::sync::{Arc, Mutex};

use orbital_sys::{Entity, Outcome, Report, ReportSink, Resolver, Sys, SysConfig};
use serde_json::json;

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(name: &'static str, log: &Log) -> Resolver {
    let log = log.clone();
    Resolver::from_fn(move |entity, _| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(format!("{name}:{}", entity.label()));
            Ok(Outcome::Continue)
        }
    })
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

/// User resolvers only, in chain order.
fn chain(sys: &Sys) -> Vec<String> {
    sys.resolvers()
        .iter()
        .map(Entity::label)
        .filter(|uuid| !uuid.starts_with("orbital/sys/"))
        .collect()
}

fn test_sys() -> (Sys, Arc<ReportSink>) {
    let sink = Arc::new(ReportSink::new());
    let sys = Sys::builder(SysConfig::new("/"))
        .capture_reports(sink.clone())
        .build();
    (sys, sink)
}

#[tokio::test]
async fn default_chain_is_registry_obliterate_load() {
    let (sys, _) = test_sys();
    let uuids: Vec<String> = sys.resolvers().iter().map(Entity::label).collect();
    assert_eq!(
        uuids,
        vec!["orbital/sys/resolve", "orbital/sys/obliterate", "orbital/sys/load"]
    );
}

#[tokio::test]
async fn alpha_beta_charlie_scenario() {
    let (sys, sink) = test_sys();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    // alpha only cares about graceful entities.
    let alpha = Entity::new()
        .with("uuid", "alpha")
        .with_resolver(recorder("alpha", &log).with_filter(["graceful"]));
    sys.submit(alpha.clone()).await;
    assert_eq!(chain(&sys), vec!["alpha"]);
    assert!(take(&log).is_empty());

    // beta has no filter but does not see its own registration pass.
    let beta = Entity::new()
        .with("uuid", "beta")
        .with("clumsy", true)
        .with_resolver(recorder("beta", &log));
    sys.submit(beta).await;
    assert_eq!(chain(&sys), vec!["alpha", "beta"]);
    assert!(take(&log).is_empty());

    // charlie jumps ahead of alpha.
    let charlie = Entity::new().with("uuid", "charlie").with_resolver(
        recorder("charlie", &log)
            .with_filter(["happy"])
            .with_before("alpha"),
    );
    sys.submit(charlie).await;
    assert_eq!(chain(&sys), vec!["charlie", "alpha", "beta"]);
    assert_eq!(take(&log), vec!["beta:charlie"]);

    sys.submit(json!({"uuid": "happy", "happy": true})).await;
    assert_eq!(take(&log), vec!["charlie:happy", "beta:happy"]);

    // Presence, not value, opens the filter gate.
    sys.submit(json!({"uuid": "x"})).await;
    assert_eq!(take(&log), vec!["beta:x"]);
    sys.submit(json!({"uuid": "x", "graceful": false})).await;
    assert_eq!(take(&log), vec!["alpha:x", "beta:x"]);

    // Removing alpha by uuid; everyone still registered sees the request.
    sys.submit(json!({"uuid": "alpha", "obliterate": true})).await;
    assert_eq!(chain(&sys), vec!["charlie", "beta"]);
    assert_eq!(take(&log), vec!["beta:alpha"]);

    sys.submit(json!({"uuid": "y", "graceful": true})).await;
    assert_eq!(take(&log), vec!["beta:y"]);
    assert!(sink.is_empty(), "unexpected reports: {:?}", sink.reports());
}

#[tokio::test]
async fn duplicate_resolve_capability_is_reported() {
    let (sys, sink) = test_sys();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let shared = recorder("shared", &log);

    sys.submit(Entity::new().with("uuid", "first").with_resolver(shared.clone()))
        .await;
    sys.submit(Entity::new().with("uuid", "second").with_resolver(shared))
        .await;

    assert_eq!(chain(&sys), vec!["first"]);
    assert_eq!(
        sink.reports(),
        vec![Report::DuplicateResolver {
            resolver: "second".into()
        }]
    );
}

#[tokio::test]
async fn resubmitting_the_same_resolver_entity_does_not_grow_the_chain() {
    let (sys, sink) = test_sys();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let entity = Entity::new()
        .with("uuid", "once")
        .with_resolver(recorder("once", &log));

    sys.submit(entity.clone()).await;
    sys.submit(entity).await;

    assert_eq!(chain(&sys), vec!["once"]);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn obliterating_a_resolver_entity_removes_exactly_one_entry() {
    let (sys, sink) = test_sys();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let doomed = Entity::new()
        .with("uuid", "doomed")
        .with_resolver(recorder("doomed", &log));
    let keeper = Entity::new()
        .with("uuid", "keeper")
        .with_resolver(recorder("keeper", &log));

    sys.submit(doomed.clone()).await;
    sys.submit(keeper).await;

    doomed.set("obliterate", true);
    sys.submit(doomed.clone()).await;
    assert_eq!(chain(&sys), vec!["keeper"]);

    sys.submit(doomed).await;
    assert_eq!(chain(&sys), vec!["keeper"]);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn contradictory_hints_are_rejected() {
    let (sys, sink) = test_sys();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    sys.submit(
        Entity::new()
            .with("uuid", "a")
            .with_resolver(recorder("a", &log).with_after("b")),
    )
    .await;
    sys.submit(
        Entity::new()
            .with("uuid", "b")
            .with_resolver(recorder("b", &log).with_after("a")),
    )
    .await;

    assert_eq!(chain(&sys), vec!["a"]);
    assert!(matches!(
        sink.reports().as_slice(),
        [Report::OrderConflict { resolver, .. }] if resolver == "b"
    ));
}

#[tokio::test]
async fn after_hint_places_the_newcomer_behind_its_target() {
    let (sys, _) = test_sys();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    for uuid in ["one", "two"] {
        sys.submit(
            Entity::new()
                .with("uuid", uuid)
                .with_resolver(recorder("r", &log)),
        )
        .await;
    }
    sys.submit(
        Entity::new()
            .with("uuid", "between")
            .with_resolver(recorder("between", &log).with_after("one")),
    )
    .await;

    assert_eq!(chain(&sys), vec!["one", "between", "two"]);
}
