//! The resolution engine and its drain loop.
//!
//! `submit` appends to the queue. If nobody is draining, the caller becomes
//! the drain owner and runs every queued entity through the resolver chain,
//! head first, until the queue is empty. Submissions made while a drain is in
//! progress (including from inside resolvers) are appended and picked up by
//! that drain, so resolvers can never re-enter the loop.
//!
//! Concurrency contract: before resolving an entity the engine snapshots the
//! registry. Resolvers registered or removed while that entity is in flight
//! take effect from the next entity on.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};

use futures::FutureExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SysConfig;
use crate::entity::Entity;
use crate::fetch::{ModuleRegistry, ResourceFetcher, RoutingFetcher};
use crate::filter;
use crate::harmonize::Harmonizer;
use crate::loader;
use crate::registry;
use crate::report::{Report, ReportSink};
use crate::resolver::Outcome;
use crate::submission::Submission;

/// What happened to a submission.
#[derive(Debug, Clone)]
pub enum Submitted {
    /// Another drain was already running; it will process the submission.
    Queued,
    /// This call drained the queue. Carries the last entity processed, with
    /// every mutation resolvers made to it.
    Drained(Option<Entity>),
}

impl Submitted {
    pub fn is_queued(&self) -> bool {
        matches!(self, Submitted::Queued)
    }

    pub fn entity(self) -> Option<Entity> {
        match self {
            Submitted::Drained(entity) => entity,
            Submitted::Queued => None,
        }
    }
}

#[derive(Default)]
struct Pending {
    queue: VecDeque<Submission>,
    draining: bool,
}

struct SysInner {
    uuid: String,
    config: SysConfig,
    harmonizer: Harmonizer,
    fetcher: Arc<dyn ResourceFetcher>,
    pending: Mutex<Pending>,
    resolvers: RwLock<Vec<Entity>>,
    visited: Mutex<HashSet<String>>,
    reports: Option<Arc<ReportSink>>,
}

impl SysInner {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A pub/sub broker instance. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Sys(Arc<SysInner>);

/// Non-owning engine handle for background tasks.
#[derive(Clone)]
pub struct WeakSys(Weak<SysInner>);

impl WeakSys {
    pub fn upgrade(&self) -> Option<Sys> {
        self.0.upgrade().map(Sys)
    }
}

pub struct SysBuilder {
    config: SysConfig,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    modules: ModuleRegistry,
    reports: Option<Arc<ReportSink>>,
}

impl SysBuilder {
    /// Replace the default routing fetcher.
    pub fn with_fetcher(mut self, fetcher: impl ResourceFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Modules served to bare load references by the default fetcher.
    pub fn with_modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = modules;
        self
    }

    /// Keep every report in `sink` as well as logging it.
    pub fn capture_reports(mut self, sink: Arc<ReportSink>) -> Self {
        self.reports = Some(sink);
        self
    }

    pub fn build(self) -> Sys {
        let fetcher = self.fetcher.unwrap_or_else(|| {
            Arc::new(RoutingFetcher::new(self.config.http_timeout, self.modules))
        });
        let inner = SysInner {
            uuid: format!("orbital/sys/{}", Uuid::new_v4()),
            harmonizer: Harmonizer::from_config(&self.config),
            config: self.config,
            fetcher,
            pending: Mutex::new(Pending::default()),
            resolvers: RwLock::new(vec![
                registry::registry_resolver(),
                registry::obliterate_resolver(),
                loader::load_resolver(),
            ]),
            visited: Mutex::new(HashSet::new()),
            reports: self.reports,
        };
        info!(sys = inner.uuid.as_str(), "Engine created");
        Sys(Arc::new(inner))
    }
}

impl Sys {
    pub fn new(config: SysConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: SysConfig) -> SysBuilder {
        SysBuilder {
            config,
            fetcher: None,
            modules: ModuleRegistry::new(),
            reports: None,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.0.uuid
    }

    pub fn config(&self) -> &SysConfig {
        &self.0.config
    }

    pub fn harmonizer(&self) -> &Harmonizer {
        &self.0.harmonizer
    }

    pub fn fetcher(&self) -> &dyn ResourceFetcher {
        self.0.fetcher.as_ref()
    }

    pub fn downgrade(&self) -> WeakSys {
        WeakSys(Arc::downgrade(&self.0))
    }

    /// Submit one entity, a batch, or any JSON value.
    ///
    /// Returns [`Submitted::Queued`] when a drain is already in progress;
    /// otherwise drains the queue and returns the last entity processed.
    pub async fn submit(&self, item: impl Into<Submission>) -> Submitted {
        {
            let mut pending = self.0.pending();
            pending.queue.push_back(item.into());
            if pending.draining {
                return Submitted::Queued;
            }
            pending.draining = true;
        }
        Submitted::Drained(self.drain().await)
    }

    /// Submit several items at once, in order.
    pub async fn submit_all<I, T>(&self, items: I) -> Submitted
    where
        I: IntoIterator<Item = T>,
        T: Into<Submission>,
    {
        let batch: Vec<Submission> = items.into_iter().map(Into::into).collect();
        self.submit(Submission::Batch(batch)).await
    }

    /// Queue `items` directly behind the entity currently being resolved,
    /// ahead of everything else already waiting, keeping their order.
    ///
    /// Outside a drain it is an ordinary submission.
    pub async fn inject(&self, items: Vec<Submission>) -> Submitted {
        {
            let mut pending = self.0.pending();
            if pending.draining {
                let at = pending.queue.len().min(1);
                for (offset, item) in items.into_iter().enumerate() {
                    pending.queue.insert(at + offset, item);
                }
                return Submitted::Queued;
            }
        }
        self.submit(Submission::Batch(items)).await
    }

    pub fn queue_len(&self) -> usize {
        self.0.pending().queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.0.pending().draining
    }

    /// Snapshot of the active resolver chain, in invocation order.
    pub fn resolvers(&self) -> Vec<Entity> {
        self.0
            .resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn with_registry<R>(&self, f: impl FnOnce(&mut Vec<Entity>) -> R) -> R {
        let mut resolvers = self
            .0
            .resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut resolvers)
    }

    /// Record `resource` as fetched. Returns false if it already was.
    pub fn mark_visited(&self, resource: &str) -> bool {
        self.0
            .visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.to_string())
    }

    pub fn visited(&self, resource: &str) -> bool {
        self.0
            .visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(resource)
    }

    /// Log a report and keep it if a sink is attached.
    pub fn report(&self, report: Report) {
        report.log(&self.0.uuid);
        if let Some(sink) = &self.0.reports {
            sink.record(report);
        }
    }

    async fn drain(&self) -> Option<Entity> {
        let mut guard = DrainGuard {
            inner: &self.0,
            finished: false,
        };
        let mut last = None;

        loop {
            let head = {
                let mut pending = self.0.pending();
                match pending.queue.front() {
                    None => {
                        pending.draining = false;
                        guard.finished = true;
                        return last;
                    }
                    Some(Submission::Entity(entity)) => Ok(entity.clone()),
                    Some(_) => match pending.queue.pop_front() {
                        Some(Submission::Batch(items)) => {
                            for item in items.into_iter().rev() {
                                pending.queue.push_front(item);
                            }
                            continue;
                        }
                        other => Err(other),
                    },
                }
            };

            match head {
                Ok(entity) => {
                    self.resolve_entity(&entity).await;
                    self.remove_head(&entity);
                    last = Some(entity);
                }
                Err(Some(Submission::Callable(_))) => self.report(Report::CallableUnsupported),
                Err(Some(Submission::Scalar(value))) => self.report(Report::NotAnEntity {
                    found: value.to_string(),
                }),
                Err(_) => self.report(Report::NoData),
            }
        }
    }

    /// Run one entity through a snapshot of the chain.
    ///
    /// Each invocation is isolated: an error or panic is reported and the
    /// next resolver still runs.
    async fn resolve_entity(&self, entity: &Entity) {
        let chain = self.resolvers();
        debug!(sys = self.uuid(), entity = %entity.label(), resolvers = chain.len(), "Resolving");

        for registered in chain {
            let Some(resolver) = registered.resolver() else {
                continue;
            };
            if !filter::matches(entity, resolver.filter()) {
                continue;
            }

            let invocation = AssertUnwindSafe(resolver.invoke(entity, self))
                .catch_unwind()
                .await;
            let failure = match invocation {
                Ok(Ok(Outcome::Continue)) => None,
                Ok(Ok(Outcome::ForceAbort)) => {
                    debug!(
                        entity = %entity.label(),
                        resolver = %registered.label(),
                        "Chain aborted"
                    );
                    break;
                }
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(reason) = failure {
                self.report(Report::ResolverFailed {
                    resolver: registered.label(),
                    entity: entity.label(),
                    reason,
                });
            }
        }
    }

    /// Injections land behind the head, so the entity just resolved is
    /// still at the front.
    fn remove_head(&self, entity: &Entity) {
        let head = self.0.pending().queue.pop_front();
        debug_assert!(
            head.as_ref()
                .and_then(Submission::as_entity)
                .is_some_and(|h| h.same(entity)),
            "queue head moved while resolving {}",
            entity.label()
        );
    }
}

/// Clears the busy flag if a drain is dropped or unwinds part way, so the
/// next submission picks up whatever was left in the queue.
struct DrainGuard<'a> {
    inner: &'a SysInner,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut pending = self.inner.pending();
            pending.draining = false;
            warn!(
                sys = self.inner.uuid.as_str(),
                left = pending.queue.len(),
                "Drain abandoned"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Process-wide default engine, configured from the environment on first use.
pub fn global() -> &'static Sys {
    static GLOBAL: OnceLock<Sys> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let config = SysConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid orbital environment, using defaults");
            SysConfig::default()
        });
        Sys::new(config)
    })
}
