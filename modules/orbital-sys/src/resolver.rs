//! The resolver contract.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::engine::Sys;
use crate::entity::{is_truthy, Entity};
use crate::filter::Filter;

/// Reserved result field that stops the chain for the current entity.
pub const FORCE_ABORT: &str = "force_abort_sys";

/// Observes, and may mutate, every entity that passes its filter.
///
/// Resolvers run one at a time, in registry order. They may submit more
/// entities, register or remove resolvers, or load resources through the
/// engine handle they are given.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome>;
}

/// What the chain should do after a resolver returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Continue,
    /// Skip the remaining resolvers for this entity only.
    ForceAbort,
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Continue
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        match value.get(FORCE_ABORT) {
            Some(flag) if is_truthy(flag) => Outcome::ForceAbort,
            _ => Outcome::Continue,
        }
    }
}

/// A resolve capability plus its registration annotations.
///
/// Two resolvers are resolve-equal when they share the same handler
/// allocation; cloning a `Resolver` keeps that equality.
#[derive(Clone)]
pub struct Resolver {
    handler: Arc<dyn Resolve>,
    filter: Option<Filter>,
    before: Option<String>,
    after: Option<String>,
}

impl Resolver {
    pub fn new(handler: impl Resolve + 'static) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<dyn Resolve>) -> Self {
        Self {
            handler,
            filter: None,
            before: None,
            after: None,
        }
    }

    /// Adapt an async closure. The closure receives owned handles.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Entity, Sys) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        Self::new(FnResolver(f))
    }

    /// Only invoke for entities that own every listed field.
    pub fn with_filter<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.filter = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Insert ahead of the resolver whose uuid is `token`.
    pub fn with_before(mut self, token: impl Into<String>) -> Self {
        self.before = Some(token.into());
        self
    }

    /// Insert right behind the resolver whose uuid is `token`.
    pub fn with_after(mut self, token: impl Into<String>) -> Self {
        self.after = Some(token.into());
        self
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn before(&self) -> Option<&str> {
        self.before.as_deref()
    }

    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    pub fn same_handler(&self, other: &Resolver) -> bool {
        Arc::ptr_eq(&self.handler, &other.handler)
    }

    pub async fn invoke(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        self.handler.resolve(entity, sys).await
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("filter", &self.filter)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

struct FnResolver<F>(F);

#[async_trait]
impl<F, Fut> Resolve for FnResolver<F>
where
    F: Fn(Entity, Sys) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        (self.0)(entity.clone(), sys.clone()).await
    }
}
