//! In-process publish/subscribe broker.
//!
//! Entities are submitted to a [`Sys`] and pass, one at a time and in
//! arrival order, through a chain of resolvers that observe and mutate them.
//! Resolvers are entities too: submitting one registers it. Entities with a
//! `load` field pull more entities in from manifests and modules.

pub mod config;
pub mod engine;
pub mod entity;
pub mod fetch;
pub mod filter;
pub mod harmonize;
pub mod loader;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod submission;

pub use config::SysConfig;
pub use engine::{global, Submitted, Sys, SysBuilder, WeakSys};
pub use entity::{is_truthy, Entity, LoadFieldError, Method, Provenance, WeakEntity};
pub use fetch::{
    ExportFactory, Exports, FetchError, FileFetcher, HttpFetcher, Module, ModuleRegistry,
    ResourceFetcher, RoutingFetcher,
};
pub use filter::Filter;
pub use harmonize::{HarmonizeError, Harmonizer};
pub use report::{Report, ReportSink};
pub use resolver::{Outcome, Resolve, Resolver, FORCE_ABORT};
pub use submission::Submission;
