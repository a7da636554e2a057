//! Reported problems.
//!
//! Nothing the engine reports is fatal: the offending element, resource or
//! registration is dropped and processing continues. Every report is logged;
//! a `ReportSink` additionally keeps them for inspection.

use std::sync::{Mutex, PoisonError};

use tracing::{error, warn};

use crate::harmonize::HarmonizeError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Report {
    // Malformed input: the element is discarded.
    #[error("no data error: empty queue element")]
    NoData,

    #[error("callables are not supported as queue elements")]
    CallableUnsupported,

    #[error("queue element must be an entity, got {found}")]
    NotAnEntity { found: String },

    #[error("unsupported load field on {entity}: {reason}")]
    BadLoadField { entity: String, reason: String },

    // Resource problems: only the one resource is skipped.
    #[error("cannot harmonize {reference}: {reason}")]
    Unresolvable {
        reference: String,
        reason: HarmonizeError,
    },

    #[error("unable to load {resource}: {reason}")]
    FetchFailed { resource: String, reason: String },

    #[error("corrupt export {key} in {resource}")]
    CorruptExport { resource: String, key: String },

    // Registry conflicts: the registration is rejected.
    #[error("duplicate resolver {resolver}")]
    DuplicateResolver { resolver: String },

    #[error("conflicting order hints for {resolver}: {reason}")]
    OrderConflict { resolver: String, reason: String },

    // A resolver returned an error or panicked. The chain moves on.
    #[error("resolver {resolver} failed on {entity}: {reason}")]
    ResolverFailed {
        resolver: String,
        entity: String,
        reason: String,
    },

    /// Raised by resolvers living outside this crate.
    #[error("{origin}: {message}")]
    Collaborator { origin: String, message: String },
}

impl Report {
    pub fn collaborator(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Report::Collaborator {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Report::CallableUnsupported)
    }

    pub(crate) fn log(&self, sys: &str) {
        if self.is_warning() {
            warn!(sys, report = %self, "Reported");
        } else {
            error!(sys, report = %self, "Reported");
        }
    }
}

/// Keeps every report raised by an engine. Thread-safe.
#[derive(Debug, Default)]
pub struct ReportSink {
    reports: Mutex<Vec<Report>>,
}

impl ReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: Report) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }

    /// Everything recorded so far, oldest first.
    pub fn reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
