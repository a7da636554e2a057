//! Dynamic loader.
//!
//! Intercepts entities with a `load` field, fetches each referenced resource
//! once per engine, and feeds every export back into the engine directly
//! behind the loading entity, ahead of anything else already queued.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::engine::Sys;
use crate::entity::{Entity, Provenance};
use crate::report::Report;
use crate::resolver::{Outcome, Resolve, Resolver};
use crate::submission::Submission;

pub const UUID: &str = "orbital/sys/load";

struct LoadResolver;

#[async_trait]
impl Resolve for LoadResolver {
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        let candidates = match entity.load_directive() {
            Ok(Some(candidates)) => candidates,
            Ok(None) => return Ok(Outcome::Continue),
            Err(e) => {
                sys.report(Report::BadLoadField {
                    entity: entity.label(),
                    reason: e.to_string(),
                });
                return Ok(Outcome::Continue);
            }
        };

        let base = entity
            .anchor()
            .or_else(|| entity.provenance().map(|p| p.anchor));
        let mut found = Vec::new();

        for candidate in candidates {
            let resource = match sys.harmonizer().harmonize(base.as_deref(), &candidate) {
                Ok(resource) => resource,
                Err(reason) => {
                    sys.report(Report::Unresolvable {
                        reference: candidate,
                        reason,
                    });
                    continue;
                }
            };

            if !sys.mark_visited(&resource) {
                debug!(resource = resource.as_str(), "Already loaded once, skipping");
                continue;
            }

            let exports = match sys.fetcher().fetch(&resource).await {
                Ok(exports) => exports,
                Err(e) => {
                    sys.report(Report::FetchFailed {
                        resource,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            info!(resource = resource.as_str(), exports = exports.len(), "Loaded");

            for (key, export) in exports {
                found.extend(stamp(sys, &resource, &key, export));
            }
        }

        if !found.is_empty() {
            sys.inject(found).await;
        }
        Ok(Outcome::Continue)
    }
}

/// Mark an export with where it came from. Entities are stamped shallowly,
/// lists recursively. Null exports are reported and dropped.
fn stamp(sys: &Sys, resource: &str, key: &str, export: Submission) -> Option<Submission> {
    match export {
        Submission::Entity(entity) => {
            entity.stamp(Provenance {
                key: key.to_string(),
                anchor: resource.to_string(),
            });
            Some(Submission::Entity(entity))
        }
        Submission::Batch(items) => Some(Submission::Batch(
            items
                .into_iter()
                .filter_map(|item| stamp(sys, resource, key, item))
                .collect(),
        )),
        Submission::Null => {
            sys.report(Report::CorruptExport {
                resource: resource.to_string(),
                key: key.to_string(),
            });
            None
        }
        other => Some(other),
    }
}

pub fn load_resolver() -> Entity {
    Entity::new()
        .with("uuid", UUID)
        .with("description", "loads other assets on demand")
        .with_resolver(Resolver::new(LoadResolver).with_filter(["load"]))
}
