//! Schema namespaces.
//!
//! An entity with a `schema` object claims each of its keys as a namespace.
//! The first claimant keeps a namespace; later claims by other entities are
//! reported and ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use orbital_sys::{Entity, Outcome, Report, Resolve, Resolver, Sys};
use serde_json::Value;
use tracing::debug;

pub const UUID: &str = "orbital/sys/schema";

#[derive(Default)]
pub struct Schemas {
    owners: Mutex<HashMap<String, Entity>>,
}

impl Schemas {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn owner(&self, namespace: &str) -> Option<Entity> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Resolver entity sharing this namespace table.
    pub fn entity(self: &Arc<Self>) -> Entity {
        Entity::new()
            .with("uuid", UUID)
            .with("description", "claims schema namespaces")
            .with_resolver(Resolver::from_arc(self.clone()).with_filter(["schema"]))
    }

    fn claim(&self, namespace: &str, entity: &Entity) -> Result<(), Entity> {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = owners.get(namespace) {
            if !existing.same(entity) {
                return Err(existing.clone());
            }
        }
        owners.insert(namespace.to_string(), entity.clone());
        Ok(())
    }
}

#[async_trait]
impl Resolve for Schemas {
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        let keys: Vec<String> = match entity.get("schema") {
            Some(Value::Object(schema)) => schema.keys().cloned().collect(),
            _ => {
                sys.report(Report::collaborator(
                    UUID,
                    format!("schemas must be objects, {} has something else", entity.label()),
                ));
                return Ok(Outcome::Continue);
            }
        };

        for namespace in keys {
            match self.claim(&namespace, entity) {
                Ok(()) => debug!(namespace = namespace.as_str(), owner = %entity.label(), "Schema claimed"),
                Err(existing) => sys.report(Report::collaborator(
                    UUID,
                    format!(
                        "schema namespace collision on {namespace}: {} tried, {} holds it",
                        entity.label(),
                        existing.label()
                    ),
                )),
            }
        }
        Ok(Outcome::Continue)
    }
}

pub fn schema_resolver() -> Entity {
    Schemas::new().entity()
}
