//! Late binding of methods between entities.
//!
//! The wire resolver remembers every entity that carries a `uuid`. An entity
//! with a `wire` list of `[source, source_method, target, target_method]`
//! groups binds each target method as an outlet of the source, so calling
//! the source method publishes to every wired target in binding order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use orbital_sys::{Entity, Outcome, Report, Resolve, Resolver, Sys};
use serde_json::Value;
use tracing::info;

pub const UUID: &str = "orbital/sys/wire";

#[derive(Default)]
pub struct Wiring {
    entities: Mutex<HashMap<String, Entity>>,
}

struct Link<'a> {
    source: &'a str,
    source_method: &'a str,
    target: &'a str,
    target_method: &'a str,
}

impl Wiring {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entity(self: &Arc<Self>) -> Entity {
        Entity::new()
            .with("uuid", UUID)
            .with("description", "wires entity methods together")
            .with_resolver(Resolver::from_arc(self.clone()))
    }

    /// The most recent entity seen with `uuid`.
    pub fn lookup(&self, uuid: &str) -> Option<Entity> {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
            .cloned()
    }

    fn remember(&self, uuid: String, entity: &Entity) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uuid, entity.clone());
    }

    fn connect(&self, link: &Link<'_>) -> Result<(), String> {
        let source = self
            .lookup(link.source)
            .ok_or_else(|| format!("source not found: {}", link.source))?;
        let target = self
            .lookup(link.target)
            .ok_or_else(|| format!("target not found: {}", link.target))?;
        let method = target.method(link.target_method).ok_or_else(|| {
            format!(
                "target method not found: {}.{}",
                link.target, link.target_method
            )
        })?;
        source.bind_outlet(link.source_method, method);
        Ok(())
    }
}

fn parse_links(wire: &Value) -> Result<Vec<Link<'_>>, String> {
    let Value::Array(items) = wire else {
        return Err("wire must be a list".to_string());
    };
    if items.len() % 4 != 0 {
        return Err(format!(
            "wire must hold groups of four, got {} items",
            items.len()
        ));
    }
    let names: Vec<&str> = items
        .iter()
        .map(|item| item.as_str().ok_or("wire entries must be strings"))
        .collect::<Result<_, _>>()?;
    Ok(names
        .chunks_exact(4)
        .map(|group| Link {
            source: group[0],
            source_method: group[1],
            target: group[2],
            target_method: group[3],
        })
        .collect())
}

#[async_trait]
impl Resolve for Wiring {
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        if entity.is_truthy("tick") || entity.is_truthy("time") {
            return Ok(Outcome::Continue);
        }
        if let Some(uuid) = entity.uuid() {
            self.remember(uuid, entity);
        }
        let Some(wire) = entity.get("wire") else {
            return Ok(Outcome::Continue);
        };

        let links = match parse_links(&wire) {
            Ok(links) => links,
            Err(reason) => {
                sys.report(Report::collaborator(
                    UUID,
                    format!("{} on {}", reason, entity.label()),
                ));
                return Ok(Outcome::Continue);
            }
        };
        for link in &links {
            match self.connect(link) {
                Ok(()) => info!(
                    source = link.source,
                    source_method = link.source_method,
                    target = link.target,
                    target_method = link.target_method,
                    "Wired"
                ),
                Err(reason) => sys.report(Report::collaborator(UUID, reason)),
            }
        }
        Ok(Outcome::Continue)
    }
}

pub fn wire_resolver() -> Entity {
    Wiring::new().entity()
}
