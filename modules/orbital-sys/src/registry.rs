//! The resolver registry.
//!
//! Resolvers are themselves entities: submitting an entity that carries a
//! `resolve` capability registers it. The registry resolver sits first in
//! every engine's chain so it sees those entities before anyone else.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::engine::Sys;
use crate::entity::Entity;
use crate::report::Report;
use crate::resolver::{Outcome, Resolve, Resolver};

pub const UUID: &str = "orbital/sys/resolve";
pub const OBLITERATE_UUID: &str = "orbital/sys/obliterate";

/// What a registration attempt did to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted(usize),
    Removed(usize),
    /// Removal was requested but nothing matched.
    Absent,
}

/// Apply `entity` to the chain: remove it when marked `obliterate`,
/// otherwise insert it honoring its `before`/`after` hints.
///
/// Matching is by entity identity, resolve-capability identity, or uuid.
/// Hints are applied once, here, and never re-checked later.
pub fn register(chain: &mut Vec<Entity>, entity: &Entity) -> Result<Registration, Report> {
    let Some(resolver) = entity.resolver() else {
        return Ok(Registration::Absent);
    };

    if let Some(at) = find_existing(chain, entity, &resolver) {
        if entity.is_obliterate() {
            chain.remove(at);
            return Ok(Registration::Removed(at));
        }
        return Err(Report::DuplicateResolver {
            resolver: entity.label(),
        });
    }
    if entity.is_obliterate() {
        return Ok(Registration::Absent);
    }

    check_hints(chain, entity, &resolver).map_err(|reason| Report::OrderConflict {
        resolver: entity.label(),
        reason,
    })?;

    let at = insertion_point(chain, &resolver).unwrap_or(chain.len());
    chain.insert(at, entity.clone());
    Ok(Registration::Inserted(at))
}

/// Remove the first entry whose uuid is `uuid`.
pub fn obliterate_by_uuid(chain: &mut Vec<Entity>, uuid: &str) -> Option<usize> {
    let at = chain
        .iter()
        .position(|entry| entry.uuid().as_deref() == Some(uuid))?;
    chain.remove(at);
    Some(at)
}

fn find_existing(chain: &[Entity], entity: &Entity, resolver: &Resolver) -> Option<usize> {
    let uuid = entity.uuid();
    chain.iter().position(|entry| {
        entry.same(entity)
            || entry
                .resolver()
                .is_some_and(|existing| existing.same_handler(resolver))
            || (uuid.is_some() && entry.uuid() == uuid)
    })
}

/// First entry, scanning from the front, named by a `before` or `after` hint.
fn insertion_point(chain: &[Entity], resolver: &Resolver) -> Option<usize> {
    if resolver.before().is_none() && resolver.after().is_none() {
        return None;
    }
    chain.iter().enumerate().find_map(|(i, entry)| {
        let uuid = entry.uuid()?;
        if resolver.before() == Some(uuid.as_str()) {
            Some(i)
        } else if resolver.after() == Some(uuid.as_str()) {
            Some(i + 1)
        } else {
            None
        }
    })
}

fn position_of(chain: &[Entity], token: Option<&str>) -> Option<usize> {
    let token = token?;
    chain
        .iter()
        .position(|entry| entry.uuid().as_deref() == Some(token))
}

/// Reject hint sets that cannot all hold at once.
fn check_hints(chain: &[Entity], entity: &Entity, resolver: &Resolver) -> Result<(), String> {
    if let (Some(before), Some(after)) = (
        position_of(chain, resolver.before()),
        position_of(chain, resolver.after()),
    ) {
        if before <= after {
            return Err(format!(
                "cannot be both before {} and after {}",
                resolver.before().unwrap_or_default(),
                resolver.after().unwrap_or_default()
            ));
        }
    }

    let Some(uuid) = entity.uuid() else {
        return Ok(());
    };
    for entry in chain {
        let (Some(other), Some(other_uuid)) = (entry.resolver(), entry.uuid()) else {
            continue;
        };
        if resolver.before() == Some(other_uuid.as_str()) && other.before() == Some(uuid.as_str()) {
            return Err(format!("{uuid} and {other_uuid} each claim to come first"));
        }
        if resolver.after() == Some(other_uuid.as_str()) && other.after() == Some(uuid.as_str()) {
            return Err(format!("{uuid} and {other_uuid} each claim to come last"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

struct RegistryResolver;

#[async_trait]
impl Resolve for RegistryResolver {
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        match sys.with_registry(|chain| register(chain, entity)) {
            Ok(Registration::Inserted(at)) => {
                info!(resolver = %entity.label(), position = at, "Resolver registered");
            }
            Ok(Registration::Removed(at)) => {
                info!(resolver = %entity.label(), position = at, "Resolver removed");
            }
            Ok(Registration::Absent) => {
                debug!(resolver = %entity.label(), "Nothing to remove");
            }
            Err(report) => sys.report(report),
        }
        Ok(Outcome::Continue)
    }
}

/// Removes a registered resolver by uuid when the obliterating entity does
/// not carry the resolve capability itself.
struct ObliterateResolver;

#[async_trait]
impl Resolve for ObliterateResolver {
    async fn resolve(&self, entity: &Entity, sys: &Sys) -> Result<Outcome> {
        if entity.resolver().is_some() || !entity.is_obliterate() {
            return Ok(Outcome::Continue);
        }
        let Some(uuid) = entity.uuid() else {
            return Ok(Outcome::Continue);
        };
        if let Some(at) = sys.with_registry(|chain| obliterate_by_uuid(chain, &uuid)) {
            info!(resolver = uuid.as_str(), position = at, "Resolver removed");
        }
        Ok(Outcome::Continue)
    }
}

pub fn registry_resolver() -> Entity {
    Entity::new()
        .with("uuid", UUID)
        .with("description", "registers entities that carry a resolve capability")
        .with_resolver(Resolver::new(RegistryResolver).with_filter(["resolve"]))
}

pub fn obliterate_resolver() -> Entity {
    Entity::new()
        .with("uuid", OBLITERATE_UUID)
        .with("description", "removes resolvers by uuid")
        .with_resolver(Resolver::new(ObliterateResolver).with_filter(["obliterate"]))
}
