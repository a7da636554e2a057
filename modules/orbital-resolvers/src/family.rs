//! Parent/child bookkeeping. Sits early in the chain so later resolvers see
//! consistent `children` lists.

use anyhow::Result;
use async_trait::async_trait;
use orbital_sys::{Entity, Outcome, Resolve, Resolver, Sys};
use tracing::debug;

pub const UUID: &str = "orbital/sys/family";

struct Family;

#[async_trait]
impl Resolve for Family {
    async fn resolve(&self, entity: &Entity, _sys: &Sys) -> Result<Outcome> {
        let Some(parent) = entity.parent() else {
            debug!(entity = %entity.label(), "No live parent link, skipping");
            return Ok(Outcome::Continue);
        };

        if entity.is_obliterate() {
            if parent.remove_child(entity) {
                debug!(parent = %parent.label(), child = %entity.label(), "Child removed");
            }
        } else if parent.add_child(entity) {
            debug!(parent = %parent.label(), child = %entity.label(), "Child added");
        }
        Ok(Outcome::Continue)
    }
}

pub fn family_resolver() -> Entity {
    Entity::new()
        .with("uuid", UUID)
        .with("description", "keeps parent child links tidy")
        .with_resolver(Resolver::new(Family).with_filter(["parent"]))
}
