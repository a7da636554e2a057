//! Queue elements.

use serde_json::Value;

use crate::entity::Entity;
use crate::resolver::Resolver;

/// Anything that can be handed to [`Sys::submit`](crate::Sys::submit).
///
/// Only `Entity` reaches the resolver chain. Batches are spliced into the
/// queue in place; the remaining kinds are reported and dropped.
#[derive(Debug, Clone)]
pub enum Submission {
    Entity(Entity),
    Batch(Vec<Submission>),
    /// A bare resolve capability with no entity around it.
    Callable(Resolver),
    Null,
    /// A JSON value that is neither an object, a list nor null.
    Scalar(Value),
}

impl Submission {
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Submission::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

impl From<Entity> for Submission {
    fn from(entity: Entity) -> Self {
        Submission::Entity(entity)
    }
}

impl From<&Entity> for Submission {
    fn from(entity: &Entity) -> Self {
        Submission::Entity(entity.clone())
    }
}

impl From<Resolver> for Submission {
    fn from(resolver: Resolver) -> Self {
        Submission::Callable(resolver)
    }
}

impl<T: Into<Submission>> From<Vec<T>> for Submission {
    fn from(items: Vec<T>) -> Self {
        Submission::Batch(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Submission>> From<Option<T>> for Submission {
    fn from(item: Option<T>) -> Self {
        item.map_or(Submission::Null, Into::into)
    }
}

impl From<Value> for Submission {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Submission::Null,
            Value::Object(fields) => Submission::Entity(Entity::from_fields(fields)),
            Value::Array(items) => items.into(),
            scalar => Submission::Scalar(scalar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_onto_kinds() {
        assert!(matches!(Submission::from(json!(null)), Submission::Null));
        assert!(matches!(Submission::from(json!(3)), Submission::Scalar(_)));
        assert!(matches!(Submission::from(json!({"a": 1})), Submission::Entity(_)));

        let Submission::Batch(items) = Submission::from(json!([{"a": 1}, [null]])) else {
            panic!("expected a batch");
        };
        assert!(matches!(items[0], Submission::Entity(_)));
        assert!(matches!(&items[1], Submission::Batch(inner) if matches!(inner[0], Submission::Null)));
    }
}
