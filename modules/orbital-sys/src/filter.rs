//! Filter gate: a cheap structural pre-check run before each resolver.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::entity::Entity;

/// Field names an entity must own for a resolver to see it.
///
/// Inclusive: every key has to be present. Values are never inspected, so
/// `{"graceful": false}` satisfies a `graceful` filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    keys: BTreeSet<String>,
}

impl Filter {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Build from a `{key: marker}` object, the shape filters take in
    /// manifests. Anything else is not a filter.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(|map| map.keys().cloned().collect())
    }
}

impl<K: Into<String>> FromIterator<K> for Filter {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// True when the resolver declares no filter, or the entity owns every key.
pub fn matches(entity: &Entity, filter: Option<&Filter>) -> bool {
    match filter {
        None => true,
        Some(filter) => filter.keys().all(|key| entity.contains(key)),
    }
}
