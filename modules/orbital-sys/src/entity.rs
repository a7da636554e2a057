//! Entities: open field maps shared by reference.
//!
//! An entity is whatever a caller submits. Resolvers read the fields they
//! care about and ignore the rest. A handful of things that are not plain
//! data (the resolve capability, family links, provenance, methods) live in
//! typed slots next to the JSON fields.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::resolver::Resolver;

/// A callable exposed by an entity under a name. Wiring rebinds these.
pub type Method = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Where a loaded entity came from: the export key and the canonical
/// resource it was found in.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Provenance {
    pub key: String,
    pub anchor: String,
}

/// The `load` field held something other than a string or list of strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("load must be a string or a list of strings, got {found}")]
pub struct LoadFieldError {
    pub found: String,
}

#[derive(Default)]
struct EntityState {
    fields: Map<String, Value>,
    resolver: Option<Resolver>,
    parent: Option<Weak<RwLock<EntityState>>>,
    children: Vec<Entity>,
    provenance: Option<Provenance>,
    methods: HashMap<String, Method>,
    outlets: HashMap<String, Vec<Method>>,
}

/// Shared handle to an entity. Clones alias the same underlying record.
#[derive(Clone, Default)]
pub struct Entity(Arc<RwLock<EntityState>>);

/// Non-owning handle, used for parent links.
#[derive(Clone, Default)]
pub struct WeakEntity(Weak<RwLock<EntityState>>);

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(Entity)
    }
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        let entity = Self::new();
        entity.write().fields = fields;
        entity
    }

    // --- builders -----------------------------------------------------------

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_resolver(self, resolver: Resolver) -> Self {
        self.set_resolver(Some(resolver));
        self
    }

    pub fn with_parent(self, parent: &Entity) -> Self {
        self.write().parent = Some(Arc::downgrade(&parent.0));
        self
    }

    pub fn with_method<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.write().methods.insert(name.into(), Arc::new(method));
        self
    }

    // --- identity -----------------------------------------------------------

    /// Reference identity: true when both handles point at the same entity.
    pub fn same(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity(Arc::downgrade(&self.0))
    }

    /// Short human label for logs and reports.
    pub fn label(&self) -> String {
        self.uuid().unwrap_or_else(|| "<anonymous>".to_string())
    }

    // --- fields -------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().fields.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().fields.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().fields.remove(key)
    }

    /// Own-field presence, regardless of value. The typed slots answer under
    /// their conventional names.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.read();
        if state.fields.contains_key(key) {
            return true;
        }
        match key {
            "resolve" => state.resolver.is_some(),
            "parent" => state.parent.is_some(),
            "_metadata" => state.provenance.is_some(),
            _ => false,
        }
    }

    pub fn is_truthy(&self, key: &str) -> bool {
        self.read().fields.get(key).is_some_and(is_truthy)
    }

    pub fn fields(&self) -> Map<String, Value> {
        self.read().fields.clone()
    }

    pub fn uuid(&self) -> Option<String> {
        self.string_field("uuid")
    }

    pub fn anchor(&self) -> Option<String> {
        self.string_field("anchor")
    }

    pub fn is_obliterate(&self) -> bool {
        self.is_truthy("obliterate")
    }

    /// The `load` directive as an ordered list of references.
    ///
    /// Absent or falsy yields `Ok(None)`.
    pub fn load_directive(&self) -> std::result::Result<Option<Vec<String>>, LoadFieldError> {
        let state = self.read();
        let Some(load) = state.fields.get("load").filter(|v| is_truthy(v)) else {
            return Ok(None);
        };
        match load {
            Value::String(reference) => Ok(Some(vec![reference.clone()])),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(reference) => Ok(reference.clone()),
                    other => Err(LoadFieldError {
                        found: format!("a list containing {}", kind_of(other)),
                    }),
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Some),
            other => Err(LoadFieldError {
                found: kind_of(other).to_string(),
            }),
        }
    }

    fn string_field(&self, key: &str) -> Option<String> {
        match self.read().fields.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    // --- typed slots --------------------------------------------------------

    pub fn resolver(&self) -> Option<Resolver> {
        self.read().resolver.clone()
    }

    pub fn set_resolver(&self, resolver: Option<Resolver>) {
        self.write().resolver = resolver;
    }

    pub fn provenance(&self) -> Option<Provenance> {
        self.read().provenance.clone()
    }

    pub fn stamp(&self, provenance: Provenance) {
        self.write().provenance = Some(provenance);
    }

    pub fn parent(&self) -> Option<Entity> {
        self.read().parent.as_ref().and_then(Weak::upgrade).map(Entity)
    }

    pub fn children(&self) -> Vec<Entity> {
        self.read().children.clone()
    }

    /// Adds `child` unless it is already present. Returns whether it was added.
    pub fn add_child(&self, child: &Entity) -> bool {
        let mut state = self.write();
        if state.children.iter().any(|c| c.same(child)) {
            return false;
        }
        state.children.push(child.clone());
        true
    }

    /// Removes `child` by identity, or by uuid when both carry one.
    pub fn remove_child(&self, child: &Entity) -> bool {
        let uuid = child.uuid();
        let children = self.children();
        let kept: Vec<Entity> = children
            .iter()
            .filter(|c| !(c.same(child) || (uuid.is_some() && c.uuid() == uuid)))
            .cloned()
            .collect();
        let removed = kept.len() != children.len();
        if removed {
            self.write().children = kept;
        }
        removed
    }

    pub fn method(&self, name: &str) -> Option<Method> {
        self.read().methods.get(name).cloned()
    }

    /// Routes calls to `name` through to `target`, alongside any targets
    /// already bound. Once an outlet exists it replaces the own method.
    pub fn bind_outlet(&self, name: impl Into<String>, target: Method) {
        self.write().outlets.entry(name.into()).or_default().push(target);
    }

    pub fn outlet_len(&self, name: &str) -> usize {
        self.read().outlets.get(name).map_or(0, Vec::len)
    }

    /// Invoke a method by name. Wired outlets fan out to every target in
    /// binding order; otherwise the entity's own method runs.
    pub async fn call(&self, name: &str, args: Value) -> Result<()> {
        let (targets, own) = {
            let state = self.read();
            (
                state.outlets.get(name).cloned().unwrap_or_default(),
                state.methods.get(name).cloned(),
            )
        };
        if !targets.is_empty() {
            for target in targets {
                target(args.clone()).await?;
            }
            return Ok(());
        }
        match own {
            Some(method) => method(args).await,
            None => bail!("{} has no method {name}", self.label()),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_fields(fields)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Entity")
            .field("fields", &state.fields)
            .field("resolver", &state.resolver)
            .field("provenance", &state.provenance)
            .field("children", &state.children.len())
            .finish()
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let state = self.read();
        let extra = usize::from(state.provenance.is_some());
        let mut map = serializer.serialize_map(Some(state.fields.len() + extra))?;
        for (key, value) in &state.fields {
            map.serialize_entry(key, value)?;
        }
        if let Some(provenance) = &state.provenance {
            map.serialize_entry("_metadata", provenance)?;
        }
        map.end()
    }
}

/// JSON truthiness: null, false, 0 and "" are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
