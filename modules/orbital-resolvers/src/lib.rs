//! Stock resolvers that plug into an orbital engine: schema namespaces,
//! parent/child links, method wiring and a periodic tick.

pub mod family;
pub mod schema;
pub mod tick;
pub mod wire;

use orbital_sys::{Module, ModuleRegistry, Sys};

pub use family::family_resolver;
pub use schema::{schema_resolver, Schemas};
pub use tick::{tick_resolver, TickConfig};
pub use wire::{wire_resolver, Wiring};

/// Register schema, family and wire on `sys`, in that order.
///
/// The tick resolver is left out: it starts a background task and is
/// opted into explicitly, or loaded from [`modules`] by a manifest.
pub async fn install(sys: &Sys) {
    sys.submit_all(vec![schema_resolver(), family_resolver(), wire_resolver()])
        .await;
}

/// Every stock resolver as an in-process module, loadable by its uuid
/// (`{"load": "orbital/sys/wire"}`). Each engine that loads one gets its
/// own resolver instance.
pub fn modules(tick: TickConfig) -> ModuleRegistry {
    ModuleRegistry::new()
        .with_module(schema::UUID, Module::new().export("schema", schema_resolver))
        .with_module(family::UUID, Module::new().export("family", family_resolver))
        .with_module(wire::UUID, Module::new().export("wire", wire_resolver))
        .with_module(tick::UUID, Module::new().export("tick", move || tick_resolver(tick)))
}
