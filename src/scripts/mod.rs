/// Built-in demo scripts
///
/// These exercise the handler end to end: they poll, sleep, post interruptions for
/// the demo random and stop themselves.
pub mod counter;
pub mod idler;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::scripting::Script;

/// Factory function type for creating script instances
pub type ScriptFactory = fn() -> Arc<dyn Script>;

/// Catalog of scripts that can be started by name
#[derive(Default)]
pub struct ScriptCatalog {
    factories: BTreeMap<String, ScriptFactory>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ScriptFactory) {
        let name = name.into();
        debug!(target: "scripting", "Registering script factory: {}", name);
        self.factories.insert(name, factory);
    }

    /// Build a fresh instance of the named script
    pub fn create(&self, name: &str) -> Option<Arc<dyn Script>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered names, sorted
    pub fn available_scripts(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// Register several script types with a catalog at once
///
/// # Example
/// ```ignore
/// let mut catalog = ScriptCatalog::new();
/// register_scripts!(catalog, "counter" => Counter, "idler" => Idler);
/// ```
#[macro_export]
macro_rules! register_scripts {
    ($catalog:expr, $($name:literal => $script:ty),+ $(,)?) => {
        $(
            $catalog.register($name, || {
                ::std::sync::Arc::new(<$script>::default()) as ::std::sync::Arc<dyn $crate::scripting::Script>
            });
        )+
    };
}

/// Catalog with every built-in script
pub fn create_catalog() -> ScriptCatalog {
    let mut catalog = ScriptCatalog::new();
    register_scripts!(catalog, "counter" => counter::Counter, "idler" => idler::Idler);
    catalog
}

/// Toy game state shared through the execution context by the demos
#[derive(Debug, Default)]
pub struct DemoWorld {
    ticks: AtomicU64,
    pending: AtomicU32,
    resolved: AtomicU32,
}

impl DemoWorld {
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Something in the world needs a random handler's attention
    pub fn post_interruption(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn resolve_interruption(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.resolved.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending_interruptions(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn resolved_interruptions(&self) -> u32 {
        self.resolved.load(Ordering::SeqCst)
    }
}
