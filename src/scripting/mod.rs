/// Core scripting system
///
/// Scripts are Rust types compiled into the binary. Each admitted script gets its own
/// worker thread and a slot id; the [`ScriptHandler`] owns the slot table, forwards
/// lifecycle events to listeners and lets scripts yield to random event handlers.
pub mod context;
pub mod handler;
pub mod registry;
pub mod script;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use context::{ExecutionContext, ScriptContext};
pub use handler::ScriptHandler;
pub use registry::{ScriptRegistry, Slot, Worker};
pub use script::{Poll, Script, ScriptId, ScriptManifest, ScriptState};
