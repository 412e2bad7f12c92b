pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod randoms;
pub mod scripting;
pub mod scripts;

pub use config::HostConfig;
pub use error::HandlerError;
pub use events::{EventBus, EventKind, InputMask, ScriptEvent, ScriptListener};
pub use randoms::{RandomEvent, RandomEventPool};
pub use scripting::{
    ExecutionContext, Poll, Script, ScriptContext, ScriptHandler, ScriptId, ScriptManifest,
    ScriptState,
};
