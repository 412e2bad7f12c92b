use chrono::Utc;
use tracing::info;

use super::InputMask;
use crate::scripting::Script;

/// Observer of script lifecycle events.
///
/// Every hook has an empty default so listeners only implement what they need.
/// Hooks run synchronously on whichever thread emitted the event, so they should
/// return quickly.
///
/// `script_paused` and `script_resumed` run while the slot's pause toggle is still
/// held: pausing that same slot from inside them returns
/// [`HandlerError::ReentrantPause`](crate::error::HandlerError::ReentrantPause).
pub trait ScriptListener: Send + Sync + 'static {
    fn script_started(&self, _script: &dyn Script) {}

    fn script_paused(&self, _script: &dyn Script) {}

    fn script_resumed(&self, _script: &dyn Script) {}

    fn script_stopped(&self, _script: &dyn Script) {}

    fn input_changed(&self, _source: &str, _mask: InputMask) {}
}

/// Listener that logs all events
#[derive(Debug, Default)]
pub struct LoggingListener;

impl ScriptListener for LoggingListener {
    fn script_started(&self, script: &dyn Script) {
        let manifest = script.manifest();
        info!(target: "events", "Script started: {} v{}", manifest.name, manifest.version);
    }

    fn script_paused(&self, script: &dyn Script) {
        info!(target: "events", "Script paused: {} (slot {:?})", script.manifest().name, script.id());
    }

    fn script_resumed(&self, script: &dyn Script) {
        info!(target: "events", "Script resumed: {} (slot {:?})", script.manifest().name, script.id());
    }

    fn script_stopped(&self, script: &dyn Script) {
        let runtime = script
            .state()
            .started_at()
            .map(|started| Utc::now().signed_duration_since(started))
            .map(|d| format!("{}.{:03}s", d.num_seconds(), d.num_milliseconds().rem_euclid(1000)))
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            target: "events",
            "Script stopped: {} (slot {:?}, ran {})",
            script.manifest().name,
            script.id(),
            runtime
        );
    }

    fn input_changed(&self, source: &str, mask: InputMask) {
        info!(target: "events", "Input changed on {}: {:?}", source, mask);
    }
}
