use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::listener::ScriptListener;
use super::ScriptEvent;

/// Central event bus that fans lifecycle events out to listeners.
///
/// Membership is a set keyed by the listener's allocation, so subscribing the same
/// `Arc` twice has no effect. Emission walks a copy of the set, which lets a
/// listener subscribe or unsubscribe from inside a callback.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn ScriptListener>>>,
}

fn same_listener(a: &Arc<dyn ScriptListener>, b: &Arc<dyn ScriptListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, listener: Arc<dyn ScriptListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, listener: &Arc<dyn ScriptListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Invoke the matching hook of every current listener on this thread
    pub fn emit(&self, event: &ScriptEvent<'_>) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        trace!(target: "events", "Emitting {} to {} listener(s)", event.kind(), listeners.len());

        for listener in &listeners {
            match *event {
                ScriptEvent::Started(script) => listener.script_started(script),
                ScriptEvent::Paused(script) => listener.script_paused(script),
                ScriptEvent::Resumed(script) => listener.script_resumed(script),
                ScriptEvent::Stopped(script) => listener.script_stopped(script),
                ScriptEvent::InputChanged { source, mask } => listener.input_changed(source, mask),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, InputMask};
    use crate::scripting::testing::{IdleScript, RecordingListener};

    #[test]
    fn test_subscribe_deduplicates() {
        let bus = EventBus::new();
        let listener: Arc<dyn ScriptListener> = Arc::new(RecordingListener::default());

        assert!(bus.subscribe(Arc::clone(&listener)));
        assert!(!bus.subscribe(Arc::clone(&listener)));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let listener: Arc<dyn ScriptListener> = Arc::new(RecordingListener::default());
        bus.subscribe(Arc::clone(&listener));

        assert!(bus.unsubscribe(&listener));
        assert!(!bus.unsubscribe(&listener));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_reaches_every_listener_once() {
        let bus = EventBus::new();
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        let script = IdleScript::new("walker");
        bus.emit(&ScriptEvent::Paused(&script));
        bus.emit(&ScriptEvent::InputChanged {
            source: "client-0",
            mask: InputMask::MOUSE,
        });

        for listener in [&first, &second] {
            assert_eq!(listener.kinds(), vec![EventKind::Paused, EventKind::InputChanged]);
        }
        assert_eq!(first.inputs(), vec![("client-0".to_string(), InputMask::MOUSE)]);
    }

    #[test]
    fn test_listener_can_unsubscribe_during_emit() {
        struct OneShot {
            bus: Arc<EventBus>,
            me: std::sync::Mutex<Option<Arc<dyn ScriptListener>>>,
        }

        impl ScriptListener for OneShot {
            fn script_started(&self, _script: &dyn crate::scripting::Script) {
                if let Some(me) = self.me.lock().unwrap().take() {
                    self.bus.unsubscribe(&me);
                }
            }
        }

        let bus = Arc::new(EventBus::new());
        let one_shot = Arc::new(OneShot {
            bus: Arc::clone(&bus),
            me: std::sync::Mutex::new(None),
        });
        let as_listener: Arc<dyn ScriptListener> = one_shot.clone();
        *one_shot.me.lock().unwrap() = Some(Arc::clone(&as_listener));
        bus.subscribe(as_listener);

        let script = IdleScript::new("walker");
        bus.emit(&ScriptEvent::Started(&script));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
