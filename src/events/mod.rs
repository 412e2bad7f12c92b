/// Lifecycle notifications for running scripts
///
/// The handler publishes through an [`EventBus`]; observers implement
/// [`ScriptListener`] and receive callbacks synchronously on the emitting thread.
pub mod bus;
pub mod listener;

use bitflags::bitflags;
use strum_macros::Display;

use crate::scripting::Script;

pub use bus::EventBus;
pub use listener::{LoggingListener, ScriptListener};

bitflags! {
    /// Which input devices changed. Bits outside the named ones are retained as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InputMask: u32 {
        const MOUSE = 0x0000_0001;
        const KEYBOARD = 0x0000_0002;
        const _ = !0;
    }
}

/// Discriminant of a [`ScriptEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Started,
    Paused,
    Resumed,
    Stopped,
    InputChanged,
}

/// Event payload handed to [`EventBus::emit`]
#[derive(Clone, Copy)]
pub enum ScriptEvent<'a> {
    Started(&'a dyn Script),
    Paused(&'a dyn Script),
    Resumed(&'a dyn Script),
    Stopped(&'a dyn Script),
    InputChanged { source: &'a str, mask: InputMask },
}

impl ScriptEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            ScriptEvent::Started(_) => EventKind::Started,
            ScriptEvent::Paused(_) => EventKind::Paused,
            ScriptEvent::Resumed(_) => EventKind::Resumed,
            ScriptEvent::Stopped(_) => EventKind::Stopped,
            ScriptEvent::InputChanged { .. } => EventKind::InputChanged,
        }
    }

    /// Script the event is about, if any
    pub fn script(&self) -> Option<&dyn Script> {
        match *self {
            ScriptEvent::Started(s)
            | ScriptEvent::Paused(s)
            | ScriptEvent::Resumed(s)
            | ScriptEvent::Stopped(s) => Some(s),
            ScriptEvent::InputChanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Started.to_string(), "started");
        assert_eq!(EventKind::InputChanged.to_string(), "input_changed");
    }

    #[test]
    fn test_input_mask_keeps_unknown_bits() {
        let mask = InputMask::from_bits_retain(0x13);
        assert!(mask.contains(InputMask::MOUSE | InputMask::KEYBOARD));
        assert_eq!(mask.bits(), 0x13);
    }

    #[test]
    fn test_input_changed_has_no_script() {
        let event = ScriptEvent::InputChanged {
            source: "client-0",
            mask: InputMask::KEYBOARD,
        };
        assert_eq!(event.kind(), EventKind::InputChanged);
        assert!(event.script().is_none());
    }
}
