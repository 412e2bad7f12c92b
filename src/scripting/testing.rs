//! Fixtures shared by the unit tests of this crate

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::context::ScriptContext;
use super::script::{Poll, Script, ScriptId, ScriptManifest, ScriptState};
use crate::events::{EventKind, InputMask, ScriptListener};

/// Script that naps until stopped
pub struct IdleScript {
    name: &'static str,
    state: ScriptState,
}

impl IdleScript {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: ScriptState::new(),
        }
    }
}

impl Script for IdleScript {
    fn manifest(&self) -> ScriptManifest {
        ScriptManifest::named(self.name)
    }

    fn state(&self) -> &ScriptState {
        &self.state
    }

    fn poll(&self, _ctx: &ScriptContext) -> Poll {
        Poll::sleep_ms(5)
    }
}

/// Listener that remembers what it saw
#[derive(Default)]
pub struct RecordingListener {
    seen: Mutex<Vec<(EventKind, String, Option<ScriptId>)>>,
    inputs: Mutex<Vec<(String, InputMask)>>,
}

impl RecordingListener {
    fn record(&self, kind: EventKind, script: &dyn Script) {
        self.seen
            .lock()
            .unwrap()
            .push((kind, script.manifest().name.to_string(), script.id()));
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.seen.lock().unwrap().iter().map(|(k, _, _)| *k).collect()
    }

    pub fn events(&self) -> Vec<(EventKind, String, Option<ScriptId>)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.seen.lock().unwrap().iter().filter(|(k, _, _)| *k == kind).count()
    }

    pub fn inputs(&self) -> Vec<(String, InputMask)> {
        self.inputs.lock().unwrap().clone()
    }
}

impl ScriptListener for RecordingListener {
    fn script_started(&self, script: &dyn Script) {
        self.record(EventKind::Started, script);
    }

    fn script_paused(&self, script: &dyn Script) {
        self.record(EventKind::Paused, script);
    }

    fn script_resumed(&self, script: &dyn Script) {
        self.record(EventKind::Resumed, script);
    }

    fn script_stopped(&self, script: &dyn Script) {
        self.record(EventKind::Stopped, script);
    }

    fn input_changed(&self, source: &str, mask: InputMask) {
        self.inputs.lock().unwrap().push((source.to_string(), mask));
        self.seen
            .lock()
            .unwrap()
            .push((EventKind::InputChanged, source.to_string(), None));
    }
}

/// Poll `cond` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
