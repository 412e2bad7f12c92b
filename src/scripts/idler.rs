use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use crate::scripting::{Poll, Script, ScriptContext, ScriptManifest, ScriptState};

/// Script that idles until it is stopped
#[derive(Default)]
pub struct Idler {
    state: ScriptState,
    naps: AtomicU64,
    breaks: AtomicU64,
}

impl Idler {
    pub fn naps(&self) -> u64 {
        self.naps.load(Ordering::SeqCst)
    }

    pub fn breaks(&self) -> u64 {
        self.breaks.load(Ordering::SeqCst)
    }
}

impl Script for Idler {
    fn manifest(&self) -> ScriptManifest {
        ScriptManifest {
            name: "Idler",
            version: "1.0",
            authors: &["scripthost"],
            description: "Naps for a random interval, forever",
        }
    }

    fn state(&self) -> &ScriptState {
        &self.state
    }

    fn poll(&self, _ctx: &ScriptContext) -> Poll {
        let naps = self.naps.fetch_add(1, Ordering::SeqCst) + 1;
        if naps % 10 == 0 {
            debug!(target: "scripting", "Idler has napped {} times", naps);
        }
        Poll::sleep_between(300, 600)
    }

    fn on_break_start(&self) -> bool {
        self.breaks.fetch_add(1, Ordering::SeqCst);
        self.state().set_on_break(true);
        true
    }

    fn on_finish(&self, _ctx: &ScriptContext) {
        info!(target: "scripting", "Idler done after {} naps and {} breaks", self.naps(), self.breaks());
    }
}
