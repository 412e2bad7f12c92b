use std::sync::atomic::{AtomicU32, Ordering};

use tracing::info;

use super::DemoWorld;
use crate::scripting::{Poll, Script, ScriptContext, ScriptManifest, ScriptState};

/// Polls to make before stopping itself
const DEFAULT_LIMIT: u32 = 20;

/// Post an interruption to the world every this many polls
const INTERRUPT_EVERY: u32 = 5;

/// Script that counts up to a limit, then stops itself
pub struct Counter {
    state: ScriptState,
    count: AtomicU32,
    limit: u32,
}

impl Counter {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            state: ScriptState::new(),
            count: AtomicU32::new(0),
            limit,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }
}

impl Script for Counter {
    fn manifest(&self) -> ScriptManifest {
        ScriptManifest {
            name: "Counter",
            version: "1.0",
            authors: &["scripthost"],
            description: "Counts to a limit, posting the odd interruption along the way",
        }
    }

    fn state(&self) -> &ScriptState {
        &self.state
    }

    fn on_start(&self, ctx: &ScriptContext) -> bool {
        info!(target: "scripting", "Counter starting in slot {:?}, counting to {}", ctx.id(), self.limit);
        true
    }

    fn poll(&self, ctx: &ScriptContext) -> Poll {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(world) = ctx.capability::<DemoWorld>() {
            world.tick();
            if count % INTERRUPT_EVERY == 0 {
                world.post_interruption();
            }
        }

        if count >= self.limit {
            return Poll::Stop;
        }
        Poll::sleep_between(20, 60)
    }

    fn on_finish(&self, _ctx: &ScriptContext) {
        info!(target: "scripting", "Counter finished at {}", self.count());
    }
}
