use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use super::{RandomEvent, RandomInitError, RandomStep};
use crate::scripting::ExecutionContext;
use crate::scripts::DemoWorld;

/// Steps an interruption takes to resolve
const RESOLVE_STEPS: u32 = 3;

/// Handles the pending interruptions posted on a [`DemoWorld`].
///
/// Each interruption takes a few short steps to clear, during which the script that
/// yielded to it stays on break.
#[derive(Debug, Default)]
pub struct Interruption {
    progress: std::sync::atomic::AtomicU32,
}

impl RandomEvent for Interruption {
    fn name(&self) -> &'static str {
        "interruption"
    }

    fn init(&self, ctx: &ExecutionContext) -> Result<(), RandomInitError> {
        ctx.get::<DemoWorld>()
            .map(|_| ())
            .ok_or(RandomInitError::MissingCapability("DemoWorld"))
    }

    fn activate_condition(&self, ctx: &ExecutionContext) -> bool {
        ctx.get::<DemoWorld>()
            .is_some_and(|world| world.pending_interruptions() > 0)
    }

    fn step(&self, ctx: &ExecutionContext) -> RandomStep {
        let Some(world) = ctx.get::<DemoWorld>() else {
            return RandomStep::Done;
        };

        let step = self.progress.fetch_add(1, Ordering::SeqCst) + 1;
        if step < RESOLVE_STEPS {
            return RandomStep::Continue(Duration::from_millis(50));
        }

        self.progress.store(0, Ordering::SeqCst);
        world.resolve_interruption();
        info!(target: "randoms", "Interruption resolved ({} left)", world.pending_interruptions());
        RandomStep::Done
    }
}
