use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::handler::ScriptHandler;
use super::script::{Script, ScriptId};
use crate::error::HandlerError;

/// Longest uninterrupted nap taken by [`ScriptContext::sleep`]
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Opaque capabilities handed to every script and random event handler.
///
/// The handler never looks inside; scripts recover the concrete value with
/// [`ExecutionContext::get`].
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<dyn Any + Send + Sync>,
}

impl ExecutionContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// Context that grants nothing
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Borrow the capability value if it is a `T`
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext").finish_non_exhaustive()
    }
}

/// Per-worker view handed to a script's loop hooks
pub struct ScriptContext {
    handler: Arc<ScriptHandler>,
    script: Arc<dyn Script>,
    cancel: CancellationToken,
}

impl ScriptContext {
    pub(crate) fn new(handler: Arc<ScriptHandler>, script: Arc<dyn Script>) -> Self {
        let cancel = script.state().cancellation();
        Self {
            handler,
            script,
            cancel,
        }
    }

    pub fn handler(&self) -> &Arc<ScriptHandler> {
        &self.handler
    }

    pub fn script(&self) -> &Arc<dyn Script> {
        &self.script
    }

    /// Slot this worker's script occupies
    pub fn id(&self) -> Option<ScriptId> {
        self.script.id()
    }

    pub fn exec(&self) -> &ExecutionContext {
        self.handler.context()
    }

    /// Shorthand for `exec().get::<T>()`
    pub fn capability<T: Any>(&self) -> Option<&T> {
        self.handler.context().get::<T>()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep on the worker thread, waking early if the script is stopped.
    ///
    /// A duration too large to form a deadline (such as `Duration::MAX`) sleeps
    /// until the script is stopped. Returns `false` if the sleep was cut short by
    /// cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    (deadline - now).min(SLEEP_SLICE)
                }
                None => SLEEP_SLICE,
            };
            std::thread::sleep(slice);
        }
    }

    /// Stop this worker's own script.
    ///
    /// Does nothing if the script has already been stopped from elsewhere.
    pub fn stop(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            return Ok(());
        }
        self.handler.stop_self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Default)]
    struct Inventory {
        coins: AtomicU32,
    }

    #[test]
    fn test_get_returns_matching_type() {
        let ctx = ExecutionContext::new(Inventory::default());
        let inventory = ctx.get::<Inventory>().expect("inventory capability");
        inventory.coins.fetch_add(5, Ordering::SeqCst);

        let clone = ctx.clone();
        assert_eq!(clone.get::<Inventory>().unwrap().coins.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_get_wrong_type_is_none() {
        let ctx = ExecutionContext::new(Inventory::default());
        assert!(ctx.get::<String>().is_none());
        assert!(ExecutionContext::empty().get::<Inventory>().is_none());
    }
}
