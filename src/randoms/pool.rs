use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::{debug, error, info, warn};

use super::{RandomEntry, RandomEvent, RandomInitError, RandomStep};
use crate::config::RandomsConfig;
use crate::scripting::ExecutionContext;

/// A constructed catalog entry
pub struct RandomHandle {
    name: &'static str,
    random: Box<dyn RandomEvent>,
    enabled: AtomicBool,
    /// Held while a worker is driving this handler
    busy: Mutex<()>,
}

impl RandomHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn random(&self) -> &dyn RandomEvent {
        self.random.as_ref()
    }

    /// Exclusive use of the handler, or `None` if another worker is driving it
    pub fn try_lease(&self) -> Option<RandomLease<'_>> {
        let busy = match self.busy.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(RandomLease { handle: self, _busy: busy })
    }
}

impl fmt::Debug for RandomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomHandle")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Exclusive hold on one handler while it has control of a worker
pub struct RandomLease<'a> {
    handle: &'a RandomHandle,
    _busy: MutexGuard<'a, ()>,
}

impl RandomLease<'_> {
    pub fn name(&self) -> &'static str {
        self.handle.name
    }

    pub fn step(&self, ctx: &ExecutionContext) -> RandomStep {
        self.handle.random.step(ctx)
    }
}

/// Outcome of building the catalog, one line per entry
#[derive(Debug, Default)]
pub struct CatalogReport {
    pub loaded: Vec<&'static str>,
    pub failed: Vec<(&'static str, RandomInitError)>,
}

impl CatalogReport {
    /// Every entry loaded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for CatalogReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} random(s) loaded", self.loaded.len())?;
        if !self.failed.is_empty() {
            let names: Vec<_> = self.failed.iter().map(|(name, _)| *name).collect();
            write!(f, ", {} failed: {}", self.failed.len(), names.join(", "))?;
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn construct(
    entry: &RandomEntry,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RandomEvent>, RandomInitError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let random = (entry.factory)()?;
        random.init(ctx)?;
        Ok(random)
    }));

    match outcome {
        Ok(result) => result,
        Err(payload) => Err(RandomInitError::Panicked(panic_message(payload))),
    }
}

/// Fixed catalog of random event handlers
#[derive(Debug)]
pub struct RandomEventPool {
    handles: Vec<RandomHandle>,
    context: ExecutionContext,
}

impl RandomEventPool {
    /// Pool with no handlers
    pub fn empty() -> Self {
        Self {
            handles: Vec::new(),
            context: ExecutionContext::empty(),
        }
    }

    /// Construct and initialize every catalog entry.
    ///
    /// Each entry is built in isolation: a factory or `init` that errors or panics is
    /// logged and recorded in the report, and the remaining entries still load.
    /// Entries named in `config.disabled` are loaded but start disabled.
    pub fn build(
        entries: &[RandomEntry],
        ctx: &ExecutionContext,
        config: &RandomsConfig,
    ) -> (Self, CatalogReport) {
        let mut handles: Vec<RandomHandle> = Vec::with_capacity(entries.len());
        let mut report = CatalogReport::default();

        for entry in entries {
            if handles.iter().any(|h| h.name == entry.name) {
                warn!(target: "randoms", "Duplicate random '{}' in catalog, skipping", entry.name);
                report.failed.push((
                    entry.name,
                    RandomInitError::Failed("duplicate catalog entry".to_string()),
                ));
                continue;
            }

            match construct(entry, ctx) {
                Ok(random) => {
                    if random.name() != entry.name {
                        debug!(
                            target: "randoms",
                            "Random '{}' reports its name as '{}'",
                            entry.name,
                            random.name()
                        );
                    }
                    let enabled = config.is_enabled(entry.name);
                    debug!(target: "randoms", "Loaded random '{}' (enabled: {})", entry.name, enabled);
                    handles.push(RandomHandle {
                        name: entry.name,
                        random,
                        enabled: AtomicBool::new(enabled),
                        busy: Mutex::new(()),
                    });
                    report.loaded.push(entry.name);
                }
                Err(e) => {
                    error!(target: "randoms", "Failed to load random '{}': {}", entry.name, e);
                    report.failed.push((entry.name, e));
                }
            }
        }

        info!(target: "randoms", "{}", report);

        let pool = Self {
            handles,
            context: ctx.clone(),
        };
        (pool, report)
    }

    pub fn handlers(&self) -> &[RandomHandle] {
        &self.handles
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|h| h.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RandomHandle> {
        self.handles.iter().find(|h| h.name == name)
    }

    /// Enable or disable a handler by name. Returns `false` if there is no such handler.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.get(name) {
            Some(handle) => {
                handle.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// First enabled, idle handler whose condition currently holds, in catalog order
    pub fn next_active(&self) -> Option<RandomLease<'_>> {
        self.handles
            .iter()
            .filter(|h| h.is_enabled())
            .filter(|h| h.random.activate_condition(&self.context))
            .find_map(|h| h.try_lease())
    }
}

impl Default for RandomEventPool {
    fn default() -> Self {
        Self::empty()
    }
}
