use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::context::ExecutionContext;
use super::registry::{ScriptRegistry, Worker};
use super::script::{Script, ScriptId};
use super::worker;
use crate::config::ScriptingConfig;
use crate::error::HandlerError;
use crate::events::{EventBus, InputMask, ScriptEvent, ScriptListener};
use crate::randoms::RandomEventPool;

/// Runs scripts on dedicated worker threads and tracks them by slot id.
///
/// Every method may be called from any thread. The `*_self` methods must be called
/// from a script's own worker thread; anywhere else they fail with
/// [`HandlerError::OffRoster`].
///
/// Absent ids are handled two ways. [`stop`](Self::stop),
/// [`begin_break`](Self::begin_break) and [`conclude_break`](Self::conclude_break)
/// treat them as a silent no-op; [`pause`](Self::pause) reports
/// [`HandlerError::NotFound`] since the caller expects a new state back.
pub struct ScriptHandler {
    registry: ScriptRegistry,
    bus: EventBus,
    context: ExecutionContext,
    randoms: RandomEventPool,
    config: ScriptingConfig,
    /// Join handles of workers whose slots were released
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl ScriptHandler {
    /// Create a handler with no random event handlers
    pub fn new(context: ExecutionContext, config: ScriptingConfig) -> Arc<Self> {
        Self::with_randoms(context, config, RandomEventPool::empty())
    }

    pub fn with_randoms(
        context: ExecutionContext,
        config: ScriptingConfig,
        randoms: RandomEventPool,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: ScriptRegistry::new(),
            bus: EventBus::new(),
            context,
            randoms,
            config,
            retired: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// The auxiliary handler catalog
    pub fn randoms(&self) -> &RandomEventPool {
        &self.randoms
    }

    pub fn subscribe(&self, listener: Arc<dyn ScriptListener>) -> bool {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &Arc<dyn ScriptListener>) -> bool {
        self.bus.unsubscribe(listener)
    }

    /// Immutable view of the occupied slots, ascending by id
    pub fn running_scripts(&self) -> Vec<(ScriptId, Arc<dyn Script>)> {
        self.registry.snapshot()
    }

    pub fn get(&self, id: ScriptId) -> Option<Arc<dyn Script>> {
        self.registry.get(id)
    }

    pub fn script_count(&self) -> usize {
        self.registry.len()
    }

    /// Admit a script and start it on a new worker thread.
    ///
    /// The script is initialized and `started` is emitted before the worker exists.
    /// The worker is held at a gate until its slot has been allocated, so it can
    /// always resolve itself with the `*_self` methods.
    ///
    /// A script instance is admitted at most once. One that is running, or was
    /// admitted and has since stopped, is refused with
    /// [`HandlerError::AlreadyAdmitted`] and nothing is emitted.
    pub fn run(self: &Arc<Self>, script: Arc<dyn Script>) -> Result<ScriptId, HandlerError> {
        let manifest = script.manifest();
        if script.id().is_some() || !script.initialize(&self.context) {
            warn!(target: "scripting", "Refusing to admit {} a second time", manifest.name);
            return Err(HandlerError::AlreadyAdmitted(manifest.name));
        }
        self.bus.emit(&ScriptEvent::Started(script.as_ref()));

        let thread_name = format!("{}{}", self.config.thread_prefix, manifest.name);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        let handler = Arc::clone(self);
        let worker_script = Arc::clone(&script);
        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                // A dropped gate means admission was abandoned
                if gate_rx.recv().is_ok() {
                    worker::run(handler, worker_script);
                }
            });

        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                error!(target: "scripting", "Failed to spawn worker for {}: {}", manifest.name, e);
                self.bus.emit(&ScriptEvent::Stopped(script.as_ref()));
                return Err(HandlerError::Spawn(e));
            }
        };

        let id = self.registry.allocate(Arc::clone(&script), Worker::new(join));
        info!(target: "scripting", "Started {} in slot {} on thread {}", manifest.name, id, thread_name);

        // Release the worker now that it can resolve its own slot
        let _ = gate_tx.send(());
        Ok(id)
    }

    /// Stop the script in a slot.
    ///
    /// The script is deactivated while it still owns its id, then the slot is
    /// removed and `stopped` is emitted. Returns `false` without side effects if
    /// the slot is empty or another caller is already stopping it.
    pub fn stop(&self, id: ScriptId) -> bool {
        let Some(script) = self.registry.claim(id) else {
            debug!(target: "scripting", "Stop requested for empty slot {}", id);
            return false;
        };

        script.deactivate(id);

        if let Some(slot) = self.registry.remove(id) {
            self.retire(slot.worker.into_join_handle());
        }

        info!(target: "scripting", "Stopped {} in slot {}", script.manifest().name, id);
        self.bus.emit(&ScriptEvent::Stopped(script.as_ref()));
        true
    }

    /// Stop every script present right now. Returns how many were stopped.
    ///
    /// Scripts admitted while this runs are left alone.
    pub fn stop_all(&self) -> usize {
        let ids = self.registry.ids();
        debug!(target: "scripting", "Stopping {} script(s)", ids.len());
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    /// Stop the calling worker's own script
    pub fn stop_self(&self) -> Result<(), HandlerError> {
        let id = self.current_slot()?;
        if let Some(script) = self.registry.get(id) {
            if script.is_running() {
                self.stop(id);
            }
        }
        Ok(())
    }

    /// Flip a script's paused flag and return the new value.
    ///
    /// Emits exactly one `paused` or `resumed` event matching the new state. Toggles
    /// on the same slot are serialized, notification included. A listener that
    /// pauses the same slot from inside that callback gets
    /// [`HandlerError::ReentrantPause`] instead of waiting on itself.
    pub fn pause(&self, id: ScriptId) -> Result<bool, HandlerError> {
        let control = self.registry.control(id).ok_or(HandlerError::NotFound(id))?;
        if control.guard.held_by_current() {
            return Err(HandlerError::ReentrantPause(id));
        }
        let _toggle = control.guard.enter();

        let paused = !control.script.is_paused();
        control.script.set_paused(paused);

        if paused {
            info!(target: "scripting", "Paused {} in slot {}", control.script.manifest().name, id);
            self.bus.emit(&ScriptEvent::Paused(control.script.as_ref()));
        } else {
            info!(target: "scripting", "Resumed {} in slot {}", control.script.manifest().name, id);
            self.bus.emit(&ScriptEvent::Resumed(control.script.as_ref()));
        }
        Ok(paused)
    }

    /// Ask a script to enter a break window.
    ///
    /// Returns `false` if the slot is empty, otherwise whether the script accepted.
    pub fn begin_break(&self, id: ScriptId) -> bool {
        self.registry
            .get(id)
            .is_some_and(|script| script.on_break_start())
    }

    /// End a script's break window. No-op for an empty slot.
    pub fn conclude_break(&self, id: ScriptId) {
        if let Some(script) = self.registry.get(id) {
            script.on_break_finish();
        }
    }

    /// [`begin_break`](Self::begin_break) for the calling worker's own script.
    ///
    /// A script that is no longer running is not asked and yields `Ok(false)`.
    pub fn begin_break_self(&self) -> Result<bool, HandlerError> {
        let id = self.current_slot()?;
        match self.registry.get(id) {
            Some(script) if script.is_running() => Ok(script.on_break_start()),
            _ => Ok(false),
        }
    }

    /// [`conclude_break`](Self::conclude_break) for the calling worker's own script
    pub fn conclude_break_self(&self) -> Result<(), HandlerError> {
        let id = self.current_slot()?;
        if let Some(script) = self.registry.get(id) {
            if script.is_running() {
                script.on_break_finish();
            }
        }
        Ok(())
    }

    /// Tell listeners that input handling changed on a source
    pub fn update_input(&self, source: &str, mask: InputMask) {
        debug!(target: "scripting", "Input changed on {}: {:?}", source, mask);
        self.bus.emit(&ScriptEvent::InputChanged { source, mask });
    }

    /// Stop everything and wait up to `timeout` for worker threads to exit.
    ///
    /// Returns the number of workers still running at the deadline; those stay
    /// detached. A timeout too large to form a deadline (such as `Duration::MAX`)
    /// waits for every worker. The calling thread is never waited on.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        let stopped = self.stop_all();
        let current = thread::current().id();
        let deadline = Instant::now().checked_add(timeout);

        let mut pending = std::mem::take(&mut *self.retired_handles());
        pending.retain(|handle| handle.thread().id() != current);

        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|handle| handle.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    warn!(target: "scripting", "A worker thread panicked before shutdown");
                }
            }
            pending = running;
            let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
            if pending.is_empty() || expired {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let detached = pending.len();
        if detached > 0 {
            warn!(
                target: "scripting",
                "{} worker(s) still running after {:?}, leaving them detached",
                detached,
                timeout
            );
            self.retired_handles().extend(pending);
        }

        info!(target: "scripting", "Shutdown stopped {} script(s)", stopped);
        detached
    }

    /// Release the calling worker's slot when its loop ends, if it still holds one
    pub(crate) fn release_current(&self) {
        if let Some(id) = self.registry.find_by_worker(thread::current().id()) {
            self.stop(id);
        }
    }

    fn current_slot(&self) -> Result<ScriptId, HandlerError> {
        self.registry
            .find_by_worker(thread::current().id())
            .ok_or_else(HandlerError::off_roster)
    }

    fn retired_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retire(&self, join: JoinHandle<()>) {
        let mut retired = self.retired_handles();
        // Finished workers have nothing left to wait for
        retired.retain(|handle| !handle.is_finished());
        retired.push(join);
    }
}
