//! Slot table of running scripts.
//!
//! Every operation takes the single table lock for its whole duration, so compound
//! steps such as "scan for a free id and insert" or "mark retiring and hand out the
//! script" are atomic. The raw map never leaves this module.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::trace;

use super::script::{Script, ScriptId};

/// Thread of execution dedicated to one script
#[derive(Debug)]
pub struct Worker {
    thread: ThreadId,
    name: String,
    join: JoinHandle<()>,
}

impl Worker {
    pub fn new(join: JoinHandle<()>) -> Self {
        let thread = join.thread().id();
        let name = join.thread().name().unwrap_or("<unnamed>").to_string();
        Self { thread, name, join }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_join_handle(self) -> JoinHandle<()> {
        self.join
    }
}

/// Serializes pause toggles on one slot and remembers which thread is toggling
#[derive(Default)]
pub(crate) struct ToggleGuard {
    lock: Mutex<()>,
    holder: Mutex<Option<ThreadId>>,
}

impl ToggleGuard {
    fn holder(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the calling thread is already inside a toggle of this slot
    pub(crate) fn held_by_current(&self) -> bool {
        *self.holder() == Some(thread::current().id())
    }

    pub(crate) fn enter(&self) -> Toggling<'_> {
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *self.holder() = Some(thread::current().id());
        Toggling {
            guard: self,
            _lock: lock,
        }
    }
}

/// Held for the duration of one toggle
pub(crate) struct Toggling<'a> {
    guard: &'a ToggleGuard,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for Toggling<'_> {
    fn drop(&mut self) {
        // Cleared before `_lock` is released
        *self.guard.holder() = None;
    }
}

/// One occupied entry of the table
pub struct Slot {
    pub id: ScriptId,
    pub script: Arc<dyn Script>,
    pub worker: Worker,
    /// Set once a stop has claimed this slot
    retiring: bool,
    /// Serializes pause toggles on this slot
    guard: Arc<ToggleGuard>,
}

/// Script handle plus the per-slot guard used for pause toggles
pub(crate) struct SlotControl {
    pub script: Arc<dyn Script>,
    pub guard: Arc<ToggleGuard>,
}

/// Registry of occupied slots, keyed by id
#[derive(Default)]
pub struct ScriptRegistry {
    slots: Mutex<BTreeMap<ScriptId, Slot>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<ScriptId, Slot>> {
        // Table updates are single inserts/removes, so a poisoned map is still consistent
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a script and its worker in the lowest free slot and return the id.
    ///
    /// Ids below the current size are scanned first so stopped slots are reused;
    /// when there is no gap the script is appended at the next integer. The id is
    /// stamped onto the script before the slot becomes visible to other threads.
    pub fn allocate(&self, script: Arc<dyn Script>, worker: Worker) -> ScriptId {
        let mut slots = self.table();

        let id = (0..slots.len())
            .map(ScriptId::new)
            .find(|id| !slots.contains_key(id))
            .unwrap_or(ScriptId::new(slots.len()));

        script.set_id(id);
        trace!(target: "scripting", "Allocated slot {} for worker {}", id, worker.name());
        slots.insert(
            id,
            Slot {
                id,
                script,
                worker,
                retiring: false,
                guard: Arc::default(),
            },
        );
        id
    }

    pub fn get(&self, id: ScriptId) -> Option<Arc<dyn Script>> {
        self.table().get(&id).map(|slot| Arc::clone(&slot.script))
    }

    pub(crate) fn control(&self, id: ScriptId) -> Option<SlotControl> {
        self.table().get(&id).map(|slot| SlotControl {
            script: Arc::clone(&slot.script),
            guard: Arc::clone(&slot.guard),
        })
    }

    /// Mark a slot as being stopped and return its script.
    ///
    /// Only the first caller for a given occupancy gets the script back; the slot
    /// stays in the table (id still reserved, worker still resolvable) until
    /// [`ScriptRegistry::remove`].
    pub fn claim(&self, id: ScriptId) -> Option<Arc<dyn Script>> {
        let mut slots = self.table();
        let slot = slots.get_mut(&id)?;
        if slot.retiring {
            return None;
        }
        slot.retiring = true;
        Some(Arc::clone(&slot.script))
    }

    /// Delete a slot. Other ids are left untouched.
    pub fn remove(&self, id: ScriptId) -> Option<Slot> {
        self.table().remove(&id)
    }

    /// Point-in-time copy of the table, ascending by id
    pub fn snapshot(&self) -> Vec<(ScriptId, Arc<dyn Script>)> {
        self.table()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(&slot.script)))
            .collect()
    }

    /// Occupied ids, ascending
    pub fn ids(&self) -> Vec<ScriptId> {
        self.table().keys().copied().collect()
    }

    /// Slot whose worker is the given thread
    pub fn find_by_worker(&self, thread: ThreadId) -> Option<ScriptId> {
        self.table()
            .values()
            .find(|slot| slot.worker.thread_id() == thread)
            .map(|slot| slot.id)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
