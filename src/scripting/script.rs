use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::context::{ExecutionContext, ScriptContext};

/// Slot number a running script occupies in the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(usize);

impl ScriptId {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static descriptive metadata attached to a script type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptManifest {
    /// Display name, also used to name the worker thread
    pub name: &'static str,
    pub version: &'static str,
    pub authors: &'static [&'static str],
    pub description: &'static str,
}

impl ScriptManifest {
    /// Manifest with only a name set
    pub const fn named(name: &'static str) -> Self {
        Self {
            name,
            version: "0.0.0",
            authors: &[],
            description: "",
        }
    }
}

/// What a script wants the worker to do after one iteration of its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Sleep for the given duration, then poll again
    Sleep(Duration),
    /// Leave the loop and release the slot
    Stop,
}

impl Poll {
    pub fn sleep_ms(ms: u64) -> Self {
        Poll::Sleep(Duration::from_millis(ms))
    }

    /// Sleep for a random duration in `[min_ms, max_ms]`
    pub fn sleep_between(min_ms: u64, max_ms: u64) -> Self {
        let (lo, hi) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        Poll::sleep_ms(rand::thread_rng().gen_range(lo..=hi))
    }
}

const UNASSIGNED: usize = usize::MAX;

/// Standard bookkeeping shared by every script.
///
/// Script implementations embed one of these and return it from
/// [`Script::state`]; the provided trait methods read and write it. All flags are
/// atomics so the handler thread and the worker thread can touch them at once.
#[derive(Debug)]
pub struct ScriptState {
    id: AtomicUsize,
    running: AtomicBool,
    paused: AtomicBool,
    on_break: AtomicBool,
    cancel: CancellationToken,
    context: OnceLock<ExecutionContext>,
    started_at: OnceLock<DateTime<Utc>>,
}

impl ScriptState {
    pub fn new() -> Self {
        Self {
            id: AtomicUsize::new(UNASSIGNED),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            on_break: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            context: OnceLock::new(),
            started_at: OnceLock::new(),
        }
    }

    /// Attach the execution context and mark the script as running.
    ///
    /// A state can only be initialized once. Returns `false` and keeps the first
    /// context if it already was, so a script can never be admitted twice.
    pub fn initialize(&self, ctx: &ExecutionContext) -> bool {
        if self.context.set(ctx.clone()).is_err() {
            warn!(target: "scripting", "Script state initialized twice, keeping first context");
            return false;
        }
        let _ = self.started_at.set(Utc::now());
        self.running.store(true, Ordering::SeqCst);
        true
    }

    pub fn id(&self) -> Option<ScriptId> {
        match self.id.load(Ordering::SeqCst) {
            UNASSIGNED => None,
            id => Some(ScriptId(id)),
        }
    }

    pub fn set_id(&self, id: ScriptId) {
        self.id.store(id.0, Ordering::SeqCst);
    }

    /// Running until deactivated or cancelled
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_on_break(&self) -> bool {
        self.on_break.load(Ordering::SeqCst)
    }

    pub fn set_on_break(&self, on_break: bool) {
        self.on_break.store(on_break, Ordering::SeqCst);
    }

    /// Stop the script and fire its cancellation token.
    ///
    /// The id must match the slot the script was assigned; a mismatched request is
    /// refused so one slot cannot tear down another slot's script.
    pub fn deactivate(&self, id: ScriptId) {
        if self.id() != Some(id) {
            warn!(
                target: "scripting",
                "Refusing to deactivate script: requested slot {} but script holds {:?}",
                id,
                self.id()
            );
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Token cancelled when the script is deactivated
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.get()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }
}

impl Default for ScriptState {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of automation run on its own worker thread.
///
/// Implementors provide the manifest, the embedded [`ScriptState`] and the loop body
/// ([`Script::poll`]). The lifecycle methods have default implementations backed by
/// the state and only need overriding when a script wants to react to them, for
/// example to refuse a break.
pub trait Script: Send + Sync + 'static {
    /// Static metadata; read once when the worker thread is created
    fn manifest(&self) -> ScriptManifest;

    /// Bookkeeping backing the default lifecycle methods
    fn state(&self) -> &ScriptState;

    /// One iteration of the script's loop
    fn poll(&self, ctx: &ScriptContext) -> Poll;

    /// Called on the worker thread before the first poll. Returning `false` ends
    /// the script without polling.
    fn on_start(&self, _ctx: &ScriptContext) -> bool {
        true
    }

    /// Called on the worker thread after the loop ends
    fn on_finish(&self, _ctx: &ScriptContext) {}

    /// Returns `false` if the script was already initialized
    fn initialize(&self, ctx: &ExecutionContext) -> bool {
        self.state().initialize(ctx)
    }

    fn id(&self) -> Option<ScriptId> {
        self.state().id()
    }

    fn set_id(&self, id: ScriptId) {
        self.state().set_id(id);
    }

    fn is_running(&self) -> bool {
        self.state().is_running()
    }

    fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    fn set_paused(&self, paused: bool) {
        self.state().set_paused(paused);
    }

    fn deactivate(&self, id: ScriptId) {
        self.state().deactivate(id);
    }

    fn is_on_break(&self) -> bool {
        self.state().is_on_break()
    }

    /// Asked to yield for a break. Returns whether the script entered the break window.
    fn on_break_start(&self) -> bool {
        self.state().set_on_break(true);
        true
    }

    fn on_break_finish(&self) {
        self.state().set_on_break(false);
    }
}

impl fmt::Debug for dyn Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.manifest().name)
            .field("id", &self.id())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_unassigned_and_idle() {
        let state = ScriptState::new();
        assert_eq!(state.id(), None);
        assert!(!state.is_running());
        assert!(!state.is_paused());
        assert!(state.started_at().is_none());
    }

    #[test]
    fn test_initialize_marks_running() {
        let state = ScriptState::new();
        assert!(state.initialize(&ExecutionContext::empty()));
        assert!(state.is_running());
        assert!(state.context().is_some());
        assert!(state.started_at().is_some());
    }

    #[test]
    fn test_second_initialize_is_refused() {
        let state = ScriptState::new();
        assert!(state.initialize(&ExecutionContext::new(1u32)));
        assert!(!state.initialize(&ExecutionContext::new(2u32)));
        assert_eq!(state.context().and_then(|ctx| ctx.get::<u32>()), Some(&1));
    }

    #[test]
    fn test_deactivate_cancels_token() {
        let state = ScriptState::new();
        assert!(state.initialize(&ExecutionContext::empty()));
        state.set_id(ScriptId::new(2));
        let token = state.cancellation();

        state.deactivate(ScriptId::new(2));

        assert!(!state.is_running());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_deactivate_with_wrong_id_is_refused() {
        let state = ScriptState::new();
        assert!(state.initialize(&ExecutionContext::empty()));
        state.set_id(ScriptId::new(1));

        state.deactivate(ScriptId::new(4));

        assert!(state.is_running());
        assert!(!state.cancellation().is_cancelled());
    }

    #[test]
    fn test_sleep_between_stays_in_range() {
        for _ in 0..50 {
            match Poll::sleep_between(300, 600) {
                Poll::Sleep(d) => {
                    assert!(d >= Duration::from_millis(300));
                    assert!(d <= Duration::from_millis(600));
                }
                Poll::Stop => panic!("expected sleep"),
            }
        }
        assert_eq!(Poll::sleep_between(5, 5), Poll::sleep_ms(5));
        match Poll::sleep_between(9, 2) {
            Poll::Sleep(d) => assert!(d >= Duration::from_millis(2) && d <= Duration::from_millis(9)),
            Poll::Stop => panic!("expected sleep"),
        }
    }
}
