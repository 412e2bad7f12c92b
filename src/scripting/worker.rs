//! Body of a script's worker thread.
//!
//! The loop is cooperative: pause and break only change flags, which the loop
//! checks between polls. Stopping cancels the script's token, which ends any
//! in-progress [`ScriptContext::sleep`] and the loop itself.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::context::ScriptContext;
use super::handler::ScriptHandler;
use super::script::{Poll, Script};
use crate::randoms::RandomStep;

/// Releases the slot when the worker exits, including by unwinding
struct ReleaseGuard<'a> {
    ctx: &'a ScriptContext,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(
                target: "scripting",
                "Script {} panicked; releasing slot {:?}",
                self.ctx.script().manifest().name,
                self.ctx.id()
            );
        } else {
            self.ctx.script().on_finish(self.ctx);
        }
        self.ctx.handler().release_current();
    }
}

/// Whether a random took control during this iteration
enum RandomOutcome {
    Idle,
    Handled,
    Abort,
}

pub(crate) fn run(handler: Arc<ScriptHandler>, script: Arc<dyn Script>) {
    let name = script.manifest().name;
    let ctx = ScriptContext::new(Arc::clone(&handler), Arc::clone(&script));
    let _release = ReleaseGuard { ctx: &ctx };

    debug!(target: "scripting", "Worker for {} entering slot {:?}", name, ctx.id());

    if !script.on_start(&ctx) {
        info!(target: "scripting", "Script {} declined to start", name);
        return;
    }

    let pause_poll = handler.config().pause_poll();
    let break_poll = handler.config().break_poll();

    while script.is_running() && !ctx.is_cancelled() {
        if script.is_paused() {
            ctx.sleep(pause_poll);
            continue;
        }

        if script.is_on_break() {
            ctx.sleep(break_poll);
            continue;
        }

        match run_random(&ctx) {
            RandomOutcome::Handled => continue,
            RandomOutcome::Abort => break,
            RandomOutcome::Idle => {}
        }

        match script.poll(&ctx) {
            Poll::Sleep(delay) => {
                if !ctx.sleep(delay) {
                    break;
                }
            }
            Poll::Stop => {
                debug!(target: "scripting", "Script {} asked to stop", name);
                break;
            }
        }
    }

    debug!(target: "scripting", "Worker for {} leaving slot {:?}", name, ctx.id());
}

/// Hand control to an active random, if the script agrees to a break
fn run_random(ctx: &ScriptContext) -> RandomOutcome {
    let handler = ctx.handler();
    let Some(lease) = handler.randoms().next_active() else {
        return RandomOutcome::Idle;
    };

    match handler.begin_break_self() {
        Ok(true) => {}
        Ok(false) => {
            debug!(target: "randoms", "Script declined a break for '{}'", lease.name());
            return RandomOutcome::Idle;
        }
        Err(e) => {
            // Losing the slot after a stop is expected; anything else is a bug
            if !ctx.is_cancelled() {
                error!(target: "randoms", "Cannot start break for '{}': {}", lease.name(), e);
            }
            return RandomOutcome::Abort;
        }
    }

    info!(
        target: "randoms",
        "Random '{}' taking over from {}",
        lease.name(),
        ctx.script().manifest().name
    );

    let exec = handler.randoms().context();
    while !ctx.is_cancelled() {
        match lease.step(exec) {
            RandomStep::Continue(delay) => {
                ctx.sleep(delay);
            }
            RandomStep::Done => break,
        }
    }
    drop(lease);

    if let Err(e) = handler.conclude_break_self() {
        if !ctx.is_cancelled() {
            error!(target: "randoms", "Cannot conclude break: {}", e);
        }
        return RandomOutcome::Abort;
    }
    RandomOutcome::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RandomsConfig, ScriptingConfig};
    use crate::error::HandlerError;
    use crate::events::EventKind;
    use crate::randoms::{demo::Interruption, RandomEntry, RandomEventPool};
    use crate::scripting::testing::{wait_until, RecordingListener};
    use crate::scripting::{ExecutionContext, ScriptManifest, ScriptState};
    use crate::scripts::DemoWorld;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> ScriptingConfig {
        ScriptingConfig {
            pause_poll_ms: 5,
            break_poll_ms: 5,
            ..ScriptingConfig::default()
        }
    }

    /// Counts polls and optionally stops after a limit
    #[derive(Default)]
    struct Ticker {
        state: ScriptState,
        polls: AtomicU32,
        limit: Option<u32>,
        refuse_breaks: bool,
        finished: AtomicU32,
    }

    impl Script for Ticker {
        fn manifest(&self) -> ScriptManifest {
            ScriptManifest::named("Ticker")
        }

        fn state(&self) -> &ScriptState {
            &self.state
        }

        fn poll(&self, _ctx: &ScriptContext) -> Poll {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.limit {
                Some(limit) if polls >= limit => Poll::Stop,
                _ => Poll::sleep_ms(2),
            }
        }

        fn on_break_start(&self) -> bool {
            if self.refuse_breaks {
                return false;
            }
            self.state.set_on_break(true);
            true
        }

        fn on_finish(&self, _ctx: &ScriptContext) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder_for(handler: &Arc<ScriptHandler>) -> Arc<RecordingListener> {
        let recorder = Arc::new(RecordingListener::default());
        handler.subscribe(recorder.clone());
        recorder
    }

    #[test]
    fn test_poll_stop_releases_slot() {
        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let recorder = recorder_for(&handler);
        let ticker = Arc::new(Ticker {
            limit: Some(3),
            ..Default::default()
        });

        handler.run(ticker.clone()).unwrap();

        assert!(wait_until(WAIT, || recorder.count(EventKind::Stopped) == 1));
        assert_eq!(ticker.polls.load(Ordering::SeqCst), 3);
        assert_eq!(ticker.finished.load(Ordering::SeqCst), 1);
        assert_eq!(handler.script_count(), 0);
    }

    #[test]
    fn test_paused_script_does_not_poll() {
        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let ticker = Arc::new(Ticker::default());
        let id = handler.run(ticker.clone()).unwrap();

        assert!(wait_until(WAIT, || ticker.polls.load(Ordering::SeqCst) > 0));
        handler.pause(id).unwrap();
        // let an in-flight poll finish
        std::thread::sleep(Duration::from_millis(30));
        let frozen = ticker.polls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticker.polls.load(Ordering::SeqCst), frozen);

        handler.pause(id).unwrap();
        assert!(wait_until(WAIT, || ticker.polls.load(Ordering::SeqCst) > frozen));
        handler.shutdown(WAIT);
    }

    #[test]
    fn test_external_stop_ends_worker() {
        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let ticker = Arc::new(Ticker::default());
        let id = handler.run(ticker.clone()).unwrap();

        assert!(handler.stop(id));
        assert!(wait_until(WAIT, || ticker.finished.load(Ordering::SeqCst) == 1));
        assert_eq!(handler.shutdown(WAIT), 0);
    }

    #[test]
    fn test_panicking_script_releases_slot() {
        #[derive(Default)]
        struct Bomb {
            state: ScriptState,
        }

        impl Script for Bomb {
            fn manifest(&self) -> ScriptManifest {
                ScriptManifest::named("Bomb")
            }

            fn state(&self) -> &ScriptState {
                &self.state
            }

            fn poll(&self, _ctx: &ScriptContext) -> Poll {
                panic!("script blew up");
            }
        }

        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let recorder = recorder_for(&handler);
        handler.run(Arc::new(Bomb::default())).unwrap();

        assert!(wait_until(WAIT, || recorder.count(EventKind::Stopped) == 1));
        assert_eq!(handler.script_count(), 0);
    }

    #[test]
    fn test_random_takes_over_during_break() {
        let ctx = ExecutionContext::new(DemoWorld::default());
        let (pool, report) = RandomEventPool::build(
            &[RandomEntry::of::<Interruption>("interruption")],
            &ctx,
            &RandomsConfig::default(),
        );
        assert!(report.is_complete());

        let handler = ScriptHandler::with_randoms(ctx.clone(), fast_config(), pool);
        let ticker = Arc::new(Ticker::default());
        handler.run(ticker.clone()).unwrap();

        let world = ctx.get::<DemoWorld>().unwrap();
        world.post_interruption();

        assert!(wait_until(WAIT, || world.resolved_interruptions() == 1));
        assert!(wait_until(WAIT, || !ticker.is_on_break()));
        let before = ticker.polls.load(Ordering::SeqCst);
        assert!(wait_until(WAIT, || ticker.polls.load(Ordering::SeqCst) > before));
        handler.shutdown(WAIT);
    }

    #[test]
    fn test_refused_break_keeps_polling() {
        let ctx = ExecutionContext::new(DemoWorld::default());
        let (pool, _) = RandomEventPool::build(
            &[RandomEntry::of::<Interruption>("interruption")],
            &ctx,
            &RandomsConfig::default(),
        );
        let handler = ScriptHandler::with_randoms(ctx.clone(), fast_config(), pool);
        let ticker = Arc::new(Ticker {
            refuse_breaks: true,
            ..Default::default()
        });
        handler.run(ticker.clone()).unwrap();

        let world = ctx.get::<DemoWorld>().unwrap();
        world.post_interruption();
        let before = ticker.polls.load(Ordering::SeqCst);

        assert!(wait_until(WAIT, || ticker.polls.load(Ordering::SeqCst) > before + 5));
        assert_eq!(world.resolved_interruptions(), 0);
        handler.shutdown(WAIT);
    }

    #[test]
    fn test_self_operations_resolve_own_slot() {
        /// Records what its own self-break calls resolved to
        #[derive(Default)]
        struct SelfBreaker {
            state: ScriptState,
            seen: Mutex<Vec<(Option<crate::scripting::ScriptId>, bool)>>,
        }

        impl Script for SelfBreaker {
            fn manifest(&self) -> ScriptManifest {
                ScriptManifest::named("SelfBreaker")
            }

            fn state(&self) -> &ScriptState {
                &self.state
            }

            fn poll(&self, ctx: &ScriptContext) -> Poll {
                let accepted = ctx.handler().begin_break_self().unwrap_or(false);
                let on_break = self.is_on_break();
                ctx.handler().conclude_break_self().unwrap();
                self.seen.lock().unwrap().push((ctx.id(), accepted && on_break));
                if self.seen.lock().unwrap().len() >= 5 {
                    return Poll::Stop;
                }
                Poll::sleep_ms(2)
            }
        }

        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let recorder = recorder_for(&handler);
        let first = handler.run(Arc::new(Ticker::default())).unwrap();
        let breaker = Arc::new(SelfBreaker::default());
        let id = handler.run(breaker.clone()).unwrap();
        handler.stop(first);

        assert!(wait_until(WAIT, || recorder.count(EventKind::Stopped) == 2));
        let seen = breaker.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|entry| *entry == (Some(id), true)));
    }

    #[test]
    fn test_stop_via_context_from_worker() {
        #[derive(Default)]
        struct Quitter {
            state: ScriptState,
            result: Mutex<Option<Result<(), String>>>,
        }

        impl Script for Quitter {
            fn manifest(&self) -> ScriptManifest {
                ScriptManifest::named("Quitter")
            }

            fn state(&self) -> &ScriptState {
                &self.state
            }

            fn poll(&self, ctx: &ScriptContext) -> Poll {
                let result = ctx.stop().map_err(|e: HandlerError| e.to_string());
                *self.result.lock().unwrap() = Some(result);
                Poll::sleep_ms(1000)
            }
        }

        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let recorder = recorder_for(&handler);
        let quitter = Arc::new(Quitter::default());
        handler.run(quitter.clone()).unwrap();

        assert!(wait_until(WAIT, || recorder.count(EventKind::Stopped) == 1));
        assert_eq!(*quitter.result.lock().unwrap(), Some(Ok(())));
        // The long sleep is cut short by the cancellation
        assert_eq!(handler.shutdown(WAIT), 0);
    }

    /// Sleeps as long as it can on every poll
    #[derive(Default)]
    struct Sleeper {
        state: ScriptState,
        polls: AtomicU32,
        finished: AtomicU32,
    }

    impl Script for Sleeper {
        fn manifest(&self) -> ScriptManifest {
            ScriptManifest::named("Sleeper")
        }

        fn state(&self) -> &ScriptState {
            &self.state
        }

        fn poll(&self, _ctx: &ScriptContext) -> Poll {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Poll::Sleep(Duration::MAX)
        }

        fn on_finish(&self, _ctx: &ScriptContext) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unbounded_sleep_lasts_until_stopped() {
        let handler = ScriptHandler::new(ExecutionContext::empty(), fast_config());
        let recorder = recorder_for(&handler);
        let sleeper = Arc::new(Sleeper::default());
        let id = handler.run(sleeper.clone()).unwrap();

        assert!(wait_until(WAIT, || sleeper.polls.load(Ordering::SeqCst) == 1));
        std::thread::sleep(Duration::from_millis(60));
        assert!(handler.get(id).is_some());
        assert_eq!(recorder.count(EventKind::Stopped), 0);
        assert_eq!(sleeper.polls.load(Ordering::SeqCst), 1);

        assert!(handler.stop(id));
        assert!(wait_until(WAIT, || sleeper.finished.load(Ordering::SeqCst) == 1));
        assert_eq!(recorder.count(EventKind::Stopped), 1);
        assert_eq!(handler.shutdown(WAIT), 0);
    }

    #[test]
    fn test_huge_pause_poll_still_stops() {
        let config = ScriptingConfig {
            pause_poll_ms: u64::MAX,
            ..ScriptingConfig::default()
        };
        let handler = ScriptHandler::new(ExecutionContext::empty(), config);
        let ticker = Arc::new(Ticker::default());
        let id = handler.run(ticker.clone()).unwrap();

        assert!(wait_until(WAIT, || ticker.polls.load(Ordering::SeqCst) > 0));
        handler.pause(id).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(handler.get(id).is_some());

        assert!(handler.stop(id));
        assert!(wait_until(WAIT, || ticker.finished.load(Ordering::SeqCst) == 1));
        assert_eq!(handler.shutdown(WAIT), 0);
    }
}
