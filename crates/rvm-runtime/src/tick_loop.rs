//! Dedicated OS thread driving the state machine.
//!
//! The engine blocks inside `get_photo` while it waits for the vision peer,
//! so it gets its own thread instead of a tokio worker. A panic inside one
//! tick is logged and the loop carries on with the next one.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rvm_core::{Engine, FieldController, PeerLink};
use tokio_util::sync::CancellationToken;

pub const TICK_THREAD_NAME: &str = "rvm-tick";

/// Start ticking `engine` every `tick_interval` until `cancel` fires.
pub fn spawn_tick_loop<C, P>(
    mut engine: Engine<C, P>,
    cancel: CancellationToken,
) -> io::Result<JoinHandle<()>>
where
    C: FieldController + 'static,
    P: PeerLink + 'static,
{
    let period = engine.config().tick_interval();
    thread::Builder::new()
        .name(TICK_THREAD_NAME.into())
        .spawn(move || run(&mut engine, period, &cancel))
}

fn run<C: FieldController, P: PeerLink>(
    engine: &mut Engine<C, P>,
    period: Duration,
    cancel: &CancellationToken,
) {
    tracing::info!(
        period_ms = period.as_millis() as u64,
        state = %engine.state(),
        "tick loop started"
    );
    let mut panics: u64 = 0;

    while !cancel.is_cancelled() {
        let started = Instant::now();

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| engine.tick())) {
            panics += 1;
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            tracing::error!(panics, reason = %reason, "tick panicked, continuing");
        }

        if let Some(rest) = period.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    tracing::info!(state = %engine.state(), "tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use rvm_core::{APP_PEER, EngineConfig, MachineState, SharedSample, SimulatedController};

    /// Panics on the first inbox read, then behaves as an empty bus.
    #[derive(Default)]
    struct FlakyLink {
        takes: AtomicUsize,
    }

    impl PeerLink for FlakyLink {
        fn take(&self, _peer: &str) -> Option<String> {
            if self.takes.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("inbox exploded");
            }
            None
        }

        fn wait_take(&self, _peer: &str, _timeout: Duration) -> Option<String> {
            None
        }

        fn send(&self, _peer: &str, _message: &str) {}

        fn is_connected(&self, _peer: &str) -> bool {
            false
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            tick_interval_ms: 5,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn panicking_tick_does_not_stop_the_loop() {
        let link = Arc::new(FlakyLink::default());
        let engine = Engine::new(
            SimulatedController::new(),
            Arc::clone(&link),
            SharedSample::new(),
            config(),
        );
        let cancel = CancellationToken::new();
        let handle = spawn_tick_loop(engine, cancel.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while link.takes.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        cancel.cancel();
        handle.join().unwrap();
        assert!(link.takes.load(Ordering::SeqCst) >= 5);
    }

    /// Hands out one app command, then stays quiet.
    struct OneShotLink(Mutex<Option<String>>);

    impl PeerLink for OneShotLink {
        fn take(&self, peer: &str) -> Option<String> {
            if peer == APP_PEER {
                self.0.lock().unwrap().take()
            } else {
                None
            }
        }

        fn wait_take(&self, _peer: &str, _timeout: Duration) -> Option<String> {
            None
        }

        fn send(&self, _peer: &str, _message: &str) {}

        fn is_connected(&self, _peer: &str) -> bool {
            true
        }
    }

    #[test]
    fn status_visible_from_other_threads() {
        let link = OneShotLink(Mutex::new(Some("dump_container:plastic".into())));
        // Nothing polls the controller, so the limit switch never trips.
        let engine = Engine::new(
            SimulatedController::new(),
            link,
            SharedSample::new(),
            EngineConfig {
                dump_timeout_ms: 20,
                ..config()
            },
        );
        let status = engine.status_handle();
        let cancel = CancellationToken::new();
        let handle = spawn_tick_loop(engine, cancel.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while status.get().state != MachineState::Error && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        cancel.cancel();
        handle.join().unwrap();
        assert_eq!(status.get().state, MachineState::Error);
    }
}
