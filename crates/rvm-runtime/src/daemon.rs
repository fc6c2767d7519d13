//! Daemon wiring: bus server, polling loop, sensor feed, status heartbeat
//! and the tick thread, all sharing one cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use rvm_bus::{BusServer, MessageBus};
use rvm_core::{Engine, SharedSample, SimulatedController, StatusHandle};
use tokio::task::JoinSet;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;

use crate::cli::DaemonOpts;
use crate::poll_loop::run_poll_loop;
use crate::sim_feed::run_sim_feed;
use crate::tick_loop::spawn_tick_loop;

/// How long shutdown waits for each background task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// RunningDaemon
// ---------------------------------------------------------------------------

/// Handle to a started daemon. Dropping it without [`shutdown`] leaves the
/// tasks running until the runtime stops.
///
/// [`shutdown`]: RunningDaemon::shutdown
pub struct RunningDaemon {
    addr: SocketAddr,
    bus: Arc<MessageBus>,
    controller: SimulatedController,
    status: StatusHandle,
    cancel: CancellationToken,
    tasks: JoinSet<&'static str>,
    tick: Option<JoinHandle<()>>,
}

impl RunningDaemon {
    /// Address the bus actually bound (resolves port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn controller(&self) -> &SimulatedController {
        &self.controller
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Resolves when any background task ends on its own, naming it.
    pub async fn exited(&mut self) -> &'static str {
        match self.tasks.join_next().await {
            Some(Ok(name)) => name,
            Some(Err(e)) => {
                tracing::error!(error = %e, "background task failed");
                "background task"
            }
            // Nothing left to wait on; only a signal can end the daemon now.
            None => std::future::pending().await,
        }
    }

    /// Cancel everything and wait for the tasks and the tick thread.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.cancel.cancel();

        while !self.tasks.is_empty() {
            match tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.join_next()).await {
                Ok(Some(Ok(name))) => tracing::debug!(task = name, "task stopped"),
                Ok(Some(Err(e))) => tracing::warn!(error = %e, "task ended abnormally"),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        remaining = self.tasks.len(),
                        "tasks did not stop in time, aborting"
                    );
                    self.tasks.abort_all();
                    break;
                }
            }
        }

        if let Some(tick) = self.tick.take() {
            tokio::task::spawn_blocking(move || tick.join())
                .await
                .context("joining tick thread")?
                .map_err(|_| anyhow::anyhow!("tick thread panicked"))?;
        }

        tracing::info!(state = %self.status.get().state, "daemon stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Bind the bus and start every component. Returns once the listener is up.
pub async fn start(listen: SocketAddr, opts: &DaemonOpts) -> anyhow::Result<RunningDaemon> {
    let config = opts.engine_config();
    tracing::info!(
        tick_ms = config.tick_interval_ms,
        poll_ms = opts.poll_ms,
        vision_timeout_ms = config.vision_timeout_ms,
        dump_timeout_ms = config.dump_timeout_ms,
        detection_policy = %config.detection_policy,
        "daemon config"
    );

    let cancel = CancellationToken::new();
    let bus = Arc::new(MessageBus::new());
    let mut tasks = JoinSet::new();

    // Bus server
    let server =
        BusServer::new(listen, Arc::clone(&bus), cancel.clone()).with_max_peers(opts.max_peers);
    let (listener, addr) = server
        .bind()
        .await
        .with_context(|| format!("cannot listen on {listen}"))?;
    tasks.spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!(error = %e, "bus server error");
        }
        "bus server"
    });

    // Field controller + polling loop
    let sim = SimulatedController::new();
    let controller = Arc::new(sim.clone());
    let sample = SharedSample::new();
    tasks.spawn({
        let controller = Arc::clone(&controller);
        let sample = sample.clone();
        let cancel = cancel.clone();
        let poll_ms = opts.poll_ms;
        async move {
            run_poll_loop(controller, sample, poll_ms, cancel).await;
            "poll loop"
        }
    });

    // Sensor feed for the simulator
    tasks.spawn({
        let bus = Arc::clone(&bus);
        let sim = sim.clone();
        let cancel = cancel.clone();
        let poll_ms = opts.poll_ms;
        async move {
            run_sim_feed(bus, sim, poll_ms, cancel).await;
            "sim feed"
        }
    });

    // State machine
    let engine = Engine::new(controller, Arc::clone(&bus), sample, config);
    let status = engine.status_handle();
    let tick = spawn_tick_loop(engine, cancel.clone()).context("cannot start tick thread")?;

    if opts.status_interval_secs > 0 {
        tasks.spawn(heartbeat(
            Arc::clone(&bus),
            status.clone(),
            Duration::from_secs(opts.status_interval_secs),
            cancel.clone(),
        ));
    }

    Ok(RunningDaemon {
        addr,
        bus,
        controller: sim,
        status,
        cancel,
        tasks,
        tick: Some(tick),
    })
}

/// Run the daemon until ctrl-c / SIGTERM or until a component dies.
pub async fn run_daemon(listen: SocketAddr, opts: DaemonOpts) -> anyhow::Result<()> {
    let mut daemon = start(listen, &opts).await?;
    tracing::info!(addr = %daemon.addr(), "daemon ready");

    tokio::select! {
        () = shutdown_signal() => {}
        name = daemon.exited() => {
            tracing::warn!(task = name, "exited unexpectedly");
        }
    }

    daemon.shutdown().await
}

async fn heartbeat(
    bus: Arc<MessageBus>,
    status: StatusHandle,
    period: Duration,
    cancel: CancellationToken,
) -> &'static str {
    let mut ticker = interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return "heartbeat",
        }
        let view = status.get();
        let peers: Vec<String> = bus.peers().into_iter().map(|p| p.name).collect();
        tracing::info!(state = %view.state, since = %view.since, peers = ?peers, "status");
    }
}

/// Wait for ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot watch SIGTERM, ctrl-c only");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::MachineState;

    fn fast_opts() -> DaemonOpts {
        DaemonOpts {
            tick_ms: 5,
            poll_ms: 5,
            status_interval_secs: 0,
            ..DaemonOpts::default()
        }
    }

    #[tokio::test]
    async fn starts_idle_on_ephemeral_port() {
        let daemon = start("127.0.0.1:0".parse().unwrap(), &fast_opts())
            .await
            .unwrap();
        assert_ne!(daemon.addr().port(), 0);
        assert_eq!(daemon.status().get().state, MachineState::Idle);
        assert!(daemon.bus().peers().is_empty());
        daemon.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn port_in_use_is_an_error() {
        let first = start("127.0.0.1:0".parse().unwrap(), &fast_opts())
            .await
            .unwrap();
        let second = start(first.addr(), &fast_opts()).await;
        assert!(second.is_err());
        first.shutdown().await.unwrap();
    }
}
