//! Polling loop: reads the field controller on a fixed period and stores
//! each complete sample into the shared cell the state machine reads.
//! Runs as a tokio task; the controller call itself is blocking I/O.

use std::sync::Arc;

use rvm_core::{ControllerError, FieldController, SharedSample};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Poll until `cancel` fires. A failed poll keeps the previous sample.
pub async fn run_poll_loop<C: FieldController + 'static>(
    controller: Arc<C>,
    sample: SharedSample,
    poll_ms: u64,
    cancel: CancellationToken,
) {
    let mut ticker = interval(Duration::from_millis(poll_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failing = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => {
                tracing::debug!("poll loop: cancellation requested");
                return;
            }
        }

        match poll_once(&controller, &sample).await {
            Ok(()) => {
                if failing {
                    tracing::info!("field controller recovered");
                    failing = false;
                }
            }
            Err(e) => {
                // Log the first failure loudly, repeats quietly.
                if failing {
                    tracing::debug!(error = %e, "poll failed");
                } else {
                    tracing::warn!(error = %e, "poll failed, keeping last sample");
                    failing = true;
                }
            }
        }
    }
}

/// One poll. The sample is stored only when the whole read succeeded.
pub async fn poll_once<C: FieldController + 'static>(
    controller: &Arc<C>,
    sample: &SharedSample,
) -> Result<(), ControllerError> {
    let ctrl = Arc::clone(controller);
    let polled = tokio::task::spawn_blocking(move || ctrl.sample())
        .await
        .map_err(|e| ControllerError::Unavailable(format!("poll task failed: {e}")))??;
    sample.store(polled);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::SimulatedController;

    #[tokio::test]
    async fn poll_once_stores_sample() {
        let sim = Arc::new(SimulatedController::new());
        sim.set(|s| s.sensors.curtain = true);
        let cell = SharedSample::new();

        poll_once(&sim, &cell).await.unwrap();
        let got = cell.load();
        assert!(got.sensors.curtain);
        assert!(got.sampled_at.is_some());
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_sample() {
        let sim = Arc::new(SimulatedController::new());
        let cell = SharedSample::new();
        poll_once(&sim, &cell).await.unwrap();
        let before = cell.load();

        sim.set_offline(true);
        sim.set(|s| s.sensors.curtain = true);
        assert!(poll_once(&sim, &cell).await.is_err());
        assert_eq!(cell.load(), before);
    }

    #[tokio::test]
    async fn loop_keeps_sampling_until_cancelled() {
        let sim = Arc::new(SimulatedController::new());
        let cell = SharedSample::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_poll_loop(
            Arc::clone(&sim),
            cell.clone(),
            5,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        sim.set(|s| s.sensors.can_present = true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cell.load().sensors.can_present);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
    }
}
