//! Sensor feed for the simulated field controller.
//!
//! A peer registered as `sim` sends flat JSON objects whose keys name
//! sensor flags or counters, e.g. `{"curtain":true,"bottle_present":true}`.
//! Each patch is merged into the simulator's raw sample; the polling loop
//! then picks it up like any other reading. `jammed` and `offline` toggle
//! the simulator's fault modes.

use std::sync::Arc;

use anyhow::{Context, bail};
use rvm_bus::MessageBus;
use rvm_core::{Counters, SensorSnapshot, SimInputs, SimulatedController};
use serde_json::{Map, Value};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;

/// Registration name of the sensor-feed peer.
pub const SIM_PEER: &str = "sim";

/// Drain the `sim` inbox every `poll_ms` until cancelled.
pub async fn run_sim_feed(
    bus: Arc<MessageBus>,
    sim: SimulatedController,
    poll_ms: u64,
    cancel: CancellationToken,
) {
    let mut ticker = interval(Duration::from_millis(poll_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }

        let Some(raw) = bus.get_command(SIM_PEER) else {
            continue;
        };
        match apply_patch(&sim, &raw) {
            Ok(keys) => {
                tracing::info!(keys = ?keys, "sim: patch applied");
            }
            Err(e) => {
                tracing::warn!(error = %e, patch = %raw, "sim: patch rejected");
                let reply = serde_json::json!({ "error": e.to_string() }).to_string();
                if let Err(e) = bus.try_send(SIM_PEER, &reply) {
                    tracing::debug!(error = %e, "sim: error reply dropped");
                }
            }
        }
    }
}

/// Merge one patch into the simulator. Returns the keys applied, sorted.
/// Nothing is applied when any key is unknown or mistyped. Only the keys
/// named in the patch change; the merge runs under the simulator's lock.
pub fn apply_patch(sim: &SimulatedController, raw: &str) -> anyhow::Result<Vec<String>> {
    let patch: Map<String, Value> =
        serde_json::from_str(raw).context("patch must be a JSON object")?;

    let mut keys: Vec<String> = patch.keys().cloned().collect();
    sim.try_update(|inputs| merge(inputs, patch))?;

    keys.sort();
    Ok(keys)
}

fn merge(inputs: &mut SimInputs, patch: Map<String, Value>) -> anyhow::Result<()> {
    let mut sensors = to_map(&inputs.sample.sensors)?;
    let mut counters = to_map(&inputs.sample.counters)?;
    let mut jammed = inputs.jammed;
    let mut offline = inputs.offline;

    for (key, value) in patch {
        match key.as_str() {
            "jammed" => jammed = as_bool(&key, &value)?,
            "offline" => offline = as_bool(&key, &value)?,
            k if sensors.contains_key(k) => {
                sensors.insert(key, value);
            }
            k if counters.contains_key(k) => {
                counters.insert(key, value);
            }
            _ => bail!("unknown key {key:?}"),
        }
    }

    inputs.sample.sensors = serde_json::from_value::<SensorSnapshot>(Value::Object(sensors))
        .context("invalid sensor value")?;
    inputs.sample.counters = serde_json::from_value::<Counters>(Value::Object(counters))
        .context("invalid counter value")?;
    inputs.jammed = jammed;
    inputs.offline = offline;
    Ok(())
}

fn to_map<T: serde::Serialize>(value: &T) -> anyhow::Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => bail!("expected an object, got {other}"),
    }
}

fn as_bool(key: &str, value: &Value) -> anyhow::Result<bool> {
    value
        .as_bool()
        .with_context(|| format!("{key} must be a boolean"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use rvm_core::{ActuatorCommand, FieldController};

    #[test]
    fn sensor_and_counter_keys_merge() {
        let sim = SimulatedController::new();
        let keys = apply_patch(
            &sim,
            r#"{"curtain":true,"bottle_present":true,"can_count":12}"#,
        )
        .unwrap();
        assert_eq!(keys, ["bottle_present", "can_count", "curtain"]);

        let s = sim.sample().unwrap();
        assert!(s.sensors.curtain);
        assert!(s.sensors.bottle_present);
        // Untouched flags keep their value.
        assert!(s.sensors.center_limit);
        assert_eq!(s.counters.can_count, 12);
    }

    #[test]
    fn unknown_key_applies_nothing() {
        let sim = SimulatedController::new();
        let err = apply_patch(&sim, r#"{"curtain":true,"laser":true}"#).unwrap_err();
        assert!(err.to_string().contains("laser"));
        assert!(!sim.sample().unwrap().sensors.curtain);
    }

    #[test]
    fn mistyped_value_rejected() {
        let sim = SimulatedController::new();
        assert!(apply_patch(&sim, r#"{"curtain":"yes"}"#).is_err());
        assert!(apply_patch(&sim, r#"{"jammed":1}"#).is_err());
        assert!(apply_patch(&sim, "curtain").is_err());
        assert!(apply_patch(&sim, "[1,2]").is_err());
    }

    #[test]
    fn fault_modes_toggle() {
        let sim = SimulatedController::new().with_travel_samples(1);
        apply_patch(&sim, r#"{"jammed":true}"#).unwrap();
        sim.apply(ActuatorCommand::ForceMoveCarriageLeft).unwrap();
        assert!(!sim.sample().unwrap().sensors.left_limit);

        apply_patch(&sim, r#"{"offline":true}"#).unwrap();
        assert!(sim.sample().is_err());
        apply_patch(&sim, r#"{"offline":false}"#).unwrap();
        assert!(sim.sample().is_ok());
    }

    #[test]
    fn patch_keeps_limit_raised_by_sample() {
        let sim = SimulatedController::new().with_travel_samples(1);
        sim.apply(ActuatorCommand::ForceMoveCarriageLeft).unwrap();
        assert!(sim.sample().unwrap().sensors.left_limit);

        apply_patch(&sim, r#"{"curtain":true}"#).unwrap();
        let s = sim.sample().unwrap();
        assert!(s.sensors.curtain);
        assert!(s.sensors.left_limit);
        assert_eq!(s.counters.bottle_count, 1);
    }

    #[test]
    fn patches_racing_the_poller_never_lower_the_limit() {
        for _ in 0..20 {
            let sim = SimulatedController::new().with_travel_samples(50);
            sim.apply(ActuatorCommand::ForceMoveCarriageLeft).unwrap();
            let done = AtomicBool::new(false);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let mut raised = false;
                    for _ in 0..500 {
                        let s = sim.sample().unwrap();
                        if raised {
                            assert!(s.sensors.left_limit, "limit dropped after arrival");
                        }
                        raised |= s.sensors.left_limit;
                    }
                    assert!(raised);
                    done.store(true, Ordering::Release);
                });
                let mut curtain = false;
                while !done.load(Ordering::Acquire) {
                    curtain = !curtain;
                    apply_patch(&sim, &format!(r#"{{"curtain":{curtain}}}"#)).unwrap();
                }
            });
        }
    }
}
