//! Field controller capability boundary and an in-memory simulation.
//!
//! The register/bit decoding of the real controller lives behind
//! [`FieldController`]; the core only sees whole samples and discrete
//! actuator commands. [`SimulatedController`] stands in for hardware in
//! tests and in the daemon.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::sensors::Sample;

/// Command setters exposed by the field controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorCommand {
    ClearRegisters,
    ForceMoveCarriageLeft,
    ForceMoveCarriageRight,
    ConfirmBottle,
    ConfirmCan,
    CancelBottle,
    CancelCan,
    ResetWeightError,
    ResetWeightReading,
    ResetBottleCounter,
    ResetCanCounter,
}

/// Polled, never pushes. `sample` is called from the polling loop only;
/// `apply` from the tick thread only.
pub trait FieldController: Send + Sync {
    fn sample(&self) -> Result<Sample, ControllerError>;
    fn apply(&self, command: ActuatorCommand) -> Result<(), ControllerError>;
}

impl<T: FieldController + ?Sized> FieldController for &T {
    fn sample(&self) -> Result<Sample, ControllerError> {
        (**self).sample()
    }

    fn apply(&self, command: ActuatorCommand) -> Result<(), ControllerError> {
        (**self).apply(command)
    }
}

impl<T: FieldController + ?Sized> FieldController for Arc<T> {
    fn sample(&self) -> Result<Sample, ControllerError> {
        (**self).sample()
    }

    fn apply(&self, command: ActuatorCommand) -> Result<(), ControllerError> {
        (**self).apply(command)
    }
}

// ─── Simulation ───────────────────────────────────────────────────

/// Samples a carriage move takes to reach its limit switch by default.
const DEFAULT_TRAVEL_SAMPLES: u32 = 3;

/// Containers a bin holds before it reads 100% full.
const BIN_CAPACITY: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carriage {
    Centered,
    Moving { left: bool, remaining: u32 },
    /// Jammed: a move was requested but the limit never trips.
    Stalled,
    AtLimit,
}

#[derive(Debug)]
struct SimState {
    sample: Sample,
    carriage: Carriage,
    travel_samples: u32,
    jammed: bool,
    offline: bool,
    /// `None` unless built [`with_recording`](SimulatedController::with_recording).
    applied: Option<Vec<ActuatorCommand>>,
}

/// The inputs a sensor feed may change in one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimInputs {
    pub sample: Sample,
    pub jammed: bool,
    pub offline: bool,
}

/// In-memory field controller. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    pub fn new() -> Self {
        let mut sample = Sample::default();
        sample.sensors.center_limit = true;
        Self {
            state: Arc::new(Mutex::new(SimState {
                sample,
                carriage: Carriage::Centered,
                travel_samples: DEFAULT_TRAVEL_SAMPLES,
                jammed: false,
                offline: false,
                applied: None,
            })),
        }
    }

    #[must_use]
    pub fn with_travel_samples(self, samples: u32) -> Self {
        self.lock().travel_samples = samples;
        self
    }

    /// Keep a log of applied commands for [`applied`](Self::applied).
    #[must_use]
    pub fn with_recording(self) -> Self {
        self.lock().applied.get_or_insert_with(Vec::new);
        self
    }

    /// Make subsequent carriage moves never reach their limit.
    pub fn set_jammed(&self, jammed: bool) {
        self.lock().jammed = jammed;
    }

    /// Make every call fail with [`ControllerError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Edit the raw sample the next `sample()` call starts from.
    pub fn set(&self, edit: impl FnOnce(&mut Sample)) {
        edit(&mut self.lock().sample);
    }

    /// Edit the inputs under one lock, so a concurrent `sample()` cannot
    /// land between the read and the write. An `Err` leaves them untouched.
    pub fn try_update<E>(
        &self,
        edit: impl FnOnce(&mut SimInputs) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut guard = self.lock();
        let mut inputs = SimInputs {
            sample: guard.sample,
            jammed: guard.jammed,
            offline: guard.offline,
        };
        edit(&mut inputs)?;
        guard.sample = inputs.sample;
        guard.jammed = inputs.jammed;
        guard.offline = inputs.offline;
        Ok(())
    }

    /// Every command applied so far, oldest first. Empty unless recording.
    pub fn applied(&self) -> Vec<ActuatorCommand> {
        self.lock().applied.clone().unwrap_or_default()
    }

    pub fn take_applied(&self) -> Vec<ActuatorCommand> {
        self.lock().applied.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fill_percent(count: u32) -> u8 {
    (count.saturating_mul(100) / BIN_CAPACITY).min(100) as u8
}

impl FieldController for SimulatedController {
    fn sample(&self) -> Result<Sample, ControllerError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.offline {
            return Err(ControllerError::Unavailable("simulated controller offline".into()));
        }

        if let Carriage::Moving { left, remaining } = st.carriage {
            if remaining <= 1 {
                let sensors = &mut st.sample.sensors;
                sensors.center_limit = false;
                let counters = &mut st.sample.counters;
                if left {
                    sensors.left_limit = true;
                    counters.bottle_count = counters.bottle_count.saturating_add(1);
                    counters.bottle_fill_percent = fill_percent(counters.bottle_count);
                } else {
                    sensors.right_limit = true;
                    counters.can_count = counters.can_count.saturating_add(1);
                    counters.can_fill_percent = fill_percent(counters.can_count);
                }
                st.carriage = Carriage::AtLimit;
            } else {
                st.carriage = Carriage::Moving {
                    left,
                    remaining: remaining - 1,
                };
            }
        }

        st.sample.sampled_at = Some(Utc::now());
        Ok(st.sample)
    }

    fn apply(&self, command: ActuatorCommand) -> Result<(), ControllerError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.offline {
            return Err(ControllerError::Unavailable("simulated controller offline".into()));
        }
        if let Some(log) = st.applied.as_mut() {
            log.push(command);
        }

        let travel = st.travel_samples.max(1);
        match command {
            ActuatorCommand::ClearRegisters => {
                let sensors = &mut st.sample.sensors;
                sensors.left_limit = false;
                sensors.right_limit = false;
                sensors.center_limit = true;
                st.carriage = Carriage::Centered;
            }
            ActuatorCommand::ForceMoveCarriageLeft | ActuatorCommand::ForceMoveCarriageRight => {
                let left = command == ActuatorCommand::ForceMoveCarriageLeft;
                st.carriage = if st.jammed {
                    Carriage::Stalled
                } else {
                    Carriage::Moving {
                        left,
                        remaining: travel,
                    }
                };
            }
            ActuatorCommand::ConfirmBottle | ActuatorCommand::CancelBottle => {
                st.sample.sensors.bottle_present = false;
                st.sample.sensors.bottle_weight_ok = false;
            }
            ActuatorCommand::ConfirmCan | ActuatorCommand::CancelCan => {
                st.sample.sensors.can_present = false;
                st.sample.sensors.can_weight_ok = false;
            }
            ActuatorCommand::ResetWeightError => {
                st.sample.sensors.weight_error = false;
            }
            ActuatorCommand::ResetWeightReading => {
                let sensors = &mut st.sample.sensors;
                sensors.weight_too_small = false;
                sensors.bottle_weight_ok = false;
                sensors.can_weight_ok = false;
            }
            ActuatorCommand::ResetBottleCounter => {
                st.sample.counters.bottle_count = 0;
                st.sample.counters.bottle_fill_percent = 0;
            }
            ActuatorCommand::ResetCanCounter => {
                st.sample.counters.can_count = 0;
                st.sample.counters.can_fill_percent = 0;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_centered() {
        let sim = SimulatedController::new();
        let s = sim.sample().expect("sample");
        assert!(s.sensors.center_limit);
        assert!(!s.sensors.left_limit);
        assert!(s.sampled_at.is_some());
    }

    #[test]
    fn left_move_reaches_limit_and_counts() {
        let sim = SimulatedController::new().with_travel_samples(2);
        sim.apply(ActuatorCommand::ForceMoveCarriageLeft).expect("apply");

        assert!(!sim.sample().expect("sample").sensors.left_limit);
        let s = sim.sample().expect("sample");
        assert!(s.sensors.left_limit);
        assert!(!s.sensors.center_limit);
        assert_eq!(s.counters.bottle_count, 1);

        sim.apply(ActuatorCommand::ClearRegisters).expect("apply");
        let s = sim.sample().expect("sample");
        assert!(!s.sensors.left_limit);
        assert!(s.sensors.center_limit);
    }

    #[test]
    fn jammed_carriage_never_arrives() {
        let sim = SimulatedController::new().with_travel_samples(1);
        sim.set_jammed(true);
        sim.apply(ActuatorCommand::ForceMoveCarriageRight).expect("apply");
        for _ in 0..10 {
            assert!(!sim.sample().expect("sample").sensors.right_limit);
        }
    }

    #[test]
    fn counter_reset_zeroes_fill() {
        let sim = SimulatedController::new();
        sim.set(|s| {
            s.counters.can_count = 50;
            s.counters.can_fill_percent = 25;
        });
        sim.apply(ActuatorCommand::ResetCanCounter).expect("apply");
        let s = sim.sample().expect("sample");
        assert_eq!(s.counters.can_count, 0);
        assert_eq!(s.counters.can_fill_percent, 0);
    }

    #[test]
    fn offline_fails_both_directions() {
        let sim = SimulatedController::new().with_recording();
        sim.set_offline(true);
        assert!(matches!(sim.sample(), Err(ControllerError::Unavailable(_))));
        assert!(sim.apply(ActuatorCommand::ClearRegisters).is_err());
        assert!(sim.applied().is_empty());
    }

    #[test]
    fn blanket_ref_impl() {
        let sim = SimulatedController::new().with_recording();
        let r: &SimulatedController = &sim;
        r.apply(ActuatorCommand::ResetWeightError).expect("apply");
        assert_eq!(sim.take_applied(), vec![ActuatorCommand::ResetWeightError]);
        assert!(sim.applied().is_empty());
    }

    #[test]
    fn records_nothing_by_default() {
        let sim = SimulatedController::new();
        for _ in 0..1000 {
            sim.apply(ActuatorCommand::ClearRegisters).expect("apply");
        }
        assert!(sim.lock().applied.is_none());
        assert!(sim.applied().is_empty());
        assert!(sim.take_applied().is_empty());
    }

    #[test]
    fn failed_update_changes_nothing() {
        let sim = SimulatedController::new();
        let result: Result<(), &str> = sim.try_update(|inputs| {
            inputs.sample.sensors.curtain = true;
            inputs.jammed = true;
            Err("rejected")
        });
        assert_eq!(result, Err("rejected"));
        assert!(!sim.sample().expect("sample").sensors.curtain);
        assert!(!sim.lock().jammed);
    }

    #[test]
    fn update_keeps_limit_raised_by_sample() {
        let sim = SimulatedController::new().with_travel_samples(1);
        sim.apply(ActuatorCommand::ForceMoveCarriageLeft).expect("apply");
        assert!(sim.sample().expect("sample").sensors.left_limit);

        sim.try_update::<()>(|inputs| {
            inputs.sample.sensors.curtain = true;
            Ok(())
        })
        .expect("update");
        let s = sim.sample().expect("sample");
        assert!(s.sensors.curtain);
        assert!(s.sensors.left_limit);
    }
}
