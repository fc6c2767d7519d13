//! Sensor snapshot shared between the polling loop (single writer) and the
//! tick thread (reader). Eventually consistent: the tick sees whatever the
//! last completed poll stored.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boolean flags decoded by the field controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Input-throat curtain beam is interrupted.
    pub curtain: bool,
    pub bottle_present: bool,
    pub can_present: bool,
    pub left_limit: bool,
    pub center_limit: bool,
    pub right_limit: bool,
    pub weight_too_small: bool,
    pub bottle_weight_ok: bool,
    pub can_weight_ok: bool,
    pub weight_error: bool,
    pub left_movement_error: bool,
    pub right_movement_error: bool,
}

impl SensorSnapshot {
    /// Something is resting on the receiver scale.
    pub fn receiver_occupied(&self) -> bool {
        self.weight_too_small || self.bottle_weight_ok || self.can_weight_ok
    }

    pub fn any_presence(&self) -> bool {
        self.bottle_present || self.can_present
    }
}

/// Integer registers: collected-container counters and bin fill levels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub bottle_count: u32,
    pub can_count: u32,
    pub bottle_fill_percent: u8,
    pub can_fill_percent: u8,
}

/// One complete poll of the field controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub sensors: SensorSnapshot,
    pub counters: Counters,
    /// `None` until the first poll completes.
    pub sampled_at: Option<DateTime<Utc>>,
}

/// Latest-sample cell. Cloning shares the same cell.
#[derive(Debug, Clone, Default)]
pub struct SharedSample {
    inner: Arc<RwLock<Sample>>,
}

impl SharedSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, sample: Sample) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = sample;
    }

    pub fn load(&self) -> Sample {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an in-place edit. Handy for tests that flip single flags.
    pub fn update(&self, edit: impl FnOnce(&mut Sample)) {
        edit(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
    }
}
