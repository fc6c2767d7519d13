//! Machine context: the one piece of mutable state the tick thread owns.
//!
//! Deadlines and the detection memo live inside the [`Phase`] variant that
//! needs them, so a waiting state can never exist without its deadline and
//! leaving the state drops both.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::watch::HardwareWatch;
use crate::types::{ContainerKind, MachineState, Material};

// ─── Phase ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WaitingVision {
        /// What the field controller reported (`None` = curtain-only trigger).
        memo: Option<ContainerKind>,
        deadline: DateTime<Utc>,
    },
    Dumping {
        material: Material,
        started_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
    Error,
}

impl Phase {
    pub fn state(&self) -> MachineState {
        match self {
            Self::Idle => MachineState::Idle,
            Self::WaitingVision { .. } => MachineState::WaitingVision,
            Self::Dumping {
                material: Material::Plastic,
                ..
            } => MachineState::DumpingPlastic,
            Self::Dumping {
                material: Material::Aluminium,
                ..
            } => MachineState::DumpingAluminum,
            Self::Error => MachineState::Error,
        }
    }

    /// Active deadline, if the phase has one.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::WaitingVision { deadline, .. } | Self::Dumping { deadline, .. } => {
                Some(*deadline)
            }
            Self::Idle | Self::Error => None,
        }
    }

    /// Detection memo while waiting for the classifier. The outer `Option`
    /// is `None` outside `WaitingVision`.
    pub fn detection_memo(&self) -> Option<Option<ContainerKind>> {
        match self {
            Self::WaitingVision { memo, .. } => Some(*memo),
            _ => None,
        }
    }
}

// ─── Curtain edge memo ────────────────────────────────────────────

/// Tracks the curtain beam for the high->low "just cleared" edge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CurtainMemo {
    previous: bool,
    just_cleared: bool,
}

impl CurtainMemo {
    /// Feed one reading. A high->low transition arms `just_cleared`;
    /// any high reading disarms it.
    pub fn observe(&mut self, level: bool) {
        if level {
            self.just_cleared = false;
        } else if self.previous {
            self.just_cleared = true;
        }
        self.previous = level;
    }

    /// Disarm after a detection consumed the edge.
    pub fn consume(&mut self) {
        self.just_cleared = false;
    }

    pub fn just_cleared(&self) -> bool {
        self.just_cleared
    }
}

// ─── Context ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MachineContext {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
    pub curtain: CurtainMemo,
    /// Set while the presence that started the last cycle is still seen.
    pub presence_latched: bool,
    pub watch: HardwareWatch,
}

impl MachineContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            phase: Phase::Idle,
            entered_at: now,
            curtain: CurtainMemo::default(),
            presence_latched: false,
            watch: HardwareWatch::default(),
        }
    }

    pub fn state(&self) -> MachineState {
        self.phase.state()
    }
}

// ─── Status handle ────────────────────────────────────────────────

/// Consistent (state, since) pair for readers outside the tick thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub state: MachineState,
    pub since: DateTime<Utc>,
}

/// Short-lived exclusion lock around the published status.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<StatusView>>,
}

impl StatusHandle {
    pub(crate) fn new(view: StatusView) -> Self {
        Self {
            inner: Arc::new(Mutex::new(view)),
        }
    }

    pub fn get(&self) -> StatusView {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, view: StatusView) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = view;
    }
}
