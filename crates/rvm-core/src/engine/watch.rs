//! Edge-triggered hardware-error and receiver-occupancy watch.
//! Runs every tick regardless of machine state and reports changes only.

use crate::sensors::SensorSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareFault {
    WeightError,
    WeightTooSmall,
    LeftMovementError,
    RightMovementError,
}

impl HardwareFault {
    pub const ALL: [Self; 4] = [
        Self::WeightError,
        Self::WeightTooSmall,
        Self::LeftMovementError,
        Self::RightMovementError,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::WeightError => "weight_error",
            Self::WeightTooSmall => "weight_too_small",
            Self::LeftMovementError => "left_movement_error",
            Self::RightMovementError => "right_movement_error",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::WeightError => "weight sensor reported an error",
            Self::WeightTooSmall => "container weight below the accepted minimum",
            Self::LeftMovementError => "carriage failed while moving left",
            Self::RightMovementError => "carriage failed while moving right",
        }
    }

    fn read(self, sensors: &SensorSnapshot) -> bool {
        match self {
            Self::WeightError => sensors.weight_error,
            Self::WeightTooSmall => sensors.weight_too_small,
            Self::LeftMovementError => sensors.left_movement_error,
            Self::RightMovementError => sensors.right_movement_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEdge {
    FaultRaised(HardwareFault),
    FaultCleared(HardwareFault),
    ReceiverOccupied,
    ReceiverEmptied,
}

/// Previous level of every watched flag. All start low.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HardwareWatch {
    faults: [bool; 4],
    occupied: bool,
}

impl HardwareWatch {
    /// Compare against the last observation and return what changed,
    /// faults first, then occupancy.
    pub fn observe(&mut self, sensors: &SensorSnapshot) -> Vec<HardwareEdge> {
        let mut edges = Vec::new();

        for (slot, fault) in self.faults.iter_mut().zip(HardwareFault::ALL) {
            let level = fault.read(sensors);
            if level != *slot {
                edges.push(if level {
                    HardwareEdge::FaultRaised(fault)
                } else {
                    HardwareEdge::FaultCleared(fault)
                });
                *slot = level;
            }
        }

        let occupied = sensors.receiver_occupied();
        if occupied != self.occupied {
            edges.push(if occupied {
                HardwareEdge::ReceiverOccupied
            } else {
                HardwareEdge::ReceiverEmptied
            });
            self.occupied = occupied;
        }

        edges
    }
}
