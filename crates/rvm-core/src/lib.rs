//! rvm-core: coordination core of the container-return machine.
//! Sequences detection -> classification rendezvous -> sort action ->
//! acknowledgement against a polled field controller and two peers.
//! No async runtime and no transport here; the bus and runtime crates own I/O.

pub mod command;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod peer;
pub mod sensors;
pub mod types;

pub use command::{Command, parse_command};
pub use controller::{ActuatorCommand, FieldController, SimInputs, SimulatedController};
pub use engine::{DetectionPolicy, Engine, EngineConfig, MAX_TIMEOUT_MS, StatusHandle, StatusView};
pub use error::ControllerError;
pub use event::{EventEmitter, EventEnvelope};
pub use peer::{APP_PEER, PeerLink, VISION_PEER};
pub use sensors::{Counters, Sample, SensorSnapshot, SharedSample};
pub use types::{ContainerKind, MachineState, Material, VisionVerdict};
