//! Error types for the field controller boundary.

use thiserror::Error;

use crate::controller::ActuatorCommand;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("field controller unavailable: {0}")]
    Unavailable(String),

    #[error("field controller rejected {command:?}: {detail}")]
    Rejected {
        command: ActuatorCommand,
        detail: String,
    },

    #[error("field controller io error: {0}")]
    Io(#[from] std::io::Error),
}
