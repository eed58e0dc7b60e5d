//! Crate-level error aggregation.
//!
//! Subsystems carry their own error enums; this umbrella is what the
//! high-level [`crate::client::Session`] surface returns. Recoverable
//! findings travel through the diagnostic collector, not through these
//! types.

use thiserror::Error;

use crate::device::DeviceError;
use crate::exec::ExecError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum NemError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("validation reported {errors} error(s)")]
    Validation { errors: usize },
    #[error("document is not a program")]
    NotAProgram,
    #[error("program selects unknown device `{name}`")]
    UnknownDevice { name: String },
    #[error("program selects no device; execution needs one")]
    NoDevice,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
