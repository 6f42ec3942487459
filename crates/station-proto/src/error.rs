use thiserror::Error;

/// Failure kinds shared by every station component.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("config invariant violated: {0}")]
    ConfigInvariant(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("no device matching {0:?}")]
    NoDevice(String),
}

impl StationError {
    /// Device-level errors that should send the owning worker back to idle.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, StationError::DeviceLost(_))
    }
}
