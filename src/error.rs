use thiserror::Error;

/// Flight stack error types
#[derive(Error, Debug)]
pub enum FlightError {
    #[error("Task already running")]
    AlreadyRunning,

    #[error("Task has been shut down")]
    ShutDown,

    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Transient: the device has not produced anything yet this cycle.
    #[error("No data from {0}")]
    NoData(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for flight stack operations
pub type Result<T> = std::result::Result<T, FlightError>;

impl FlightError {
    /// Lock poisoning means a sampler panicked mid-fetch; surface it instead of panicking again.
    pub fn poisoned(what: &str) -> Self {
        FlightError::Internal(format!("Failed to acquire {} lock", what))
    }

    /// True for errors that mean the peer went away rather than something being broken.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FlightError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
