//! Error types for the alert lifecycle engine.

/// Top-level error type for alert scheduling and persistence.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Alert construction or decoding violated a contract
    /// (offsetless instant, both repeat modes, out-of-range field).
    #[error("invalid alert: {0}")]
    InvalidAlert(String),

    /// A well-formed alert has no next occurrence.
    #[error("no valid expiration: {0}")]
    NoValidExpiration(String),

    /// A lifecycle call referenced an id that is not in the expected set.
    #[error("unknown alert id: {0}")]
    UnknownAlertId(String),

    /// Reading, parsing or writing persisted alert state failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The scheduling adapter could not register a fire.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AlertError>;
