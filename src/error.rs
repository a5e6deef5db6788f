// src/error.rs - Error taxonomy shared by every module

use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid, malformed or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing or writing JSON documents
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while writing the CSV export
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A single connection attempt failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every connection attempt of a bounded retry run failed
    #[error("Connection exhausted after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },

    /// A single read or subscribe failed; the sensor is skipped for this cycle
    #[error("Protocol error on {address}: {reason}")]
    Protocol { address: String, reason: String },

    /// The server is reachable but refuses access to the node
    #[error("Access denied to {0}")]
    AccessDenied(String),

    /// History write or dashboard notification failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Acknowledge requested for an index outside the history
    #[error("Alarm {0} not found")]
    AlarmNotFound(usize),

    /// Acknowledge requested for an alarm that is already acknowledged
    #[error("Alarm {0} already acknowledged")]
    AlreadyAcknowledged(usize),

    /// The driver does not implement the requested server operation
    #[error("{0} not supported")]
    Unsupported(String),

    /// Operation refused while an ingestion session is running
    #[error("A monitoring session is already running")]
    SessionActive,

    /// The monitor task is gone
    #[error("Monitor channel closed")]
    ChannelClosed,
}

impl MonitorError {
    /// Shorthand for a transient protocol failure on `address`.
    pub fn protocol(address: impl Into<String>, reason: impl ToString) -> Self {
        MonitorError::Protocol {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenient alias over [`Result`] using [`MonitorError`]
pub type Result<T> = std::result::Result<T, MonitorError>;
