//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error taxonomy for registry, ingestion, and loop lifecycle failures."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use ems_sim_common::ConfigError;
use thiserror::Error;

/// Recoverable failure while refreshing the sensor list. The cached list is kept.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("sensor registry unreachable: {0}")]
    Unavailable(String),
    #[error("sensor registry request timed out")]
    Timeout,
    #[error("sensor registry responded with status {0}")]
    Status(u16),
    #[error("malformed registry response: {0}")]
    Malformed(String),
    #[error("sensor registry reported failure: {}", .0.as_deref().unwrap_or("no message"))]
    Unsuccessful(Option<String>),
}

impl RegistryError {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RegistryError::Unavailable(_) => "unavailable",
            RegistryError::Timeout => "timeout",
            RegistryError::Status(_) => "status",
            RegistryError::Malformed(_) => "malformed",
            RegistryError::Unsuccessful(_) => "unsuccessful",
        }
    }
}

/// Recoverable per-reading delivery failure. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestionError {
    #[error("ingestion rejected reading with status {status}")]
    Rejected { status: u16 },
    #[error("ingestion endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("ingestion request timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("simulation loop is already running")]
    AlreadyRunning,
    #[error("simulation loop has stopped and cannot be restarted")]
    Stopped,
}

/// Failure while wiring a simulator from configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}
