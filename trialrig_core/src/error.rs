use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RigError {
    /// Operator asked for something the current state does not allow.
    #[error("not allowed now: {0}")]
    Conflict(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("file is locked or not writable: {0}")]
    StorageLocked(String),
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error("cancelled by operator")]
    Cancelled,
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("invalid argument for {0}: {1}")]
    InvalidArgument(&'static str, String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Typed view of a report, if it carries a `RigError`.
pub fn rig_error(report: &Report) -> Option<&RigError> {
    report.downcast_ref::<RigError>()
}

pub(crate) fn conflict(msg: impl Into<String>) -> Report {
    Report::new(RigError::Conflict(msg.into()))
}
