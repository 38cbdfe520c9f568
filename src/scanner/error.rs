use thiserror::Error;

/// Errors from starting or running a scan session.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A session is already running or draining.
    #[error("scan engine is busy ({0})")]
    Busy(super::EngineState),

    #[error(transparent)]
    InvalidTemplate(#[from] streamsweep_common::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The probe could not run at all; ends the session.
    #[error("probe for {address} could not run: {source}")]
    Resource {
        address: String,
        #[source]
        source: streamsweep_probe::Error,
    },
}

pub type Result<T> = std::result::Result<T, ScanError>;
