//! Common error types used throughout streamsweep.

/// Common error type for streamsweep.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The address template contains a malformed range marker.
    #[error("Invalid address template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new InvalidTemplate error.
    pub fn invalid_template<T: Into<String>, R: Into<String>>(template: T, reason: R) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
