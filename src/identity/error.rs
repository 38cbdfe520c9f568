//! Errors raised by the identity layer.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Remote mapping dataset could not be fetched or parsed.
    #[error("remote mappings unavailable from {url}: {message}")]
    Remote { url: String, message: String },

    /// A persisted table could not be read or written.
    #[error("mapping store error at {path:?}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IdentityError {
    pub fn remote(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Remote {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Store {
            path: path.into(),
            source,
        }
    }
}
