//! Object store client errors

use thiserror::Error;

/// Errors returned by object store operations.
///
/// Kubernetes API status codes that drive controller decisions (404, 409)
/// get their own variants; everything else is carried as text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Object already exists (create raced with another writer)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure (stale resourceVersion)
    #[error("conflict: {0}")]
    Conflict(String),

    /// API server rejected the request
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Server-provided message
        message: String,
    },

    /// Request could not be built (e.g. object missing name or namespace)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport or client-side failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for `Conflict`.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists(ae.message.clone())
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(ae.message.clone()),
            kube::Error::Api(ae) => Self::Api {
                code: ae.code,
                message: ae.message.clone(),
            },
            other => Self::Transport(other.to_string()),
        }
    }
}
