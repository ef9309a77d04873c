/// Errors surfaced by backend drivers.
///
/// Cloneable so a single failure can be reported to several waiting callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The connection (or the collection handle derived from it) was closed.
    #[error("connection is closed")]
    Closed,

    /// The backend did not answer a liveness probe.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// An insert collided with an existing `_id`.
    #[error("duplicate key {id:?} in collection {collection:?}")]
    DuplicateKey { collection: String, id: String },

    /// A document lacked a usable `_id` or was otherwise malformed.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A collection name the driver cannot represent.
    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    /// I/O error from a file-backed driver.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A failure injected by a test driver.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Any other driver-specific failure.
    #[error("driver error: {0}")]
    Driver(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
