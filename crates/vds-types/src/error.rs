use thiserror::Error;

/// Errors produced by identifier and document validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid project name {name:?}: {reason}")]
    InvalidProjectName { name: String, reason: String },

    #[error("invalid object hash {0:?}")]
    InvalidObjectHash(String),

    #[error("invalid branch name {0:?}")]
    InvalidBranchName(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("unknown database status: {0}")]
    UnknownStatus(String),
}
