use vds_backend::BackendError;
use vds_types::{BranchName, ObjectHash, ProjectName, TypeError};

fn or_absent(hash: &Option<ObjectHash>) -> &str {
    hash.as_ref().map_or("<absent>", ObjectHash::as_str)
}

/// Errors from store operations.
///
/// `Clone` because a single coalesced project open reports its outcome to
/// every waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Malformed name, hash, branch, or document. Raised before any I/O.
    #[error("validation failed: {0}")]
    Validation(#[from] TypeError),

    /// A project, object, or hash prefix does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// A hash prefix matched more than one object.
    #[error("hash prefix {prefix} is not unique")]
    Ambiguous { prefix: String },

    /// The branch did not hold the expected prior value.
    #[error("branch {branch} does not point to {}", or_absent(.expected))]
    Conflict {
        branch: BranchName,
        expected: Option<ObjectHash>,
    },

    /// Transport or driver failure.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Durability could not be confirmed on every physical connection.
    #[error("fsync failed on {failed} of {total} connections, first error: {first}")]
    Consistency {
        failed: usize,
        total: usize,
        first: BackendError,
    },

    /// The project has a registered in-memory handle.
    #[error("project {name} is in use")]
    ProjectInUse { name: ProjectName },

    /// Verification mode found that an object's id is not its content hash.
    #[error("object {claimed} hashes to {computed}")]
    HashMismatch {
        claimed: ObjectHash,
        computed: ObjectHash,
    },

    #[error("database is not open")]
    NotOpen,

    #[error("database is already open")]
    AlreadyOpen,

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Result alias for store operations.
pub type StorageResult<T> = Result<T, StorageError>;
