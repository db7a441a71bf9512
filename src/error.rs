//! Error types for simfs

use thiserror::Error;

use crate::permissions::InvalidPermissions;

/// Result type for Node Store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for filesystem engine operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Storage-level error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Malformed node row: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the database rejected a write because of a unique index.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    /// True when the database gave up because another writer held a lock or
    /// won a serialization race. Running the transaction again may succeed.
    pub fn is_contention(&self) -> bool {
        let StoreError::Sqlx(sqlx::Error::Database(db)) = self else {
            return false;
        };
        db.code().is_some_and(|code| is_contention_code(&code))
    }
}

/// Categorical outcome of a filesystem operation that did not succeed.
///
/// Read paths fold permission failures into `NotFound` (or an empty result)
/// so that inaccessible nodes are indistinguishable from absent ones. Write
/// paths report `Forbidden`.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(StoreError),
}

impl FsError {
    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            FsError::NotFound(_) => 404,
            FsError::BadRequest(_) => 400,
            FsError::Conflict(_) => 409,
            FsError::Forbidden(_) => 403,
            FsError::Store(_) => 500,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FsError::Conflict(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, FsError::Store(err) if err.is_contention())
    }
}

/// SQLite BUSY/LOCKED (any extended code) and PostgreSQL
/// serialization_failure/deadlock_detected.
fn is_contention_code(code: &str) -> bool {
    if matches!(code, "40001" | "40P01") {
        return true;
    }
    code.parse::<i32>()
        .is_ok_and(|sqlite| matches!(sqlite & 0xff, 5 | 6))
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        if err.is_unique_violation() {
            FsError::Conflict("node already exists".to_string())
        } else {
            FsError::Store(err)
        }
    }
}

impl From<sqlx::Error> for FsError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from(err).into()
    }
}

impl From<InvalidPermissions> for FsError {
    fn from(err: InvalidPermissions) -> Self {
        FsError::BadRequest(err.to_string())
    }
}
