use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Requested row, entity or bookkeeping does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// An entity is flagged deleted but no ChangeSet or SoftDeleteRecord points at it.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Model '{0}' is not registered")]
    ModelNotRegistered(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure of the underlying store or its transaction.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl DbError {
    /// True for errors that bookkeeping lookups treat as "nothing there".
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
