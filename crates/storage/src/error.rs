/// All errors that can be returned by a StatementGateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// A UNIQUE, NOT NULL, CHECK or FOREIGN KEY constraint rejected the
    /// statement. Services translate this into a conflict.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The backend could not acquire its lock within its own busy window.
    #[error("database is locked: {0}")]
    Busy(String),

    /// The statement could not be prepared or its parameters could not be
    /// bound (syntax error, unknown table, parameter count mismatch).
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// A backend-specific storage error (I/O, connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// True for errors caused by a uniqueness or integrity constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StorageError::ConstraintViolation(_))
    }
}
