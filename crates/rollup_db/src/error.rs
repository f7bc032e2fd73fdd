//! Error types for the database layer.

use thiserror::Error;

use crate::sql_guard::SqlGuardError;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation (unique, foreign key, etc.)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A transaction line already has a relation row.
    #[error("Transaction line {transaction_line_id} is already claimed by another aggregation")]
    AlreadyClaimed { transaction_line_id: i64 },

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Statement rejected by the read-only guard
    #[error("Rejected query: {0}")]
    ReadOnly(#[from] SqlGuardError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint error.
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Connection-level failures (pool closed, IO, timeouts) as opposed to statement errors.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DbError::Sqlx(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ) | DbError::Io(_)
        )
    }
}

/// Map unique and foreign-key violations to [`DbError::Constraint`].
pub(crate) fn classify(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
            return DbError::Constraint(db_err.message().to_string());
        }
    }
    DbError::Sqlx(err)
}

/// True when a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
