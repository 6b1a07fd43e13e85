//! Error types for the database layer.

use thiserror::Error;

use crate::pool::PoolError;

/// Errors raised by [`Database`](crate::Database), sessions, and the model
/// registry.
#[derive(Debug, Error)]
pub enum DbError {
    /// A SQL statement failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// No connection could be checked out of the pool.
    #[error("failed to get a pooled connection: {0}")]
    Checkout(#[from] r2d2::Error),

    /// The URL names a dialect other than SQLite.
    #[error("unsupported database dialect: {0}")]
    UnsupportedDialect(String),

    /// A model declaration is inconsistent.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The model was never registered.
    #[error("model not registered: {0}")]
    UnknownModel(String),

    /// A filter or attribute names a column the model does not have.
    #[error("model '{model}' has no column '{column}'")]
    UnknownColumn {
        /// The model being queried.
        model: String,
        /// The offending column name.
        column: String,
    },

    /// A single key value was given for a model whose primary key is not
    /// a single column.
    #[error("model '{0}' does not have a single-column primary key")]
    CompositeKey(String),

    /// The registry lock was poisoned by a panicking thread.
    #[error("model registry lock poisoned")]
    RegistryPoisoned,
}

/// Errors raised while registering a model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The parent model has not been registered yet.
    #[error("model '{model}' extends unregistered model '{parent}'")]
    UnknownParent {
        /// The model being registered.
        model: String,
        /// The missing parent.
        parent: String,
    },

    /// A model with the same name already exists.
    #[error("model '{0}' is already registered")]
    DuplicateModel(String),

    /// A model that owns a table declares no primary key.
    #[error("model '{model}' has no primary key for table '{table}'")]
    MissingPrimaryKey {
        /// The model being registered.
        model: String,
        /// The table it would create.
        table: String,
    },
}

impl DbError {
    /// `true` if the error is a uniqueness or other constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
