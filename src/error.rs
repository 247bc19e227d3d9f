//! Error types for the multi-target router.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The first five variants are the routing and transaction taxonomy; the rest cover
//! pool shutdown, driver, configuration and internal failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Target '{name}' not found. Available targets: [{}]", available.join(", "))]
    TargetNotFound {
        name: String,
        /// Sorted names of every registered target
        available: Vec<String>,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{message}: {failures} failure(s), first cause: {source}")]
    TransactionSystem {
        message: String,
        failures: usize,
        #[source]
        source: Box<DbError>,
    },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Timeout expired on target '{target}': {timeout_ms}ms deadline exceeded")]
    TimeoutExpired { target: String, timeout_ms: u64 },

    #[error("Failed to close {failures} target pool(s), first cause: {source}")]
    PoolClose {
        failures: usize,
        #[source]
        source: Box<DbError>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a target not found error. The known names are sorted for stable messages.
    pub fn target_not_found<I, S>(name: impl Into<String>, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut available: Vec<String> = available.into_iter().map(Into::into).collect();
        available.sort();
        Self::TargetNotFound {
            name: name.into(),
            available,
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Wrap the first of `failures` underlying errors.
    pub fn transaction_system(message: impl Into<String>, failures: usize, first: DbError) -> Self {
        Self::TransactionSystem {
            message: message.into(),
            failures,
            source: Box::new(first),
        }
    }

    /// Wrap the first of `failures` pool shutdown errors.
    pub fn pool_close(failures: usize, first: DbError) -> Self {
        Self::PoolClose {
            failures,
            source: Box::new(first),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create a timeout expired error.
    pub fn timeout_expired(target: impl Into<String>, timeout_ms: u64) -> Self {
        Self::TimeoutExpired {
            target: target.into(),
            timeout_ms,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::TargetNotFound { .. } => Some("Check the target name against the configured targets"),
            Self::TransactionSystem { source, .. } | Self::PoolClose { source, .. } => {
                source.suggestion()
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::TimeoutExpired { .. }
        )
    }

    /// Number of underlying failures this error stands for.
    pub fn failure_count(&self) -> usize {
        match self {
            Self::TransactionSystem { failures, .. } | Self::PoolClose { failures, .. } => *failures,
            _ => 1,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Increase acquire_timeout or max_connections for this target",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Rebuild the target registry")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for router operations.
pub type DbResult<T> = Result<T, DbError>;
