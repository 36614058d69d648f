//! Error types for the diffing library.

use thiserror::Error;

/// Main error type for diff operations.
#[derive(Error, Debug)]
pub enum DiffError {
    /// Configuration error (bad URI, missing table, unknown algorithm, conflicting flags)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A declared column does not exist in the resolved table schema
    #[error("Unknown column '{column}' in table {table}")]
    UnknownColumn { table: String, column: String },

    /// Key or compared column types are not structurally compatible across the two sides
    #[error("Type mismatch for column '{column}': {left} <-> {right}")]
    TypeMismatch {
        column: String,
        left: String,
        right: String,
    },

    /// A compared column has a type the dialect cannot render deterministically
    #[error("Unsupported compared column type '{type_name}' for column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    /// Join-diff precondition violated: key columns are not unique
    #[error("Duplicate primary keys in table {0}")]
    DuplicateKey(String),

    /// Join-diff precondition violated: key columns contain NULL
    #[error("NULL values in one or more key columns of table {0}")]
    NullKey(String),

    /// Adapter-level failure that may succeed on retry (timeout, dropped connection)
    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    /// Adapter-level failure that will not succeed on retry
    #[error("Backend error: {0}")]
    Backend(String),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// The run was cancelled (limit reached, stream dropped, or caller signal)
    #[error("Diff cancelled")]
    Cancelled,

    /// IO error (config file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiffError {
    /// Create a transient backend error.
    pub fn transient(message: impl Into<String>) -> Self {
        DiffError::TransientBackend(message.into())
    }

    /// Create a fatal backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        DiffError::Backend(message.into())
    }

    /// Whether a retry of the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DiffError::TransientBackend(_) => true,
            DiffError::Postgres(e) => e.is_closed(),
            DiffError::Mysql(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Process exit code for this error kind.
    ///
    /// 2 for user errors (config/schema), 3 for backend failures.
    /// `Cancelled` is an internal signal and maps to success.
    pub fn exit_code(&self) -> u8 {
        match self {
            DiffError::Config(_)
            | DiffError::UnknownColumn { .. }
            | DiffError::TypeMismatch { .. }
            | DiffError::UnsupportedType { .. }
            | DiffError::Io(_)
            | DiffError::Toml(_) => 2,
            DiffError::DuplicateKey(_)
            | DiffError::NullKey(_)
            | DiffError::TransientBackend(_)
            | DiffError::Backend(_)
            | DiffError::Postgres(_)
            | DiffError::Mysql(_)
            | DiffError::Json(_) => 3,
            DiffError::Cancelled => 0,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(DiffError::Config("bad uri".into()).exit_code(), 2);
        assert_eq!(
            DiffError::UnknownColumn {
                table: "t".into(),
                column: "c".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(DiffError::DuplicateKey("t".into()).exit_code(), 3);
        assert_eq!(DiffError::backend("boom").exit_code(), 3);
        assert_eq!(DiffError::Cancelled.exit_code(), 0);
    }

    #[test]
    fn test_transient_classification() {
        assert!(DiffError::transient("timeout").is_transient());
        assert!(!DiffError::backend("syntax error").is_transient());
    }
}
