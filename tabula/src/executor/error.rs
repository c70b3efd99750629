//! Backend error types
//!
//! Every failure coming out of a [`Backend`](super::Backend) is an
//! [`ExecutorError`]: the operation that was running, a coarse kind the core
//! can branch on, and a message from the driver.

use std::fmt;

/// Backend operation being performed when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorOperation {
    /// Establishing a connection or pool
    Connect,
    /// Inserting a row
    Insert,
    /// Selecting rows
    Select,
    /// Updating rows
    Update,
    /// Deleting rows
    Delete,
    /// Schema changes (create/drop table, add/drop column)
    Schema,
    /// Raw statement scripts
    Script,
    /// Reading or writing the applied-migration ledger
    Ledger,
}

impl fmt::Display for ExecutorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Insert => write!(f, "insert"),
            Self::Select => write!(f, "select"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Schema => write!(f, "schema"),
            Self::Script => write!(f, "script"),
            Self::Ledger => write!(f, "ledger"),
        }
    }
}

/// Category of backend error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorErrorKind {
    /// Failed to reach the backend (I/O, pool closed, pool timeout)
    ConnectionFailed,
    /// Unique, foreign key, not-null or check constraint rejected the write
    ConstraintViolation,
    /// A field name is not a column of the target table
    UnknownField,
    /// The target table does not exist
    UnknownTable,
    /// Statement execution failed for another reason
    QueryFailed,
    /// A stored value could not be converted to or from the entity shape
    TypeConversion,
    /// The backend gave up waiting
    Timeout,
    /// The caller's context was cancelled or its deadline passed
    Cancelled,
    /// The backend does not implement the requested capability
    Unsupported,
    /// Other/unknown error
    Other,
}

impl fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::UnknownField => write!(f, "unknown_field"),
            Self::UnknownTable => write!(f, "unknown_table"),
            Self::QueryFailed => write!(f, "query_failed"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured backend error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorError {
    /// The operation being performed when the error occurred
    pub operation: ExecutorOperation,
    /// The category of error
    pub kind: ExecutorErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Additional context (e.g., table name, column)
    pub context: Option<String>,
}

/// Result type for backend operations
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

impl ExecutorError {
    /// Create a new executor error
    pub fn new(
        operation: ExecutorOperation,
        kind: ExecutorErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            ExecutorOperation::Connect,
            ExecutorErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Create a constraint violation error
    pub fn constraint_violation(operation: ExecutorOperation, message: impl Into<String>) -> Self {
        Self::new(operation, ExecutorErrorKind::ConstraintViolation, message)
    }

    /// Create an "unknown field" error for `table.field`
    pub fn unknown_field(operation: ExecutorOperation, table: &str, field: &str) -> Self {
        Self::new(
            operation,
            ExecutorErrorKind::UnknownField,
            format!("unknown field '{}'", field),
        )
        .with_context(table)
    }

    /// Create an "unknown table" error
    pub fn unknown_table(operation: ExecutorOperation, table: &str) -> Self {
        Self::new(
            operation,
            ExecutorErrorKind::UnknownTable,
            format!("no such table '{}'", table),
        )
    }

    /// Create a query failed error
    pub fn query_failed(operation: ExecutorOperation, message: impl Into<String>) -> Self {
        Self::new(operation, ExecutorErrorKind::QueryFailed, message)
    }

    /// Create a type conversion error
    pub fn type_conversion(operation: ExecutorOperation, message: impl Into<String>) -> Self {
        Self::new(operation, ExecutorErrorKind::TypeConversion, message)
    }

    /// Create a cancellation error
    pub fn cancelled(operation: ExecutorOperation, message: impl Into<String>) -> Self {
        Self::new(operation, ExecutorErrorKind::Cancelled, message)
    }

    /// Create an unsupported capability error
    pub fn unsupported(operation: ExecutorOperation, message: impl Into<String>) -> Self {
        Self::new(operation, ExecutorErrorKind::Unsupported, message)
    }

    /// Add context to an existing error
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: ExecutorOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Whether the error came from the caller's context rather than the backend
    pub fn is_cancelled(&self) -> bool {
        self.kind == ExecutorErrorKind::Cancelled
    }

    /// Check if this error is transient. The core never retries; this is
    /// information for callers that own a retry policy.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            ExecutorErrorKind::ConnectionFailed | ExecutorErrorKind::Timeout
        )
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Executor {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let Some(ref ctx) = self.context {
            write!(f, " [context: {}]", ctx)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutorError {}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for ExecutorError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;
        use sqlx::Error as E;
        match err {
            E::RowNotFound => Self::query_failed(ExecutorOperation::Select, "Row not found"),
            E::PoolTimedOut => Self::new(
                ExecutorOperation::Connect,
                ExecutorErrorKind::Timeout,
                "Connection pool timed out",
            ),
            E::PoolClosed => Self::connection_failed("Connection pool is closed"),
            E::WorkerCrashed => Self::connection_failed("Database worker crashed"),
            E::Io(e) => Self::connection_failed(e.to_string()),
            E::Tls(e) => Self::connection_failed(format!("TLS error: {}", e)),
            E::Configuration(e) => Self::new(
                ExecutorOperation::Connect,
                ExecutorErrorKind::ConnectionFailed,
                format!("Configuration error: {}", e),
            ),
            E::ColumnNotFound(col) => Self::new(
                ExecutorOperation::Select,
                ExecutorErrorKind::UnknownField,
                format!("unknown field '{}'", col),
            ),
            E::ColumnDecode { index, source } => Self::type_conversion(
                ExecutorOperation::Select,
                format!("Failed to decode column {}: {}", index, source),
            ),
            E::Decode(e) => Self::type_conversion(ExecutorOperation::Select, e.to_string()),
            E::Database(db_err) => {
                let message = db_err.message().to_string();
                let kind = match db_err.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => ExecutorErrorKind::ConstraintViolation,
                    _ if message.contains("no such column") => ExecutorErrorKind::UnknownField,
                    _ if message.contains("has no column named") => {
                        ExecutorErrorKind::UnknownField
                    }
                    _ if message.contains("no such table") => ExecutorErrorKind::UnknownTable,
                    _ => ExecutorErrorKind::QueryFailed,
                };
                Self::new(ExecutorOperation::Select, kind, message)
            }
            other => Self::new(
                ExecutorOperation::Select,
                ExecutorErrorKind::Other,
                other.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_operation_display() {
        assert_eq!(format!("{}", ExecutorOperation::Insert), "insert");
        assert_eq!(format!("{}", ExecutorOperation::Select), "select");
        assert_eq!(format!("{}", ExecutorOperation::Ledger), "ledger");
    }

    #[test]
    fn test_unknown_field_carries_table() {
        let error = ExecutorError::unknown_field(ExecutorOperation::Select, "users", "nope");
        assert_eq!(error.kind, ExecutorErrorKind::UnknownField);
        assert_eq!(error.context.as_deref(), Some("users"));
        let display = error.to_string();
        assert!(display.contains("unknown_field"));
        assert!(display.contains("'nope'"));
        assert!(display.contains("[context: users]"));
    }

    #[test]
    fn test_with_operation() {
        let error = ExecutorError::connection_failed("refused").with_operation(ExecutorOperation::Insert);
        assert_eq!(error.operation, ExecutorOperation::Insert);
        assert_eq!(error.kind, ExecutorErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_retriable_and_cancelled() {
        assert!(ExecutorError::connection_failed("reset").is_retriable());
        assert!(!ExecutorError::constraint_violation(ExecutorOperation::Insert, "dup").is_retriable());

        let cancelled = ExecutorError::cancelled(ExecutorOperation::Update, "context cancelled");
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_retriable());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_from_sqlx_pool_closed() {
        let error = ExecutorError::from(sqlx::Error::PoolClosed);
        assert_eq!(error.kind, ExecutorErrorKind::ConnectionFailed);
    }
}
