//! Repository error types
//!
//! Every failure a [`Repository`](super::Repository) call can produce is a
//! [`RepositoryError`] carrying the operation, a category, and the entity
//! type and predicate involved. Backend failures keep the original
//! [`ExecutorError`] as their source.
//!
//! # Example
//!
//! ```rust
//! use tabula::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
//!
//! let error = RepositoryError::not_found(RepositoryOperation::FindOneBy, "Company", "slug = 'acme'");
//! assert_eq!(error.kind, RepositoryErrorKind::NotFound);
//! assert_eq!(error.predicate.as_deref(), Some("slug = 'acme'"));
//! ```

use std::fmt;

use crate::executor::{ExecutorError, ExecutorErrorKind};
use crate::predicate::PredicateError;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Inserting one entity
    Create,
    /// Loading every entity
    FindAll,
    /// Loading the first entity matching a predicate
    FindOneBy,
    /// Updating entities matching a predicate
    UpdateWhere,
    /// Deleting entities matching a predicate
    DeleteWhere,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::FindAll => write!(f, "find_all"),
            Self::FindOneBy => write!(f, "find_one_by"),
            Self::UpdateWhere => write!(f, "update_where"),
            Self::DeleteWhere => write!(f, "delete_where"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Predicate arguments had odd arity, a non-string field, or a bad field name
    MalformedPredicate,
    /// A single-result query matched nothing
    NotFound,
    /// Backend-enforced integrity rule rejected the write
    ConstraintViolation,
    /// Any other backend failure (connectivity, unknown field or table, ...)
    Executor,
    /// The caller's context was cancelled or its deadline passed
    Cancelled,
    /// An entity could not be converted to or from a stored row
    Serialization,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPredicate => write!(f, "malformed_predicate"),
            Self::NotFound => write!(f, "not_found"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::Executor => write!(f, "executor"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Structured repository error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The entity type involved (e.g., "Company")
    pub entity_type: Option<String>,
    /// The predicate involved, rendered for humans
    pub predicate: Option<String>,
    /// The backend error this was raised from
    pub source: Option<ExecutorError>,
}

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            predicate: None,
            source: None,
        }
    }

    /// Create a "not found" error for a predicate that matched no rows
    pub fn not_found(
        operation: RepositoryOperation,
        entity_type: impl Into<String>,
        predicate: impl fmt::Display,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::NotFound, "Entity not found")
            .with_entity_type(entity_type)
            .with_predicate(predicate)
    }

    /// Create a malformed predicate error
    pub fn malformed_predicate(operation: RepositoryOperation, err: PredicateError) -> Self {
        Self::new(
            operation,
            RepositoryErrorKind::MalformedPredicate,
            err.to_string(),
        )
    }

    /// Create a serialization error
    pub fn serialization(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Serialization, message)
    }

    /// Wrap a backend error, classifying it by the backend's kind
    pub fn from_executor(operation: RepositoryOperation, err: ExecutorError) -> Self {
        let kind = match err.kind {
            ExecutorErrorKind::ConstraintViolation => RepositoryErrorKind::ConstraintViolation,
            ExecutorErrorKind::Cancelled => RepositoryErrorKind::Cancelled,
            ExecutorErrorKind::TypeConversion => RepositoryErrorKind::Serialization,
            _ => RepositoryErrorKind::Executor,
        };
        Self {
            operation,
            kind,
            message: err.message.clone(),
            entity_type: None,
            predicate: None,
            source: Some(err),
        }
    }

    /// Add the entity type
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Add the predicate involved
    #[must_use]
    pub fn with_predicate(mut self, predicate: impl fmt::Display) -> Self {
        self.predicate = Some(predicate.to_string());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Kind of the underlying backend error, if there is one
    pub fn executor_kind(&self) -> Option<ExecutorErrorKind> {
        self.source.as_ref().map(|e| e.kind)
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    pub fn is_retriable(&self) -> bool {
        self.source.as_ref().is_some_and(ExecutorError::is_retriable)
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity_type, &self.predicate) {
            (Some(entity_type), Some(predicate)) => write!(f, " [{}: {}]", entity_type, predicate)?,
            (Some(entity_type), None) => write!(f, " [{}]", entity_type)?,
            _ => {}
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
