//! Crate-level error type
//!
//! Each subsystem has its own structured error ([`ExecutorError`],
//! [`RepositoryError`], [`MigrationError`], [`PredicateError`]); [`Error`]
//! unifies them for callers that only need one `?`-able type.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::migration::MigrationError;
use crate::predicate::PredicateError;
use crate::repository::RepositoryError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Backend error
    #[error("{0}")]
    Executor(#[from] ExecutorError),

    /// Repository error
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Migration error
    #[error("{0}")]
    Migration(#[from] MigrationError),

    /// Predicate could not be built
    #[error("Malformed predicate: {0}")]
    Predicate(#[from] PredicateError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual From implementation for the boxed variant
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorOperation;
    use crate::repository::{RepositoryErrorKind, RepositoryOperation};

    fn fails_with_repository_error() -> Result<()> {
        Err(RepositoryError::new(
            RepositoryOperation::FindAll,
            RepositoryErrorKind::Executor,
            "no such table",
        ))?;
        Ok(())
    }

    #[test]
    fn test_question_mark_conversions() {
        assert!(matches!(
            fails_with_repository_error(),
            Err(Error::Repository(_))
        ));

        let err: Error = ExecutorError::connection_failed("refused").into();
        assert!(err.to_string().contains("refused"));

        let err: Error = MigrationError::NothingToRollback.into();
        assert!(matches!(err, Error::Migration(_)));

        let err: Error = PredicateError::OddArity { len: 1 }.into();
        assert!(err.to_string().starts_with("Malformed predicate"));
    }

    #[test]
    fn test_executor_display_passes_through() {
        let source = ExecutorError::unknown_table(ExecutorOperation::Select, "users");
        let expected = source.to_string();
        assert_eq!(Error::from(source).to_string(), expected);
    }
}
