//! Migration error types

use std::path::PathBuf;
use thiserror::Error;

use super::Direction;
use crate::executor::ExecutorError;

/// Result type for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Errors raised while registering or running migrations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Name does not look like `<digits>_<identifier>`
    #[error("Invalid migration name '{name}': expected <digits>_<identifier>, e.g. 20240101120000_create_users")]
    InvalidName {
        /// Offending name
        name: String,
    },

    /// A migration with this name is already registered
    #[error("Migration '{name}' is already registered")]
    DuplicateMigration {
        /// Duplicate name
        name: String,
    },

    /// A step failed; later migrations were left untouched
    #[error("Migration '{name}' failed: {cause}")]
    MigrationFailed {
        /// Failing migration
        name: String,
        /// Backend error raised by the step
        #[source]
        cause: ExecutorError,
    },

    /// The ledger is empty
    #[error("Nothing to roll back: no migrations have been applied")]
    NothingToRollback,

    /// The ledger names a migration that is not registered
    #[error("Applied migration '{name}' is not registered, cannot revert it")]
    UnknownMigration {
        /// Name found in the ledger
        name: String,
    },

    /// The context was cancelled, possibly in the middle of a step
    #[error("Migration run cancelled{}", .name.as_ref().map(|n| format!(" during '{}'", n)).unwrap_or_default())]
    Cancelled {
        /// Migration in flight, if any
        name: Option<String>,
    },

    /// Reading or writing the ledger failed
    #[error("Migration ledger error: {0}")]
    Ledger(#[source] ExecutorError),

    /// A step ran but the ledger write after it failed, so the ledger no
    /// longer reflects the schema for this migration
    #[error("Migration '{name}' ran {direction} but was not recorded in the ledger: {cause}")]
    LedgerWrite {
        /// Migration whose step ran
        name: String,
        /// Which step ran
        direction: Direction,
        /// Backend error raised by the ledger write
        #[source]
        cause: ExecutorError,
    },

    /// Reading migration files failed
    #[error("Failed to read migrations from '{path}': {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl MigrationError {
    /// Wrap a ledger failure, keeping cancellation distinct
    pub(crate) fn ledger(err: ExecutorError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled { name: None }
        } else {
            Self::Ledger(err)
        }
    }

    /// Wrap a failed ledger write that followed a successful step
    pub(crate) fn ledger_write(name: &str, direction: Direction, err: ExecutorError) -> Self {
        Self::LedgerWrite {
            name: name.to_string(),
            direction,
            cause: err,
        }
    }

    /// Wrap a step failure, keeping cancellation distinct
    pub(crate) fn step(name: &str, err: ExecutorError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled {
                name: Some(name.to_string()),
            }
        } else {
            Self::MigrationFailed {
                name: name.to_string(),
                cause: err,
            }
        }
    }

    /// Name of the migration involved, if any
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            Self::InvalidName { name }
            | Self::DuplicateMigration { name }
            | Self::MigrationFailed { name, .. }
            | Self::UnknownMigration { name }
            | Self::LedgerWrite { name, .. } => Some(name),
            Self::Cancelled { name } => name.as_deref(),
            Self::NothingToRollback | Self::Ledger(_) | Self::Io { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorOperation;

    #[test]
    fn test_ledger_write_names_the_migration() {
        let err = MigrationError::ledger_write(
            "001_init",
            Direction::Up,
            ExecutorError::connection_failed("disk full"),
        );
        assert_eq!(err.migration_name(), Some("001_init"));
        let display = err.to_string();
        assert!(display.contains("'001_init' ran up but was not recorded"));
        assert!(display.contains("disk full"));
    }

    #[test]
    fn test_step_error_keeps_cancellation_distinct() {
        let failed = MigrationError::step(
            "001_init",
            ExecutorError::query_failed(ExecutorOperation::Schema, "syntax error"),
        );
        assert!(matches!(failed, MigrationError::MigrationFailed { .. }));
        assert_eq!(failed.migration_name(), Some("001_init"));

        let cancelled = MigrationError::step(
            "001_init",
            ExecutorError::cancelled(ExecutorOperation::Schema, "context cancelled"),
        );
        assert!(matches!(cancelled, MigrationError::Cancelled { name: Some(_) }));
        assert_eq!(cancelled.to_string(), "Migration run cancelled during '001_init'");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            MigrationError::NothingToRollback.to_string(),
            "Nothing to roll back: no migrations have been applied"
        );
        assert_eq!(
            MigrationError::Cancelled { name: None }.to_string(),
            "Migration run cancelled"
        );
    }
}
