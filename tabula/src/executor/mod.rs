//! Backend capabilities the core delegates to
//!
//! The repository and migrator never build statements themselves. They call
//! into a [`Backend`], which is three capabilities:
//!
//! - [`QueryExecutor`]: the five CRUD operations the repository needs
//! - [`SchemaExecutor`]: table/column changes used by migration steps
//! - [`LedgerStore`]: the applied-migration ledger
//!
//! Two backends ship with the crate: [`MemoryBackend`] and, with the `sqlite`
//! feature, [`SqliteBackend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Column, Record, Table};
use crate::predicate::Predicate;

mod error;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{ExecutorError, ExecutorErrorKind, ExecutorOperation, ExecutorResult};
pub use memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// CRUD execution against entity tables.
///
/// Records are keyed by entity field name; implementations map fields to
/// columns through the [`Table`] descriptor and reject names it does not know.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Insert one row
    async fn insert(&self, table: &Table, record: &Record) -> ExecutorResult<()>;

    /// Every row of the table, in backend order
    async fn select_all(&self, table: &Table) -> ExecutorResult<Vec<Record>>;

    /// Rows matching `filter`, in backend order
    async fn select_where(&self, table: &Table, filter: &Predicate)
        -> ExecutorResult<Vec<Record>>;

    /// The first `limit` rows matching `filter`, in backend order
    async fn select_limit(
        &self,
        table: &Table,
        filter: &Predicate,
        limit: usize,
    ) -> ExecutorResult<Vec<Record>>;

    /// Write the fields in `record` to every row matching `filter`; returns affected rows
    async fn update_where(
        &self,
        table: &Table,
        record: &Record,
        filter: &Predicate,
    ) -> ExecutorResult<u64>;

    /// Delete every row matching `filter`; returns affected rows
    async fn delete_where(&self, table: &Table, filter: &Predicate) -> ExecutorResult<u64>;
}

/// Schema changes available to migration steps
#[async_trait]
pub trait SchemaExecutor: Send + Sync {
    /// Create a table if it does not exist
    async fn create_table(&self, table: &Table) -> ExecutorResult<()>;

    /// Drop a table if it exists
    async fn drop_table(&self, table: &str) -> ExecutorResult<()>;

    /// Add a column to an existing table
    async fn add_column(&self, table: &str, column: &Column) -> ExecutorResult<()>;

    /// Remove a column from an existing table
    async fn drop_column(&self, table: &str, column: &str) -> ExecutorResult<()>;

    /// Run a raw statement script (SQL-file migrations)
    async fn execute_script(&self, script: &str) -> ExecutorResult<()>;
}

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Migration name
    pub name: String,
    /// When it was applied
    pub applied_at: DateTime<Utc>,
}

/// Durable record of applied migrations, owned by the backend
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger storage if missing
    async fn init_ledger(&self) -> ExecutorResult<()>;

    /// All applied entries, in no particular order
    async fn applied_migrations(&self) -> ExecutorResult<Vec<LedgerEntry>>;

    /// Record an applied migration
    async fn record_applied(&self, entry: &LedgerEntry) -> ExecutorResult<()>;

    /// Forget an applied migration
    async fn remove_applied(&self, name: &str) -> ExecutorResult<()>;
}

/// Everything a [`Session`](crate::session::Session) needs from a backend
pub trait Backend: QueryExecutor + SchemaExecutor + LedgerStore {
    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
