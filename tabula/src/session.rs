//! Database session
//!
//! A [`Session`] is the handle every repository and migration step works
//! through. It owns an `Arc<dyn Backend>`, so cloning it is cheap and all
//! clones share one connection pool. Query and ledger operations take a
//! [`Context`] and are abandoned when it is cancelled; schema operations are
//! only ever called from inside a migration step, which already runs under
//! the migrator's context.

use std::fmt;
use std::sync::Arc;

use crate::config::{DatabaseConfig, Dbms};
use crate::context::Context;
use crate::entity::{Column, Record, Table};
use crate::executor::{
    Backend, ExecutorOperation, ExecutorResult, LedgerEntry, MemoryBackend,
};
use crate::migration::{Direction, Migration};
use crate::predicate::Predicate;

/// Shared handle to a backend
#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn Backend>,
    debug: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.name())
            .field("debug", &self.debug)
            .finish()
    }
}

impl Session {
    /// Wrap a backend
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Wrap an already shared backend
    pub fn from_arc(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            debug: false,
        }
    }

    /// A session over a fresh [`MemoryBackend`]
    pub fn memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Build the backend named by `config.dbms`
    pub async fn connect(config: &DatabaseConfig) -> ExecutorResult<Self> {
        tracing::info!(dbms = %config.dbms, "Opening database session");
        let session = match config.dbms {
            Dbms::Memory => Self::memory(),
            #[cfg(feature = "sqlite")]
            Dbms::Sqlite => Self::new(crate::executor::SqliteBackend::connect(config).await?),
            #[cfg(not(feature = "sqlite"))]
            Dbms::Sqlite => {
                return Err(crate::executor::ExecutorError::unsupported(
                    ExecutorOperation::Connect,
                    "built without the `sqlite` feature",
                ))
            }
        };
        Ok(session.with_debug(config.debug))
    }

    /// Log every operation at debug level
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Short backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn trace(&self, operation: ExecutorOperation, object: &str, filter: Option<&Predicate>) {
        if self.debug {
            match filter {
                Some(filter) => tracing::debug!(
                    backend = self.backend.name(),
                    %operation,
                    object,
                    %filter,
                    "session call"
                ),
                None => tracing::debug!(
                    backend = self.backend.name(),
                    %operation,
                    object,
                    "session call"
                ),
            }
        }
    }

    /// Insert one row
    pub async fn insert(&self, ctx: &Context, table: &Table, record: &Record) -> ExecutorResult<()> {
        let op = ExecutorOperation::Insert;
        self.trace(op, table.name, None);
        ctx.run(op, self.backend.insert(table, record)).await
    }

    /// Every row of a table
    pub async fn select_all(&self, ctx: &Context, table: &Table) -> ExecutorResult<Vec<Record>> {
        let op = ExecutorOperation::Select;
        self.trace(op, table.name, None);
        ctx.run(op, self.backend.select_all(table)).await
    }

    /// Rows matching a filter
    pub async fn select_where(
        &self,
        ctx: &Context,
        table: &Table,
        filter: &Predicate,
    ) -> ExecutorResult<Vec<Record>> {
        let op = ExecutorOperation::Select;
        self.trace(op, table.name, Some(filter));
        ctx.run(op, self.backend.select_where(table, filter)).await
    }

    /// At most `limit` rows matching a filter
    pub async fn select_limit(
        &self,
        ctx: &Context,
        table: &Table,
        filter: &Predicate,
        limit: usize,
    ) -> ExecutorResult<Vec<Record>> {
        let op = ExecutorOperation::Select;
        self.trace(op, table.name, Some(filter));
        ctx.run(op, self.backend.select_limit(table, filter, limit))
            .await
    }

    /// Update matching rows; returns the affected count
    pub async fn update_where(
        &self,
        ctx: &Context,
        table: &Table,
        record: &Record,
        filter: &Predicate,
    ) -> ExecutorResult<u64> {
        let op = ExecutorOperation::Update;
        self.trace(op, table.name, Some(filter));
        ctx.run(op, self.backend.update_where(table, record, filter))
            .await
    }

    /// Delete matching rows; returns the affected count
    pub async fn delete_where(
        &self,
        ctx: &Context,
        table: &Table,
        filter: &Predicate,
    ) -> ExecutorResult<u64> {
        let op = ExecutorOperation::Delete;
        self.trace(op, table.name, Some(filter));
        ctx.run(op, self.backend.delete_where(table, filter)).await
    }

    /// Create a table from its descriptor if missing
    pub async fn create_table(&self, table: &Table) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Schema, table.name, None);
        self.backend.create_table(table).await
    }

    /// Drop a table if present
    pub async fn drop_table(&self, table: &str) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Schema, table, None);
        self.backend.drop_table(table).await
    }

    /// Add a column
    pub async fn add_column(&self, table: &str, column: &Column) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Schema, table, None);
        self.backend.add_column(table, column).await
    }

    /// Drop a column
    pub async fn drop_column(&self, table: &str, column: &str) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Schema, table, None);
        self.backend.drop_column(table, column).await
    }

    /// Run a raw statement script
    pub async fn execute_script(&self, script: &str) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Script, "script", None);
        self.backend.execute_script(script).await
    }

    /// Create the migration ledger if missing
    pub async fn init_ledger(&self, ctx: &Context) -> ExecutorResult<()> {
        ctx.run(ExecutorOperation::Ledger, self.backend.init_ledger())
            .await
    }

    /// Applied migrations, in no particular order
    pub async fn applied_migrations(&self, ctx: &Context) -> ExecutorResult<Vec<LedgerEntry>> {
        ctx.run(ExecutorOperation::Ledger, self.backend.applied_migrations())
            .await
    }

    /// Record a migration as applied
    pub async fn record_applied(&self, ctx: &Context, entry: &LedgerEntry) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Ledger, &entry.name, None);
        ctx.run(ExecutorOperation::Ledger, self.backend.record_applied(entry))
            .await
    }

    /// Forget an applied migration
    pub async fn remove_applied(&self, ctx: &Context, name: &str) -> ExecutorResult<()> {
        self.trace(ExecutorOperation::Ledger, name, None);
        ctx.run(ExecutorOperation::Ledger, self.backend.remove_applied(name))
            .await
    }

    /// Run one direction of a migration under `ctx`
    pub async fn run_step(
        &self,
        ctx: &Context,
        migration: &dyn Migration,
        direction: Direction,
    ) -> ExecutorResult<()> {
        ctx.run(ExecutorOperation::Schema, async {
            match direction {
                Direction::Up => migration.up(self).await,
                Direction::Down => migration.down(self).await,
            }
        })
        .await
    }
}
