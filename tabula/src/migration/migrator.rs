//! Applies and reverts a [`MigrationSet`] against a session

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Direction, MigrationError, MigrationResult, MigrationSet};
use crate::context::Context;
use crate::executor::LedgerEntry;
use crate::hooks::{Clock, SystemClock};
use crate::session::Session;

/// Where a migration stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Registered, not in the ledger
    Pending,
    /// Registered and in the ledger
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
    /// In the ledger but not registered
    Unregistered {
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Applied { applied_at } => write!(f, "applied {}", applied_at.to_rfc3339()),
            Self::Unregistered { applied_at } => {
                write!(f, "applied {} (not registered)", applied_at.to_rfc3339())
            }
        }
    }
}

/// One line of [`Migrator::status`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationState {
    /// Migration name
    pub name: String,
    /// Its status
    pub status: MigrationStatus,
}

/// Runs a migration set against a session.
///
/// Migrations are applied one by one in name order. Each one is recorded in
/// the ledger only after its up step succeeds, and the run stops at the first
/// failure; nothing spans more than one migration transactionally. Running two
/// migrators against the same database at once is not supported.
pub struct Migrator<'a> {
    session: &'a Session,
    migrations: &'a MigrationSet,
    clock: Arc<dyn Clock>,
}

impl<'a> Migrator<'a> {
    /// A migrator stamping the ledger with the system clock
    pub fn new(session: &'a Session, migrations: &'a MigrationSet) -> Self {
        Self {
            session,
            migrations,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the ledger clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the ledger if it does not exist
    pub async fn init(&self, ctx: &Context) -> MigrationResult<()> {
        self.session
            .init_ledger(ctx)
            .await
            .map_err(MigrationError::ledger)
    }

    async fn ledger(&self, ctx: &Context) -> MigrationResult<Vec<LedgerEntry>> {
        self.init(ctx).await?;
        self.session
            .applied_migrations(ctx)
            .await
            .map_err(MigrationError::ledger)
    }

    /// Apply every pending migration in order; returns the names applied
    pub async fn apply_all(&self, ctx: &Context) -> MigrationResult<Vec<String>> {
        let applied: HashMap<String, DateTime<Utc>> = self
            .ledger(ctx)
            .await?
            .into_iter()
            .map(|entry| (entry.name, entry.applied_at))
            .collect();

        let mut newly_applied = Vec::new();
        for (name, migration) in self.migrations.iter() {
            if applied.contains_key(name) {
                continue;
            }

            tracing::info!(migration = name, "Applying migration");
            if let Err(e) = self
                .session
                .run_step(ctx, migration, Direction::Up)
                .await
            {
                tracing::error!(migration = name, error = %e, "Migration failed");
                return Err(MigrationError::step(name, e));
            }

            let entry = LedgerEntry {
                name: name.to_string(),
                applied_at: self.clock.now(),
            };
            if let Err(e) = self.session.record_applied(ctx, &entry).await {
                tracing::error!(
                    migration = name,
                    error = %e,
                    "Migration applied but not recorded in the ledger"
                );
                return Err(MigrationError::ledger_write(name, Direction::Up, e));
            }
            newly_applied.push(entry.name);
        }

        if newly_applied.is_empty() {
            tracing::info!("No pending migrations");
        } else {
            tracing::info!(count = newly_applied.len(), "Migrations applied successfully");
        }
        Ok(newly_applied)
    }

    /// Revert the most recently applied migration; returns its name.
    ///
    /// "Most recent" is the latest `applied_at`, ties going to the greater
    /// name.
    pub async fn rollback_last(&self, ctx: &Context) -> MigrationResult<String> {
        let ledger = self.ledger(ctx).await?;
        let last = ledger
            .into_iter()
            .max_by(|a, b| (a.applied_at, &a.name).cmp(&(b.applied_at, &b.name)))
            .ok_or(MigrationError::NothingToRollback)?;

        let migration = self
            .migrations
            .get(&last.name)
            .ok_or_else(|| MigrationError::UnknownMigration {
                name: last.name.clone(),
            })?;

        tracing::info!(migration = %last.name, "Reverting migration");
        if let Err(e) = self
            .session
            .run_step(ctx, migration, Direction::Down)
            .await
        {
            tracing::error!(migration = %last.name, error = %e, "Rollback failed");
            return Err(MigrationError::step(&last.name, e));
        }

        if let Err(e) = self.session.remove_applied(ctx, &last.name).await {
            tracing::error!(
                migration = %last.name,
                error = %e,
                "Migration reverted but still recorded in the ledger"
            );
            return Err(MigrationError::ledger_write(&last.name, Direction::Down, e));
        }

        tracing::info!(migration = %last.name, "Migration rolled back successfully");
        Ok(last.name)
    }

    /// Revert everything, newest first; returns the names reverted in order.
    ///
    /// Stops at the first failure, leaving the remaining migrations applied.
    pub async fn reset_all(&self, ctx: &Context) -> MigrationResult<Vec<String>> {
        let mut reverted = Vec::new();
        loop {
            match self.rollback_last(ctx).await {
                Ok(name) => reverted.push(name),
                Err(MigrationError::NothingToRollback) => break,
                Err(e) => {
                    tracing::error!(
                        reverted = reverted.len(),
                        error = %e,
                        "Reset stopped before completion"
                    );
                    return Err(e);
                }
            }
        }
        tracing::info!(count = reverted.len(), "Migrations reset successfully");
        Ok(reverted)
    }

    /// Every registered migration with its status, in apply order, followed
    /// by ledger entries that are not registered
    pub async fn status(&self, ctx: &Context) -> MigrationResult<Vec<MigrationState>> {
        let mut applied: HashMap<String, DateTime<Utc>> = self
            .ledger(ctx)
            .await?
            .into_iter()
            .map(|entry| (entry.name, entry.applied_at))
            .collect();

        let mut states: Vec<MigrationState> = self
            .migrations
            .names()
            .map(|name| MigrationState {
                name: name.to_string(),
                status: match applied.remove(name) {
                    Some(applied_at) => MigrationStatus::Applied { applied_at },
                    None => MigrationStatus::Pending,
                },
            })
            .collect();

        let mut orphans: Vec<MigrationState> = applied
            .into_iter()
            .map(|(name, applied_at)| MigrationState {
                name,
                status: MigrationStatus::Unregistered { applied_at },
            })
            .collect();
        orphans.sort_by(|a, b| a.name.cmp(&b.name));
        states.extend(orphans);

        Ok(states)
    }

    /// Names of registered migrations not yet applied, in apply order
    pub async fn pending(&self, ctx: &Context) -> MigrationResult<Vec<String>> {
        Ok(self
            .status(ctx)
            .await?
            .into_iter()
            .filter(|state| state.status == MigrationStatus::Pending)
            .map(|state| state.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Column, ColumnKind, Record, Table};
    use crate::executor::{
        Backend, ExecutorError, ExecutorOperation, ExecutorResult, LedgerStore, MemoryBackend,
        QueryExecutor, SchemaExecutor,
    };
    use crate::hooks::FixedClock;
    use crate::predicate::Predicate;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const USERS: Table = Table::new(
        "users",
        &[
            Column::key("id", ColumnKind::Integer),
            Column::new("name", ColumnKind::Text),
        ],
    );

    const EMAIL: Column = Column::new("email", ColumnKind::Text).nullable();

    type Journal = Arc<Mutex<Vec<String>>>;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn sessions() -> Vec<Session> {
        let mut sessions = vec![Session::memory()];
        #[cfg(feature = "sqlite")]
        sessions.push(
            Session::connect(&crate::config::DatabaseConfig::sqlite_memory())
                .await
                .unwrap(),
        );
        sessions
    }

    /// Register a migration that only appends "<direction> <name>" to `journal`
    fn register_journaled(set: &mut MigrationSet, name: &'static str, journal: &Journal) {
        let up_journal = journal.clone();
        let down_journal = journal.clone();
        set.register(
            name,
            move |_session: Session| {
                let journal = up_journal.clone();
                async move {
                    journal.lock().unwrap().push(format!("up {}", name));
                    Ok(())
                }
            },
            move |_session: Session| {
                let journal = down_journal.clone();
                async move {
                    journal.lock().unwrap().push(format!("down {}", name));
                    Ok(())
                }
            },
        )
        .unwrap();
    }

    fn failing(op: ExecutorOperation) -> ExecutorResult<()> {
        Err(ExecutorError::query_failed(op, "boom"))
    }

    fn users_migrations() -> MigrationSet {
        let mut set = MigrationSet::new();
        set.register(
            "002_add_email",
            |s: Session| async move { s.add_column("users", &EMAIL).await },
            |s: Session| async move { s.drop_column("users", "email").await },
        )
        .unwrap()
        .register(
            "001_create_users",
            |s: Session| async move { s.create_table(&USERS).await },
            |s: Session| async move { s.drop_table("users").await },
        )
        .unwrap();
        set
    }

    #[tokio::test]
    async fn test_rollback_order_law() {
        for session in sessions().await {
            let journal = Journal::default();
            let mut set = MigrationSet::new();
            for name in ["001_a", "002_b", "003_c"] {
                register_journaled(&mut set, name, &journal);
            }
            let clock = Arc::new(FixedClock::new(at(1_000)));
            let migrator = Migrator::new(&session, &set).with_clock(clock);
            let ctx = Context::background();

            migrator.apply_all(&ctx).await.unwrap();
            assert_eq!(migrator.rollback_last(&ctx).await.unwrap(), "003_c");
            assert_eq!(migrator.rollback_last(&ctx).await.unwrap(), "002_b");
            assert_eq!(migrator.rollback_last(&ctx).await.unwrap(), "001_a");
            assert!(matches!(
                migrator.rollback_last(&ctx).await,
                Err(MigrationError::NothingToRollback)
            ));

            assert_eq!(
                *journal.lock().unwrap(),
                vec!["up 001_a", "up 002_b", "up 003_c", "down 003_c", "down 002_b", "down 001_a"]
            );
        }
    }

    #[tokio::test]
    async fn test_rollback_prefers_latest_timestamp() {
        let session = Session::memory();
        let journal = Journal::default();
        let mut set = MigrationSet::new();
        for name in ["001_a", "002_b"] {
            register_journaled(&mut set, name, &journal);
        }
        let ctx = Context::background();
        session.init_ledger(&ctx).await.unwrap();
        // 001_a applied after 002_b
        for (name, secs) in [("002_b", 10), ("001_a", 20)] {
            session
                .record_applied(
                    &ctx,
                    &LedgerEntry {
                        name: name.to_string(),
                        applied_at: at(secs),
                    },
                )
                .await
                .unwrap();
        }

        let migrator = Migrator::new(&session, &set);
        assert_eq!(migrator.rollback_last(&ctx).await.unwrap(), "001_a");
    }

    #[tokio::test]
    async fn test_create_users_then_add_email() {
        for session in sessions().await {
            let set = users_migrations();
            let migrator = Migrator::new(&session, &set);
            let ctx = Context::background();

            let applied = migrator.apply_all(&ctx).await.unwrap();
            assert_eq!(applied, vec!["001_create_users", "002_add_email"]);

            assert_eq!(migrator.rollback_last(&ctx).await.unwrap(), "002_add_email");
            let states = migrator.status(&ctx).await.unwrap();
            assert!(matches!(states[0].status, MigrationStatus::Applied { .. }));
            assert_eq!(states[1].status, MigrationStatus::Pending);
            assert_eq!(migrator.pending(&ctx).await.unwrap(), vec!["002_add_email"]);

            // email column is gone, users table is still there
            let err = session.drop_column("users", "email").await.unwrap_err();
            assert_eq!(err.kind, crate::executor::ExecutorErrorKind::UnknownField);
        }
    }

    #[tokio::test]
    async fn test_apply_all_is_idempotent() {
        for session in sessions().await {
            let set = users_migrations();
            let migrator = Migrator::new(&session, &set);
            let ctx = Context::background();

            assert_eq!(migrator.apply_all(&ctx).await.unwrap().len(), 2);
            assert!(migrator.apply_all(&ctx).await.unwrap().is_empty());
            assert!(migrator.pending(&ctx).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_failure_stops_apply() {
        for session in sessions().await {
            let journal = Journal::default();
            let mut set = MigrationSet::new();
            register_journaled(&mut set, "001_a", &journal);
            set.register(
                "002_broken",
                |_s: Session| async move { failing(ExecutorOperation::Schema) },
                |_s: Session| async move { Ok(()) },
            )
            .unwrap();
            register_journaled(&mut set, "003_c", &journal);

            let migrator = Migrator::new(&session, &set);
            let ctx = Context::background();
            let err = migrator.apply_all(&ctx).await.unwrap_err();
            assert!(matches!(
                err,
                MigrationError::MigrationFailed { ref name, .. } if name == "002_broken"
            ));

            assert_eq!(
                migrator.pending(&ctx).await.unwrap(),
                vec!["002_broken", "003_c"]
            );
            assert_eq!(*journal.lock().unwrap(), vec!["up 001_a"]);
        }
    }

    #[tokio::test]
    async fn test_reset_all_stops_at_first_failure() {
        let session = Session::memory();
        let journal = Journal::default();
        let mut set = MigrationSet::new();
        register_journaled(&mut set, "001_a", &journal);
        set.register(
            "002_sticky",
            |_s: Session| async move { Ok(()) },
            |_s: Session| async move { failing(ExecutorOperation::Schema) },
        )
        .unwrap();
        register_journaled(&mut set, "003_c", &journal);

        let clock = Arc::new(FixedClock::new(at(0)));
        let migrator = Migrator::new(&session, &set).with_clock(clock);
        let ctx = Context::background();
        migrator.apply_all(&ctx).await.unwrap();

        let err = migrator.reset_all(&ctx).await.unwrap_err();
        assert_eq!(err.migration_name(), Some("002_sticky"));
        assert_eq!(migrator.pending(&ctx).await.unwrap(), vec!["003_c"]);
    }

    #[tokio::test]
    async fn test_reset_all_reverts_newest_first() {
        for session in sessions().await {
            let journal = Journal::default();
            let mut set = MigrationSet::new();
            for name in ["001_a", "002_b", "003_c"] {
                register_journaled(&mut set, name, &journal);
            }
            let migrator = Migrator::new(&session, &set).with_clock(Arc::new(FixedClock::new(at(5))));
            let ctx = Context::background();

            migrator.apply_all(&ctx).await.unwrap();
            let reverted = migrator.reset_all(&ctx).await.unwrap();
            assert_eq!(reverted, vec!["003_c", "002_b", "001_a"]);
            assert!(migrator.reset_all(&ctx).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_migration_in_ledger() {
        let session = Session::new(MemoryBackend::new());
        let ctx = Context::background();
        session.init_ledger(&ctx).await.unwrap();
        session
            .record_applied(
                &ctx,
                &LedgerEntry {
                    name: "009_gone".to_string(),
                    applied_at: at(1),
                },
            )
            .await
            .unwrap();

        let set = users_migrations();
        let migrator = Migrator::new(&session, &set);
        assert!(matches!(
            migrator.rollback_last(&ctx).await,
            Err(MigrationError::UnknownMigration { ref name }) if name == "009_gone"
        ));

        let states = migrator.status(&ctx).await.unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states[2].name, "009_gone");
        assert!(matches!(states[2].status, MigrationStatus::Unregistered { .. }));
    }

    /// Memory backend whose ledger writes can be made to fail
    struct FlakyLedger {
        inner: MemoryBackend,
        fail_writes: AtomicBool,
    }

    impl FlakyLedger {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn check_write(&self) -> ExecutorResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ExecutorError::connection_failed("disk full"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueryExecutor for FlakyLedger {
        async fn insert(&self, table: &Table, record: &Record) -> ExecutorResult<()> {
            self.inner.insert(table, record).await
        }

        async fn select_all(&self, table: &Table) -> ExecutorResult<Vec<Record>> {
            self.inner.select_all(table).await
        }

        async fn select_where(
            &self,
            table: &Table,
            filter: &Predicate,
        ) -> ExecutorResult<Vec<Record>> {
            self.inner.select_where(table, filter).await
        }

        async fn select_limit(
            &self,
            table: &Table,
            filter: &Predicate,
            limit: usize,
        ) -> ExecutorResult<Vec<Record>> {
            self.inner.select_limit(table, filter, limit).await
        }

        async fn update_where(
            &self,
            table: &Table,
            record: &Record,
            filter: &Predicate,
        ) -> ExecutorResult<u64> {
            self.inner.update_where(table, record, filter).await
        }

        async fn delete_where(&self, table: &Table, filter: &Predicate) -> ExecutorResult<u64> {
            self.inner.delete_where(table, filter).await
        }
    }

    #[async_trait]
    impl SchemaExecutor for FlakyLedger {
        async fn create_table(&self, table: &Table) -> ExecutorResult<()> {
            self.inner.create_table(table).await
        }

        async fn drop_table(&self, table: &str) -> ExecutorResult<()> {
            self.inner.drop_table(table).await
        }

        async fn add_column(&self, table: &str, column: &Column) -> ExecutorResult<()> {
            self.inner.add_column(table, column).await
        }

        async fn drop_column(&self, table: &str, column: &str) -> ExecutorResult<()> {
            self.inner.drop_column(table, column).await
        }

        async fn execute_script(&self, script: &str) -> ExecutorResult<()> {
            self.inner.execute_script(script).await
        }
    }

    #[async_trait]
    impl LedgerStore for FlakyLedger {
        async fn init_ledger(&self) -> ExecutorResult<()> {
            self.inner.init_ledger().await
        }

        async fn applied_migrations(&self) -> ExecutorResult<Vec<LedgerEntry>> {
            self.inner.applied_migrations().await
        }

        async fn record_applied(&self, entry: &LedgerEntry) -> ExecutorResult<()> {
            self.check_write()?;
            self.inner.record_applied(entry).await
        }

        async fn remove_applied(&self, name: &str) -> ExecutorResult<()> {
            self.check_write()?;
            self.inner.remove_applied(name).await
        }
    }

    impl Backend for FlakyLedger {
        fn name(&self) -> &'static str {
            "flaky-ledger"
        }
    }

    #[tokio::test]
    async fn test_unrecorded_step_names_the_migration() {
        let backend = Arc::new(FlakyLedger::new());
        let session = Session::from_arc(backend.clone());
        let journal = Journal::default();
        let mut set = MigrationSet::new();
        register_journaled(&mut set, "001_a", &journal);
        register_journaled(&mut set, "002_b", &journal);
        let migrator = Migrator::new(&session, &set);
        let ctx = Context::background();

        backend.fail_writes.store(true, Ordering::SeqCst);
        let err = migrator.apply_all(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::LedgerWrite { direction: Direction::Up, .. }
        ));
        assert_eq!(err.migration_name(), Some("001_a"));
        // The step ran, nothing after it did
        assert_eq!(*journal.lock().unwrap(), ["up 001_a"]);
        assert_eq!(migrator.pending(&ctx).await.unwrap(), ["001_a", "002_b"]);

        backend.fail_writes.store(false, Ordering::SeqCst);
        migrator.apply_all(&ctx).await.unwrap();

        backend.fail_writes.store(true, Ordering::SeqCst);
        let err = migrator.rollback_last(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::LedgerWrite { direction: Direction::Down, .. }
        ));
        assert_eq!(err.migration_name(), Some("002_b"));
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let session = Session::memory();
        let set = users_migrations();
        let migrator = Migrator::new(&session, &set);
        let ctx = Context::background();
        ctx.cancel();

        assert!(matches!(
            migrator.apply_all(&ctx).await,
            Err(MigrationError::Cancelled { .. })
        ));
    }
}
