//! Reversible schema migrations
//!
//! A [`MigrationSet`] is the ordered collection of named up/down pairs,
//! registered once at start-up. A [`Migrator`] runs that set against a
//! [`Session`](crate::session::Session) and keeps the backend's ledger of
//! applied names in sync.
//!
//! Ordering is by name, lexicographically, regardless of the order in which
//! migrations were registered. Names are `<digits>_<identifier>`, so a
//! timestamp or zero-padded sequence prefix gives the intended order.
//!
//! ```rust,no_run
//! use tabula::context::Context;
//! use tabula::entity::{Column, ColumnKind, Table};
//! use tabula::migration::{MigrationSet, Migrator};
//! use tabula::session::Session;
//!
//! const NOTES: Table = Table::new("notes", &[Column::new("body", ColumnKind::Text)]);
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut migrations = MigrationSet::new();
//! migrations.register(
//!     "001_create_notes",
//!     |s: Session| async move { s.create_table(&NOTES).await },
//!     |s: Session| async move { s.drop_table("notes").await },
//! )?;
//!
//! let session = Session::memory();
//! let applied = Migrator::new(&session, &migrations)
//!     .apply_all(&Context::background())
//!     .await?;
//! assert_eq!(applied, vec!["001_create_notes".to_string()]);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::future::Future;

use crate::executor::ExecutorResult;
use crate::session::Session;

mod error;
mod migrator;
mod sql;
mod store;

pub use error::{MigrationError, MigrationResult};
pub use migrator::{MigrationState, MigrationStatus, Migrator};
pub use sql::{create_sql_files, SqlFileMigration};
pub use store::{validate_name, MigrationSet};

/// Which half of a migration to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply
    Up,
    /// Revert
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// One reversible schema change
#[async_trait]
pub trait Migration: Send + Sync {
    /// Apply the change
    async fn up(&self, session: &Session) -> ExecutorResult<()>;

    /// Revert the change
    async fn down(&self, session: &Session) -> ExecutorResult<()>;
}

/// A migration built from two async closures
pub struct FnMigration<U, D> {
    up: U,
    down: D,
}

impl<U, D> FnMigration<U, D> {
    /// Pair an up and a down closure
    pub fn new(up: U, down: D) -> Self {
        Self { up, down }
    }
}

#[async_trait]
impl<U, UF, D, DF> Migration for FnMigration<U, D>
where
    U: Fn(Session) -> UF + Send + Sync,
    UF: Future<Output = ExecutorResult<()>> + Send,
    D: Fn(Session) -> DF + Send + Sync,
    DF: Future<Output = ExecutorResult<()>> + Send,
{
    async fn up(&self, session: &Session) -> ExecutorResult<()> {
        (self.up)(session.clone()).await
    }

    async fn down(&self, session: &Session) -> ExecutorResult<()> {
        (self.down)(session.clone()).await
    }
}
