//! # tabula
//!
//! Typed generic repositories and reversible schema migrations over pluggable
//! backends.
//!
//! ## Features
//!
//! - **Generic repository**: one [`Repository<E>`](repository::Repository) for every entity type
//! - **Predicates**: validated, ordered `field = value` conjunctions, always bound, never interpolated
//! - **Timestamp hook**: `created_at` / `updated_at` stamped right before writes
//! - **Migrations**: name-ordered up/down pairs with a backend-owned ledger, from closures or SQL files
//! - **Backends**: SQLite through sqlx (`sqlite` feature, default) and an in-memory store
//! - **Cancellation**: every query and migration step runs under a cancellable [`Context`](context::Context)
//!
//! ## Example
//!
//! ```rust,no_run
//! use tabula::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Company {
//!     id: i64,
//!     slug: String,
//!     #[serde(flatten)]
//!     timestamps: Timestamps,
//! }
//!
//! impl Entity for Company {
//!     const TABLE: Table = Table::new(
//!         "companies",
//!         &[
//!             Column::key("id", ColumnKind::Integer),
//!             Column::new("slug", ColumnKind::Text).unique(),
//!             Column::created_at(),
//!             Column::updated_at(),
//!         ],
//!     );
//!
//!     fn timestamps(&self) -> &Timestamps {
//!         &self.timestamps
//!     }
//!
//!     fn timestamps_mut(&mut self) -> &mut Timestamps {
//!         &mut self.timestamps
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let session = Session::connect(&config.database).await?;
//!     let ctx = Context::background();
//!
//!     let mut migrations = MigrationSet::new();
//!     migrations.register(
//!         "001_create_companies",
//!         |s: Session| async move { s.create_table(&Company::TABLE).await },
//!         |s: Session| async move { s.drop_table("companies").await },
//!     )?;
//!     Migrator::new(&session, &migrations).apply_all(&ctx).await?;
//!
//!     let companies = Repository::<Company>::new(session);
//!     let mut acme = Company { id: 1, slug: "acme".into(), timestamps: Timestamps::default() };
//!     companies.create(&ctx, &mut acme).await?;
//!
//!     let found = companies.find_one_by(&ctx, predicate!("slug" => "acme")).await?;
//!     assert!(found.timestamps.created_at.is_some());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod migration;
pub mod observability;
pub mod predicate;
pub mod repository;
pub mod session;

#[cfg(feature = "sqlite")]
mod database;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, Dbms, LogFormat};
    pub use crate::context::Context;
    pub use crate::entity::{Column, ColumnKind, ColumnRole, Entity, Record, Table, Timestamps};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{
        Backend, ExecutorError, ExecutorErrorKind, ExecutorOperation, ExecutorResult,
        MemoryBackend,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::executor::SqliteBackend;
    pub use crate::hooks::{Clock, FixedClock, OperationKind, PersistHook, SystemClock, TimestampHook};
    pub use crate::migration::{
        Direction, Migration, MigrationError, MigrationSet, MigrationState, MigrationStatus,
        Migrator, SqlFileMigration,
    };
    pub use crate::observability::init_tracing;
    pub use crate::predicate;
    pub use crate::predicate::{IntoPredicate, Predicate, PredicateError, Value};
    pub use crate::repository::{
        Repository, RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult,
    };
    pub use crate::session::Session;
}
