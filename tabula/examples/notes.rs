//! Notes Example
//!
//! This example demonstrates:
//! - Registering closure migrations and applying them in name order
//! - Creating, querying, updating and deleting through `Repository<Note>`
//! - Timestamps stamped by the default persist hook
//! - Rolling everything back with `reset_all`
//!
//! Run with: cargo run --example notes
//!
//! Set `TABULA_DATABASE__DBMS=memory` to run against the in-memory backend
//! instead of SQLite.

use serde::{Deserialize, Serialize};
use tabula::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    id: i64,
    title: String,
    pinned: bool,
    #[serde(flatten)]
    timestamps: Timestamps,
}

impl Entity for Note {
    const TABLE: Table = Table::new(
        "notes",
        &[
            Column::key("id", ColumnKind::Integer),
            Column::new("title", ColumnKind::Text),
            Column::new("pinned", ColumnKind::Boolean),
            Column::created_at(),
            Column::updated_at(),
        ],
    );

    fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }

    fn timestamps_mut(&mut self) -> &mut Timestamps {
        &mut self.timestamps
    }
}

fn note(id: i64, title: &str) -> Note {
    Note {
        id,
        title: title.to_string(),
        pinned: false,
        timestamps: Timestamps::default(),
    }
}

// Migration steps report backend errors
fn executor_error(err: RepositoryError) -> ExecutorError {
    let operation = match err.operation {
        RepositoryOperation::DeleteWhere => ExecutorOperation::Delete,
        _ => ExecutorOperation::Insert,
    };
    err.source
        .unwrap_or_else(|| ExecutorError::query_failed(operation, err.message))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load()?;
    // Keep the demo off disk unless another backend was configured
    if config.database.dbms == Dbms::Sqlite {
        config.database = DatabaseConfig::sqlite_memory();
    }
    init_tracing(&config)?;

    let session = Session::connect(&config.database).await?;
    let ctx = Context::background();

    let mut migrations = MigrationSet::new();
    migrations
        .register(
            "001_create_notes",
            |s: Session| async move { s.create_table(&Note::TABLE).await },
            |s: Session| async move { s.drop_table("notes").await },
        )?
        .register(
            "002_seed_welcome",
            |s: Session| async move {
                Repository::<Note>::new(s)
                    .create(&Context::background(), &mut note(0, "welcome"))
                    .await
                    .map_err(executor_error)
            },
            |s: Session| async move {
                Repository::<Note>::new(s)
                    .delete_where(&Context::background(), [("id", 0)])
                    .await
                    .map_err(executor_error)
            },
        )?;

    let migrator = Migrator::new(&session, &migrations);
    let applied = migrator.apply_all(&ctx).await?;
    println!("applied: {:?}", applied);

    let notes = Repository::<Note>::new(session.clone());
    for (id, title) in [(1, "groceries"), (2, "dentist")] {
        notes.create(&ctx, &mut note(id, title)).await?;
    }

    let mut dentist = notes.find_one_by(&ctx, predicate!("title" => "dentist")).await?;
    println!("found: {:?}", dentist);

    dentist.pinned = true;
    notes
        .update_where(&ctx, predicate!("id" => 2), &mut dentist)
        .await?;

    notes.delete_where(&ctx, [("title", "groceries")]).await?;

    for n in notes.find_all(&ctx).await? {
        println!("{:>3} {:<12} pinned={}", n.id, n.title, n.pinned);
    }

    for state in migrator.status(&ctx).await? {
        println!("{:<20} {}", state.name, state.status);
    }

    let reverted = migrator.reset_all(&ctx).await?;
    println!("reverted: {:?}", reverted);

    Ok(())
}
