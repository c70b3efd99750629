use anyhow::{Context as _, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;
use tabula::prelude::*;
use tabula::migration::create_sql_files;

use crate::utils;

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Apply every pending migration
    Up,
    /// Revert the most recently applied migration
    Down,
    /// Revert every applied migration, newest first
    Reset,
    /// Show each migration and whether it is applied
    Status,
    /// Create an empty up/down SQL pair
    New {
        /// Migration name (snake_case)
        #[arg(value_name = "NAME")]
        name: String,
    },
}

pub async fn execute(config_path: Option<&Path>, command: MigrateCommands) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config)?;

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the current migration");
            interrupt.cancel();
        }
    });

    run(&config, command, &ctx).await
}

/// Run one migrate command against the configured database
pub async fn run(config: &Config, command: MigrateCommands, ctx: &Context) -> Result<()> {
    match command {
        MigrateCommands::New { name } => new_migration(config, &name),
        MigrateCommands::Up => {
            let target = Target::open(config).await?;
            let applied = target.migrator().apply_all(ctx).await?;
            if applied.is_empty() {
                utils::info("No pending migrations");
            }
            for name in &applied {
                utils::success(&format!("Applied {}", name));
            }
            Ok(())
        }
        MigrateCommands::Down => {
            let target = Target::open(config).await?;
            match target.migrator().rollback_last(ctx).await {
                Ok(name) => utils::success(&format!("Reverted {}", name)),
                Err(MigrationError::NothingToRollback) => utils::info("Nothing to roll back"),
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }
        MigrateCommands::Reset => {
            let target = Target::open(config).await?;
            let reverted = target.migrator().reset_all(ctx).await?;
            if reverted.is_empty() {
                utils::info("Nothing to roll back");
            }
            for name in &reverted {
                utils::success(&format!("Reverted {}", name));
            }
            Ok(())
        }
        MigrateCommands::Status => {
            let target = Target::open(config).await?;
            let states = target.migrator().status(ctx).await?;
            utils::section("Migrations");
            if states.is_empty() {
                utils::info("No migrations found");
            }
            for state in states {
                let status = match state.status {
                    MigrationStatus::Pending => state.status.to_string().yellow(),
                    MigrationStatus::Applied { .. } => state.status.to_string().green(),
                    MigrationStatus::Unregistered { .. } => state.status.to_string().red(),
                };
                println!("  {:<48} {}", state.name, status);
            }
            Ok(())
        }
    }
}

fn new_migration(config: &Config, name: &str) -> Result<()> {
    utils::validate_migration_name(name)?;
    let (up, down) = create_sql_files(&config.migrations.directory, name, chrono::Utc::now())?;
    utils::success("Created migration");
    println!("  {}", up.display());
    println!("  {}", down.display());
    Ok(())
}

/// Connected session plus the SQL migrations found on disk
struct Target {
    session: Session,
    migrations: MigrationSet,
}

impl Target {
    async fn open(config: &Config) -> Result<Self> {
        let directory = &config.migrations.directory;
        let mut migrations = MigrationSet::new();
        if directory.is_dir() {
            migrations.discover_sql(directory)?;
        } else {
            utils::warning(&format!(
                "Migration directory {} does not exist",
                directory.display()
            ));
        }

        let session = Session::connect(&config.database)
            .await
            .with_context(|| format!("Failed to connect to {} database", config.database.dbms))?;

        Ok(Self {
            session,
            migrations,
        })
    }

    fn migrator(&self) -> Migrator<'_> {
        Migrator::new(&self.session, &self.migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("cli.db").display());
        config.database.max_retries = 0;
        config.migrations.directory = dir.path().join("migrations");
        config
    }

    fn write_migration(config: &Config, name: &str, up: &str, down: &str) {
        let dir = &config.migrations.directory;
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(format!("{}.up.sql", name)), up).unwrap();
        fs::write(dir.join(format!("{}.down.sql", name)), down).unwrap();
    }

    async fn ledger(config: &Config) -> Vec<String> {
        let session = Session::connect(&config.database).await.unwrap();
        let ctx = Context::background();
        session.init_ledger(&ctx).await.unwrap();
        session
            .applied_migrations(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    #[tokio::test]
    async fn test_new_creates_file_pair() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ctx = Context::background();

        run(
            &config,
            MigrateCommands::New {
                name: "create_users".to_string(),
            },
            &ctx,
        )
        .await
        .unwrap();

        let mut files: Vec<String> = fs::read_dir(&config.migrations.directory)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("_create_users.down.sql"));
        assert!(files[1].ends_with("_create_users.up.sql"));
    }

    #[tokio::test]
    async fn test_new_rejects_bad_name() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ctx = Context::background();

        let result = run(
            &config,
            MigrateCommands::New {
                name: "Create-Users".to_string(),
            },
            &ctx,
        )
        .await;
        assert!(result.is_err());
        assert!(!config.migrations.directory.exists());
    }

    #[tokio::test]
    async fn test_up_down_reset() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ctx = Context::background();
        write_migration(
            &config,
            "001_create_users",
            "CREATE TABLE users (id INTEGER NOT NULL);",
            "DROP TABLE users;",
        );
        write_migration(
            &config,
            "002_add_email",
            "ALTER TABLE users ADD COLUMN email TEXT;",
            "ALTER TABLE users DROP COLUMN email;",
        );

        run(&config, MigrateCommands::Up, &ctx).await.unwrap();
        assert_eq!(ledger(&config).await, ["001_create_users", "002_add_email"]);

        run(&config, MigrateCommands::Status, &ctx).await.unwrap();

        run(&config, MigrateCommands::Down, &ctx).await.unwrap();
        assert_eq!(ledger(&config).await, ["001_create_users"]);

        run(&config, MigrateCommands::Reset, &ctx).await.unwrap();
        assert!(ledger(&config).await.is_empty());

        // Nothing left: down and reset both succeed quietly
        run(&config, MigrateCommands::Down, &ctx).await.unwrap();
        run(&config, MigrateCommands::Reset, &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ctx = Context::background();

        run(&config, MigrateCommands::Up, &ctx).await.unwrap();
        assert!(ledger(&config).await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_migration_reports_error() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let ctx = Context::background();
        write_migration(&config, "001_broken", "CREATE TABLE (;", "");

        let err = run(&config, MigrateCommands::Up, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("001_broken"));
        assert!(ledger(&config).await.is_empty());
    }
}
