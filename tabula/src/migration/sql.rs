//! Migrations stored as SQL files
//!
//! A migration named `20240101120000_create_users` lives in two files in one
//! directory:
//!
//! ```text
//! 20240101120000_create_users.up.sql
//! 20240101120000_create_users.down.sql   (optional)
//! ```
//!
//! Discovery is explicit: nothing is read until
//! [`MigrationSet::discover_sql`] is called.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{validate_name, Migration, MigrationError, MigrationResult, MigrationSet};
use crate::executor::ExecutorResult;
use crate::session::Session;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// A migration whose steps are SQL scripts
#[derive(Debug, Clone)]
pub struct SqlFileMigration {
    up: String,
    down: Option<String>,
}

impl SqlFileMigration {
    /// Build from script text. Without a down script, reverting is a no-op.
    pub fn new(up: impl Into<String>, down: Option<String>) -> Self {
        Self {
            up: up.into(),
            down,
        }
    }

    /// Whether a down script exists
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

#[async_trait]
impl Migration for SqlFileMigration {
    async fn up(&self, session: &Session) -> ExecutorResult<()> {
        session.execute_script(&self.up).await
    }

    async fn down(&self, session: &Session) -> ExecutorResult<()> {
        match &self.down {
            Some(script) => session.execute_script(script).await,
            None => {
                tracing::warn!("migration has no down script, nothing to revert");
                Ok(())
            }
        }
    }
}

fn read(path: &Path) -> MigrationResult<String> {
    fs::read_to_string(path).map_err(|source| MigrationError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl MigrationSet {
    /// Register every `<name>.up.sql` / `<name>.down.sql` pair in `dir`.
    ///
    /// Returns the number of migrations registered. A down file with no
    /// matching up file is an error; other files are ignored.
    pub fn discover_sql(&mut self, dir: impl AsRef<Path>) -> MigrationResult<usize> {
        let dir = dir.as_ref();
        let io_err = |source| MigrationError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut ups: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut downs: BTreeMap<String, PathBuf> = BTreeMap::new();

        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(UP_SUFFIX) {
                ups.insert(name.to_string(), path.clone());
            } else if let Some(name) = file_name.strip_suffix(DOWN_SUFFIX) {
                downs.insert(name.to_string(), path.clone());
            }
        }

        if let Some((name, path)) = downs.iter().find(|(name, _)| !ups.contains_key(*name)) {
            return Err(MigrationError::Io {
                path: path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no {}{} for this down script", name, UP_SUFFIX),
                ),
            });
        }

        let count = ups.len();
        for (name, up_path) in ups {
            validate_name(&name)?;
            let up = read(&up_path)?;
            let down = downs.get(&name).map(|p| read(p)).transpose()?;
            tracing::debug!(
                migration = %name,
                reversible = down.is_some(),
                "discovered SQL migration"
            );
            self.register_migration(name, SqlFileMigration::new(up, down))?;
        }

        tracing::info!(directory = %dir.display(), count, "Discovered SQL migrations");
        Ok(count)
    }
}

/// Create an empty up/down pair named `<YYYYMMDDHHMMSS>_<name>` in `dir`.
///
/// Creates `dir` if needed and returns the two paths.
pub fn create_sql_files(
    dir: impl AsRef<Path>,
    name: &str,
    now: DateTime<Utc>,
) -> MigrationResult<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    let full_name = format!("{}_{}", now.format("%Y%m%d%H%M%S"), name);
    validate_name(&full_name)?;

    fs::create_dir_all(dir).map_err(|source| MigrationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let up = dir.join(format!("{}{}", full_name, UP_SUFFIX));
    let down = dir.join(format!("{}{}", full_name, DOWN_SUFFIX));
    for (path, header) in [(&up, "-- apply"), (&down, "-- revert")] {
        if path.exists() {
            return Err(MigrationError::DuplicateMigration { name: full_name });
        }
        fs::write(path, format!("{} {}\n", header, full_name)).map_err(|source| {
            MigrationError::Io {
                path: path.clone(),
                source,
            }
        })?;
    }

    Ok((up, down))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, body: &str) {
        fs::write(dir.path().join(file), body).unwrap();
    }

    #[test]
    fn test_discover_pairs_and_optional_down() {
        let dir = TempDir::new().unwrap();
        write(&dir, "002_add_email.up.sql", "ALTER TABLE users ADD COLUMN email TEXT;");
        write(&dir, "001_create_users.up.sql", "CREATE TABLE users (id INTEGER);");
        write(&dir, "001_create_users.down.sql", "DROP TABLE users;");
        write(&dir, "README.md", "not a migration");

        let mut set = MigrationSet::new();
        assert_eq!(set.discover_sql(dir.path()).unwrap(), 2);
        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["001_create_users", "002_add_email"]);
    }

    #[test]
    fn test_orphan_down_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "001_create_users.down.sql", "DROP TABLE users;");
        let err = MigrationSet::new().discover_sql(dir.path()).unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
    }

    #[test]
    fn test_bad_file_name_is_invalid_name() {
        let dir = TempDir::new().unwrap();
        write(&dir, "create-users.up.sql", "CREATE TABLE users (id INTEGER);");
        let err = MigrationSet::new().discover_sql(dir.path()).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidName { .. }));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = MigrationSet::new()
            .discover_sql(dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
    }

    #[test]
    fn test_create_sql_files() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let target = dir.path().join("migrations");

        let (up, down) = create_sql_files(&target, "create_users", now).unwrap();
        assert!(up.ends_with("20240601083000_create_users.up.sql"));
        assert!(down.exists());

        let again = create_sql_files(&target, "create_users", now).unwrap_err();
        assert!(matches!(again, MigrationError::DuplicateMigration { .. }));

        assert!(matches!(
            create_sql_files(&target, "bad-name", now),
            Err(MigrationError::InvalidName { .. })
        ));

        let mut set = MigrationSet::new();
        assert_eq!(set.discover_sql(&target).unwrap(), 1);
    }
}
