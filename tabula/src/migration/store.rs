//! The migration record store

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::{FnMigration, Migration, MigrationError, MigrationResult};
use crate::executor::ExecutorResult;
use crate::session::Session;

static MIGRATION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+_[A-Za-z_][A-Za-z0-9_]*$").expect("migration name pattern is valid")
});

/// Check that a migration name is `<digits>_<identifier>`
pub fn validate_name(name: &str) -> MigrationResult<()> {
    if MIGRATION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(MigrationError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Named migrations in lexicographic name order.
///
/// Built once before any migrator runs; records are immutable after
/// registration.
#[derive(Default, Clone)]
pub struct MigrationSet {
    migrations: BTreeMap<String, Arc<dyn Migration>>,
}

impl std::fmt::Debug for MigrationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.migrations.keys()).finish()
    }
}

impl MigrationSet {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration from an up and a down closure
    pub fn register<U, UF, D, DF>(
        &mut self,
        name: impl Into<String>,
        up: U,
        down: D,
    ) -> MigrationResult<&mut Self>
    where
        U: Fn(Session) -> UF + Send + Sync + 'static,
        UF: Future<Output = ExecutorResult<()>> + Send + 'static,
        D: Fn(Session) -> DF + Send + Sync + 'static,
        DF: Future<Output = ExecutorResult<()>> + Send + 'static,
    {
        self.register_migration(name, FnMigration::new(up, down))
    }

    /// Register a [`Migration`] implementation
    pub fn register_migration(
        &mut self,
        name: impl Into<String>,
        migration: impl Migration + 'static,
    ) -> MigrationResult<&mut Self> {
        self.insert(name.into(), Arc::new(migration))
    }

    fn insert(&mut self, name: String, migration: Arc<dyn Migration>) -> MigrationResult<&mut Self> {
        validate_name(&name)?;
        if self.migrations.contains_key(&name) {
            return Err(MigrationError::DuplicateMigration { name });
        }
        tracing::debug!(migration = %name, "registered migration");
        self.migrations.insert(name, migration);
        Ok(self)
    }

    /// Look up a migration by name
    pub fn get(&self, name: &str) -> Option<&dyn Migration> {
        self.migrations.get(name).map(|m| m.as_ref())
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.migrations.contains_key(name)
    }

    /// Names in apply order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.migrations.keys().map(String::as_str)
    }

    /// Migrations in apply order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Migration)> {
        self.migrations
            .iter()
            .map(|(name, migration)| (name.as_str(), migration.as_ref()))
    }

    /// Number of registered migrations
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_session: Session) -> ExecutorResult<()> {
        Ok(())
    }

    #[test]
    fn test_validate_name() {
        for ok in ["001_create_users", "20240101120000_add_email", "1_x", "002__private"] {
            assert!(validate_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "create_users", "001", "001_", "001-create", "001_add-email", "abc_001", "001_9lives"] {
            assert!(
                matches!(validate_name(bad), Err(MigrationError::InvalidName { .. })),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_order_is_by_name_not_registration() {
        let mut set = MigrationSet::new();
        set.register("003_c", noop, noop)
            .unwrap()
            .register("001_a", noop, noop)
            .unwrap()
            .register("002_b", noop, noop)
            .unwrap();

        let names: Vec<&str> = set.names().collect();
        assert_eq!(names, vec!["001_a", "002_b", "003_c"]);
        assert_eq!(set.len(), 3);
        assert!(set.contains("002_b"));
        assert!(set.get("004_d").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut set = MigrationSet::new();
        set.register("001_a", noop, noop).unwrap();
        let err = set.register("001_a", noop, noop).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigration { ref name } if name == "001_a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut set = MigrationSet::new();
        assert!(set.register("create_users", noop, noop).is_err());
        assert!(set.is_empty());
    }
}
