//! Entity mapping descriptors
//!
//! An [`Entity`] is any serde-serializable record type that knows its table
//! and how its fields map to storage columns. The repository never holds
//! entity state; it converts entities to [`Record`]s on the way in and back
//! on the way out.
//!
//! # Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use tabula::entity::{Column, ColumnKind, Entity, Table, Timestamps};
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
//! assert_eq!(Company::TABLE.column_for_field("slug").unwrap().column, "slug");
//! ```

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// A single persisted row, keyed by entity field name
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// UTF-8 text
    Text,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Real,
    /// Boolean
    Boolean,
    /// UTC timestamp, stored as RFC 3339 text
    Timestamp,
    /// Arbitrary JSON document, stored as text
    Json,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Real => write!(f, "real"),
            Self::Boolean => write!(f, "boolean"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// What the repository is allowed to do with a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    /// Identity column: written on insert, never on update
    Key,
    /// Business data: written on insert and update
    Data,
    /// Creation stamp: written on insert only
    CreatedAt,
    /// Update stamp: written on insert and update
    UpdatedAt,
}

/// Mapping between an entity field and a storage column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Field name as serialized by serde and used in predicates
    pub field: &'static str,
    /// Column name in the backing table
    pub column: &'static str,
    /// Storage type
    pub kind: ColumnKind,
    /// Write rules
    pub role: ColumnRole,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Whether values must be unique across rows
    pub unique: bool,
}

impl Column {
    /// A non-null data column whose column name equals the field name
    pub const fn new(field: &'static str, kind: ColumnKind) -> Self {
        Self {
            field,
            column: field,
            kind,
            role: ColumnRole::Data,
            nullable: false,
            unique: false,
        }
    }

    /// A unique, non-null key column
    pub const fn key(field: &'static str, kind: ColumnKind) -> Self {
        Self {
            field,
            column: field,
            kind,
            role: ColumnRole::Key,
            nullable: false,
            unique: true,
        }
    }

    /// The `created_at` audit column
    pub const fn created_at() -> Self {
        Self {
            field: "created_at",
            column: "created_at",
            kind: ColumnKind::Timestamp,
            role: ColumnRole::CreatedAt,
            nullable: true,
            unique: false,
        }
    }

    /// The `updated_at` audit column
    pub const fn updated_at() -> Self {
        Self {
            field: "updated_at",
            column: "updated_at",
            kind: ColumnKind::Timestamp,
            role: ColumnRole::UpdatedAt,
            nullable: true,
            unique: false,
        }
    }

    /// Store the field under a different column name
    #[must_use]
    pub const fn renamed(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    /// Allow NULL
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Require unique values
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Whether an update statement may write this column
    pub fn is_written_on_update(&self) -> bool {
        matches!(self.role, ColumnRole::Data | ColumnRole::UpdatedAt)
    }
}

/// Static description of an entity's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    /// Table name
    pub name: &'static str,
    /// Columns in declaration order
    pub columns: &'static [Column],
}

impl Table {
    /// Describe a table
    pub const fn new(name: &'static str, columns: &'static [Column]) -> Self {
        Self { name, columns }
    }

    /// Look up the column for an entity field.
    ///
    /// Backends only ever put names returned from here into statement text.
    pub fn column_for_field(&self, field: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Look up a column by its storage name
    pub fn column_named(&self, column: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.column == column)
    }
}

/// Audit timestamps embedded in every persisted entity.
///
/// Set by the [`TimestampHook`](crate::hooks::TimestampHook); caller code should
/// leave them alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// When the entity was inserted
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the entity was last updated through the repository
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A record type with a persistence mapping
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table and column mapping
    const TABLE: Table;

    /// Audit timestamps
    fn timestamps(&self) -> &Timestamps;

    /// Mutable audit timestamps, used by persistence hooks
    fn timestamps_mut(&mut self) -> &mut Timestamps;

    /// Short type name used in error messages and logs
    fn entity_name() -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// Last path segment of a type name, without generic arguments
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Serialize an entity into a record
pub(crate) fn encode<E: Entity>(entity: &E) -> Result<Record, serde_json::Error> {
    match serde_json::to_value(entity)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "entity must serialize to an object, got {}",
            other
        ))),
    }
}

/// Deserialize a record into an entity
pub(crate) fn decode<E: Entity>(record: Record) -> Result<E, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(record))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Entities shared by the crate's tests

    use super::*;
    use crate::executor::ExecutorResult;
    use crate::session::Session;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Company {
        pub id: i64,
        pub slug: String,
        pub name: String,
        #[serde(default)]
        pub active: bool,
        #[serde(flatten)]
        pub timestamps: Timestamps,
    }

    impl Company {
        pub fn new(id: i64, slug: &str, name: &str) -> Self {
            Self {
                id,
                slug: slug.to_string(),
                name: name.to_string(),
                active: true,
                timestamps: Timestamps::default(),
            }
        }
    }

    impl Entity for Company {
        const TABLE: Table = Table::new(
            "companies",
            &[
                Column::key("id", ColumnKind::Integer),
                Column::new("slug", ColumnKind::Text).unique(),
                Column::new("name", ColumnKind::Text).renamed("display_name"),
                Column::new("active", ColumnKind::Boolean),
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

    pub async fn create_companies(session: Session) -> ExecutorResult<()> {
        session.create_table(&Company::TABLE).await
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::Company;
    use super::*;

    #[test]
    fn test_column_builders() {
        let col = Column::new("name", ColumnKind::Text).renamed("display_name").nullable();
        assert_eq!(col.field, "name");
        assert_eq!(col.column, "display_name");
        assert!(col.nullable);
        assert!(!col.unique);
        assert!(col.is_written_on_update());

        let key = Column::key("id", ColumnKind::Integer);
        assert!(key.unique);
        assert!(!key.is_written_on_update());
        assert!(!Column::created_at().is_written_on_update());
        assert!(Column::updated_at().is_written_on_update());
    }

    #[test]
    fn test_table_lookup() {
        let table = Company::TABLE;
        assert_eq!(table.column_for_field("name").unwrap().column, "display_name");
        assert_eq!(table.column_named("display_name").unwrap().field, "name");
        assert!(table.column_for_field("display_name").is_none());
        assert!(table.column_for_field("missing").is_none());
    }

    #[test]
    fn test_encode_flattens_timestamps() {
        let company = Company::new(1, "acme", "Acme");
        let record = encode(&company).unwrap();
        assert_eq!(record.get("slug"), Some(&serde_json::json!("acme")));
        assert_eq!(record.get("created_at"), Some(&serde_json::Value::Null));
        assert_eq!(record.get("updated_at"), Some(&serde_json::Value::Null));

        let back: Company = decode(record).unwrap();
        assert_eq!(back, company);
    }

    #[test]
    fn test_entity_name_is_short() {
        assert_eq!(Company::entity_name(), "Company");
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize)]
    struct Tagged<T> {
        id: i64,
        tag: T,
        #[serde(flatten)]
        timestamps: Timestamps,
    }

    impl<T> Entity for Tagged<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        const TABLE: Table = Table::new(
            "tagged",
            &[
                Column::key("id", ColumnKind::Integer),
                Column::new("tag", ColumnKind::Json),
            ],
        );

        fn timestamps(&self) -> &Timestamps {
            &self.timestamps
        }

        fn timestamps_mut(&mut self) -> &mut Timestamps {
            &mut self.timestamps
        }
    }

    #[test]
    fn test_entity_name_drops_generic_arguments() {
        assert_eq!(Tagged::<Company>::entity_name(), "Tagged");
        assert_eq!(Tagged::<Vec<String>>::entity_name(), "Tagged");
        assert_eq!(short_type_name("app::model::Wrapper<app::Foo>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
