//! SQLite backend on sqlx
//!
//! Statements are assembled with [`QueryBuilder`]. Table and column names come
//! only from the static [`Table`] descriptor (or from the migration author for
//! schema steps) and are always quoted; every value is bound.
//!
//! Key columns are declared `NOT NULL UNIQUE` rather than `PRIMARY KEY` so an
//! integer key never aliases `rowid`. Selects order by `rowid`, which makes the
//! first returned row the earliest inserted one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{
    Backend, ExecutorError, ExecutorOperation, ExecutorResult, LedgerEntry, LedgerStore,
    QueryExecutor, SchemaExecutor,
};
use crate::config::DatabaseConfig;
use crate::database;
use crate::entity::{Column, ColumnKind, ColumnRole, Record, Table};
use crate::predicate::{Predicate, Value};

const LEDGER_TABLE: &str = "tabula_migrations";

/// Quote an identifier for SQLite
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text | ColumnKind::Timestamp | ColumnKind::Json => "TEXT",
        ColumnKind::Integer => "INTEGER",
        ColumnKind::Real => "REAL",
        ColumnKind::Boolean => "BOOLEAN",
    }
}

/// Column definition as used in CREATE TABLE / ADD COLUMN
fn column_definition(column: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(column.column), sql_type(column.kind));
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if column.unique || column.role == ColumnRole::Key {
        def.push_str(" UNIQUE");
    }
    def
}

/// A value ready to bind
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl Bind {
    /// Coerce a record value to the column's storage type
    fn for_column(
        table: &Table,
        column: &Column,
        value: &serde_json::Value,
        operation: ExecutorOperation,
    ) -> ExecutorResult<Self> {
        use serde_json::Value as J;

        let mismatch = || {
            ExecutorError::type_conversion(
                operation,
                format!(
                    "cannot store {} in {:?} column '{}'",
                    value, column.kind, column.column
                ),
            )
            .with_context(table.name)
        };

        Ok(match (column.kind, value) {
            (_, J::Null) => Self::Null,
            (ColumnKind::Json, other) => Self::Text(other.to_string()),
            (ColumnKind::Text | ColumnKind::Timestamp, J::String(s)) => Self::Text(s.clone()),
            (ColumnKind::Integer, J::Number(n)) => Self::Integer(n.as_i64().ok_or_else(mismatch)?),
            (ColumnKind::Real, J::Number(n)) => Self::Real(n.as_f64().ok_or_else(mismatch)?),
            (ColumnKind::Boolean, J::Bool(b)) => Self::Boolean(*b),
            _ => return Err(mismatch()),
        })
    }
}

impl From<&Value> for Bind {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s.clone()),
            Value::Integer(n) => Self::Integer(*n),
            Value::Float(n) => Self::Real(*n),
            Value::Boolean(b) => Self::Boolean(*b),
            Value::Null => Self::Null,
        }
    }
}

fn push_bind(qb: &mut QueryBuilder<'_, Sqlite>, value: Bind) {
    match value {
        Bind::Null => qb.push_bind(Option::<String>::None),
        Bind::Text(s) => qb.push_bind(s),
        Bind::Integer(n) => qb.push_bind(n),
        Bind::Real(n) => qb.push_bind(n),
        Bind::Boolean(b) => qb.push_bind(b),
    };
}

/// Resolve record fields to (column, bind) pairs through the descriptor
fn resolve_record<'t>(
    table: &'t Table,
    record: &Record,
    operation: ExecutorOperation,
) -> ExecutorResult<Vec<(&'t Column, Bind)>> {
    record
        .iter()
        .map(|(field, value)| {
            let column = table
                .column_for_field(field)
                .ok_or_else(|| ExecutorError::unknown_field(operation, table.name, field))?;
            Ok((column, Bind::for_column(table, column, value, operation)?))
        })
        .collect()
}

/// Append ` WHERE a = ? AND b IS NULL ...`
fn push_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    table: &Table,
    filter: &Predicate,
    operation: ExecutorOperation,
) -> ExecutorResult<()> {
    for (i, clause) in filter.clauses().iter().enumerate() {
        let column = table
            .column_for_field(&clause.field)
            .ok_or_else(|| ExecutorError::unknown_field(operation, table.name, &clause.field))?;

        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(quote_ident(column.column));
        match &clause.value {
            Value::Null => {
                qb.push(" IS NULL");
            }
            value => {
                qb.push(" = ");
                push_bind(qb, Bind::from(value));
            }
        }
    }
    Ok(())
}

/// Decode one selected row; columns were selected in descriptor order
fn decode_row(table: &Table, row: &SqliteRow) -> ExecutorResult<Record> {
    let op = ExecutorOperation::Select;
    let decode_err = |e: sqlx::Error| ExecutorError::from(e).with_operation(op).with_context(table.name);

    let mut record = Record::new();
    for (index, column) in table.columns.iter().enumerate() {
        let value = match column.kind {
            ColumnKind::Text | ColumnKind::Timestamp => row
                .try_get::<Option<String>, _>(index)
                .map_err(decode_err)?
                .map(serde_json::Value::String),
            ColumnKind::Integer => row
                .try_get::<Option<i64>, _>(index)
                .map_err(decode_err)?
                .map(serde_json::Value::from),
            ColumnKind::Real => row
                .try_get::<Option<f64>, _>(index)
                .map_err(decode_err)?
                .map(serde_json::Value::from),
            ColumnKind::Boolean => row
                .try_get::<Option<bool>, _>(index)
                .map_err(decode_err)?
                .map(serde_json::Value::Bool),
            ColumnKind::Json => match row.try_get::<Option<String>, _>(index).map_err(decode_err)? {
                Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
                    ExecutorError::type_conversion(op, e.to_string()).with_context(table.name)
                })?),
                None => None,
            },
        };
        record.insert(
            column.field.to_string(),
            value.unwrap_or(serde_json::Value::Null),
        );
    }
    Ok(record)
}

/// SQLite backend
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    debug: bool,
}

impl SqliteBackend {
    /// Connect using the database configuration, retrying with backoff
    pub async fn connect(config: &DatabaseConfig) -> ExecutorResult<Self> {
        let pool = database::create_pool(config).await?;
        Ok(Self {
            pool,
            debug: config.debug,
        })
    }

    /// A private in-memory database
    pub async fn in_memory() -> ExecutorResult<Self> {
        Self::connect(&DatabaseConfig::sqlite_memory()).await
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool, debug: false }
    }

    /// Log every statement at debug level
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn trace(&self, sql: &str) {
        if self.debug {
            tracing::debug!(backend = "sqlite", sql = %sql, "executing statement");
        }
    }

    async fn execute(
        &self,
        mut qb: QueryBuilder<'_, Sqlite>,
        operation: ExecutorOperation,
        context: &str,
    ) -> ExecutorResult<u64> {
        self.trace(qb.sql());
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| ExecutorError::from(e).with_operation(operation).with_context(context))?;
        Ok(result.rows_affected())
    }

    async fn execute_sql(
        &self,
        sql: &str,
        operation: ExecutorOperation,
        context: &str,
    ) -> ExecutorResult<()> {
        self.trace(sql);
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ExecutorError::from(e).with_operation(operation).with_context(context))?;
        Ok(())
    }

    /// Rows matching `filter` in insertion order, at most `limit` of them
    async fn select_rows(
        &self,
        table: &Table,
        filter: &Predicate,
        limit: Option<usize>,
    ) -> ExecutorResult<Vec<Record>> {
        let op = ExecutorOperation::Select;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        {
            let mut columns = qb.separated(", ");
            for column in table.columns {
                columns.push(quote_ident(column.column));
            }
        }
        qb.push(" FROM ");
        qb.push(quote_ident(table.name));
        push_filter(&mut qb, table, filter, op)?;
        qb.push(" ORDER BY rowid");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        self.trace(qb.sql());
        let mut rows = qb.build().fetch(&self.pool);
        let mut records = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| ExecutorError::from(e).with_operation(op).with_context(table.name))?
        {
            records.push(decode_row(table, &row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl QueryExecutor for SqliteBackend {
    async fn insert(&self, table: &Table, record: &Record) -> ExecutorResult<()> {
        let op = ExecutorOperation::Insert;
        let values = resolve_record(table, record, op)?;

        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ");
        qb.push(quote_ident(table.name));
        if values.is_empty() {
            qb.push(" DEFAULT VALUES");
        } else {
            qb.push(" (");
            {
                let mut columns = qb.separated(", ");
                for (column, _) in &values {
                    columns.push(quote_ident(column.column));
                }
            }
            qb.push(") VALUES (");
            for (i, (_, value)) in values.into_iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                push_bind(&mut qb, value);
            }
            qb.push(")");
        }

        self.execute(qb, op, table.name).await?;
        Ok(())
    }

    async fn select_all(&self, table: &Table) -> ExecutorResult<Vec<Record>> {
        self.select_where(table, &Predicate::all()).await
    }

    async fn select_where(
        &self,
        table: &Table,
        filter: &Predicate,
    ) -> ExecutorResult<Vec<Record>> {
        self.select_rows(table, filter, None).await
    }

    async fn select_limit(
        &self,
        table: &Table,
        filter: &Predicate,
        limit: usize,
    ) -> ExecutorResult<Vec<Record>> {
        self.select_rows(table, filter, Some(limit)).await
    }

    async fn update_where(
        &self,
        table: &Table,
        record: &Record,
        filter: &Predicate,
    ) -> ExecutorResult<u64> {
        let op = ExecutorOperation::Update;
        let values = resolve_record(table, record, op)?;

        if values.is_empty() {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM ");
            qb.push(quote_ident(table.name));
            push_filter(&mut qb, table, filter, op)?;
            self.trace(qb.sql());
            let count: i64 = qb
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ExecutorError::from(e).with_operation(op).with_context(table.name))?;
            return Ok(u64::try_from(count).unwrap_or_default());
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
        qb.push(quote_ident(table.name));
        qb.push(" SET ");
        for (i, (column, value)) in values.into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quote_ident(column.column));
            qb.push(" = ");
            push_bind(&mut qb, value);
        }
        push_filter(&mut qb, table, filter, op)?;

        self.execute(qb, op, table.name).await
    }

    async fn delete_where(&self, table: &Table, filter: &Predicate) -> ExecutorResult<u64> {
        let op = ExecutorOperation::Delete;
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM ");
        qb.push(quote_ident(table.name));
        push_filter(&mut qb, table, filter, op)?;

        self.execute(qb, op, table.name).await
    }
}

#[async_trait]
impl SchemaExecutor for SqliteBackend {
    async fn create_table(&self, table: &Table) -> ExecutorResult<()> {
        let columns: Vec<String> = table.columns.iter().map(column_definition).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table.name),
            columns.join(", ")
        );
        self.execute_sql(&sql, ExecutorOperation::Schema, table.name).await
    }

    async fn drop_table(&self, table: &str) -> ExecutorResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        self.execute_sql(&sql, ExecutorOperation::Schema, table).await
    }

    async fn add_column(&self, table: &str, column: &Column) -> ExecutorResult<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column_definition(column)
        );
        self.execute_sql(&sql, ExecutorOperation::Schema, table).await
    }

    async fn drop_column(&self, table: &str, column: &str) -> ExecutorResult<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        );
        self.execute_sql(&sql, ExecutorOperation::Schema, table).await
    }

    async fn execute_script(&self, script: &str) -> ExecutorResult<()> {
        let op = ExecutorOperation::Script;
        self.trace(script);
        sqlx::raw_sql(script)
            .execute(&self.pool)
            .await
            .map_err(|e| ExecutorError::from(e).with_operation(op))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteBackend {
    async fn init_ledger(&self) -> ExecutorResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY NOT NULL, applied_at TEXT NOT NULL)",
            LEDGER_TABLE
        );
        self.execute_sql(&sql, ExecutorOperation::Ledger, LEDGER_TABLE).await
    }

    async fn applied_migrations(&self) -> ExecutorResult<Vec<LedgerEntry>> {
        let sql = format!("SELECT name, applied_at FROM {} ORDER BY name", LEDGER_TABLE);
        self.trace(&sql);
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                ExecutorError::from(e)
                    .with_operation(ExecutorOperation::Ledger)
                    .with_context(LEDGER_TABLE)
            })?;

        Ok(rows
            .into_iter()
            .map(|(name, applied_at)| LedgerEntry { name, applied_at })
            .collect())
    }

    async fn record_applied(&self, entry: &LedgerEntry) -> ExecutorResult<()> {
        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ");
        qb.push(LEDGER_TABLE);
        qb.push(" (name, applied_at) VALUES (");
        qb.push_bind(entry.name.clone());
        qb.push(", ");
        qb.push_bind(entry.applied_at);
        qb.push(")");

        self.execute(qb, ExecutorOperation::Ledger, LEDGER_TABLE).await?;
        Ok(())
    }

    async fn remove_applied(&self, name: &str) -> ExecutorResult<()> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM ");
        qb.push(LEDGER_TABLE);
        qb.push(" WHERE name = ");
        qb.push_bind(name.to_string());

        self.execute(qb, ExecutorOperation::Ledger, LEDGER_TABLE).await?;
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }
}
