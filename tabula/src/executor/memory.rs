//! In-process backend
//!
//! Tables live in a [`DashMap`] keyed by table name. The backend behaves like
//! a small relational store: tables must be created before use, unknown
//! columns are rejected, `unique` and non-nullable columns are enforced, and
//! rows come back in insertion order. Raw scripts are not supported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    Backend, ExecutorError, ExecutorOperation, ExecutorResult, LedgerEntry, LedgerStore,
    QueryExecutor, SchemaExecutor,
};
use crate::entity::{Column, Record, Table};
use crate::predicate::{Predicate, Value};

/// Name reported for the ledger when it is used before `init_ledger`
const LEDGER_TABLE: &str = "tabula_migrations";

type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl MemTable {
    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.column == name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: DashMap<String, MemTable>,
    ledger: DashMap<String, LedgerEntry>,
    ledger_ready: AtomicBool,
}

/// In-memory backend; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a table exists
    pub fn has_table(&self, table: &str) -> bool {
        self.inner.tables.contains_key(table)
    }

    /// Column names of a table, in order
    pub fn column_names(&self, table: &str) -> Option<Vec<&'static str>> {
        self.inner
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.column).collect())
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.inner.tables.get(table).map(|t| t.rows.len())
    }

    fn ensure_ledger(&self, operation: ExecutorOperation) -> ExecutorResult<()> {
        if self.inner.ledger_ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ExecutorError::unknown_table(operation, LEDGER_TABLE))
        }
    }
}

/// Resolve an entity field to a column that exists in the stored table
fn resolve<'a>(
    descriptor: &'a Table,
    stored: &MemTable,
    field: &str,
    operation: ExecutorOperation,
) -> ExecutorResult<&'a Column> {
    descriptor
        .column_for_field(field)
        .filter(|c| stored.column(c.column).is_some())
        .ok_or_else(|| ExecutorError::unknown_field(operation, descriptor.name, field))
}

/// Filter clauses resolved to stored column names
fn resolve_filter<'p>(
    descriptor: &Table,
    stored: &MemTable,
    filter: &'p Predicate,
    operation: ExecutorOperation,
) -> ExecutorResult<Vec<(&'static str, &'p Value)>> {
    filter
        .clauses()
        .iter()
        .map(|clause| {
            resolve(descriptor, stored, &clause.field, operation).map(|c| (c.column, &clause.value))
        })
        .collect()
}

fn row_matches(row: &Row, filter: &[(&'static str, &Value)]) -> bool {
    filter.iter().all(|(column, value)| value.matches(row.get(*column)))
}

/// Map a record keyed by field into column/value pairs
fn resolve_record(
    descriptor: &Table,
    stored: &MemTable,
    record: &Record,
    operation: ExecutorOperation,
) -> ExecutorResult<Vec<(Column, serde_json::Value)>> {
    record
        .iter()
        .map(|(field, value)| {
            let column = resolve(descriptor, stored, field, operation)?;
            let stored_column = stored.column(column.column).copied().unwrap_or(*column);
            Ok((stored_column, value.clone()))
        })
        .collect()
}

fn check_not_null(
    table: &str,
    column: &Column,
    value: &serde_json::Value,
    operation: ExecutorOperation,
) -> ExecutorResult<()> {
    if !column.nullable && value.is_null() {
        return Err(ExecutorError::constraint_violation(
            operation,
            format!("NOT NULL constraint failed: {}.{}", table, column.column),
        ));
    }
    Ok(())
}

fn unique_violation(table: &str, column: &str, operation: ExecutorOperation) -> ExecutorError {
    ExecutorError::constraint_violation(
        operation,
        format!("UNIQUE constraint failed: {}.{}", table, column),
    )
}

fn project(descriptor: &Table, stored: &MemTable, row: &Row) -> ExecutorResult<Record> {
    let mut record = Record::new();
    for column in descriptor.columns {
        if stored.column(column.column).is_none() {
            return Err(ExecutorError::unknown_field(
                ExecutorOperation::Select,
                descriptor.name,
                column.field,
            ));
        }
        let value = row.get(column.column).cloned().unwrap_or(serde_json::Value::Null);
        record.insert(column.field.to_string(), value);
    }
    Ok(record)
}

#[async_trait]
impl QueryExecutor for MemoryBackend {
    async fn insert(&self, table: &Table, record: &Record) -> ExecutorResult<()> {
        let op = ExecutorOperation::Insert;
        let mut stored = self
            .inner
            .tables
            .get_mut(table.name)
            .ok_or_else(|| ExecutorError::unknown_table(op, table.name))?;

        let values = resolve_record(table, &stored, record, op)?;
        let mut row = Row::new();
        for column in &stored.columns {
            let value = values
                .iter()
                .find(|(c, _)| c.column == column.column)
                .map(|(_, v)| v.clone())
                .unwrap_or(serde_json::Value::Null);
            check_not_null(table.name, column, &value, op)?;
            if column.unique
                && !value.is_null()
                && stored.rows.iter().any(|r| r.get(column.column) == Some(&value))
            {
                return Err(unique_violation(table.name, column.column, op));
            }
            row.insert(column.column.to_string(), value);
        }

        stored.rows.push(row);
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
        let op = ExecutorOperation::Select;
        let stored = self
            .inner
            .tables
            .get(table.name)
            .ok_or_else(|| ExecutorError::unknown_table(op, table.name))?;

        let filter = resolve_filter(table, &stored, filter, op)?;
        stored
            .rows
            .iter()
            .filter(|row| row_matches(row, &filter))
            .map(|row| project(table, &stored, row))
            .collect()
    }

    async fn select_limit(
        &self,
        table: &Table,
        filter: &Predicate,
        limit: usize,
    ) -> ExecutorResult<Vec<Record>> {
        let op = ExecutorOperation::Select;
        let stored = self
            .inner
            .tables
            .get(table.name)
            .ok_or_else(|| ExecutorError::unknown_table(op, table.name))?;

        let filter = resolve_filter(table, &stored, filter, op)?;
        stored
            .rows
            .iter()
            .filter(|row| row_matches(row, &filter))
            .take(limit)
            .map(|row| project(table, &stored, row))
            .collect()
    }

    async fn update_where(
        &self,
        table: &Table,
        record: &Record,
        filter: &Predicate,
    ) -> ExecutorResult<u64> {
        let op = ExecutorOperation::Update;
        let mut stored = self
            .inner
            .tables
            .get_mut(table.name)
            .ok_or_else(|| ExecutorError::unknown_table(op, table.name))?;

        let values = resolve_record(table, &stored, record, op)?;
        let filter = resolve_filter(table, &stored, filter, op)?;
        let matched: Vec<usize> = stored
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row_matches(row, &filter))
            .map(|(i, _)| i)
            .collect();

        if matched.is_empty() {
            return Ok(0);
        }

        for (column, value) in &values {
            check_not_null(table.name, column, value, op)?;
            if column.unique && !value.is_null() {
                let collides = stored
                    .rows
                    .iter()
                    .enumerate()
                    .any(|(i, r)| !matched.contains(&i) && r.get(column.column) == Some(value));
                if matched.len() > 1 || collides {
                    return Err(unique_violation(table.name, column.column, op));
                }
            }
        }

        for i in &matched {
            let row = &mut stored.rows[*i];
            for (column, value) in &values {
                row.insert(column.column.to_string(), value.clone());
            }
        }

        Ok(matched.len() as u64)
    }

    async fn delete_where(&self, table: &Table, filter: &Predicate) -> ExecutorResult<u64> {
        let op = ExecutorOperation::Delete;
        let mut stored = self
            .inner
            .tables
            .get_mut(table.name)
            .ok_or_else(|| ExecutorError::unknown_table(op, table.name))?;

        let filter = resolve_filter(table, &stored, filter, op)?;
        let before = stored.rows.len();
        stored.rows.retain(|row| !row_matches(row, &filter));
        Ok((before - stored.rows.len()) as u64)
    }
}

#[async_trait]
impl SchemaExecutor for MemoryBackend {
    async fn create_table(&self, table: &Table) -> ExecutorResult<()> {
        self.inner
            .tables
            .entry(table.name.to_string())
            .or_insert_with(|| MemTable {
                columns: table.columns.to_vec(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> ExecutorResult<()> {
        self.inner.tables.remove(table);
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &Column) -> ExecutorResult<()> {
        let op = ExecutorOperation::Schema;
        let mut stored = self
            .inner
            .tables
            .get_mut(table)
            .ok_or_else(|| ExecutorError::unknown_table(op, table))?;

        if stored.column(column.column).is_some() {
            return Err(ExecutorError::query_failed(
                op,
                format!("duplicate column name: {}", column.column),
            ));
        }
        stored.columns.push(*column);
        for row in &mut stored.rows {
            row.insert(column.column.to_string(), serde_json::Value::Null);
        }
        Ok(())
    }

    async fn drop_column(&self, table: &str, column: &str) -> ExecutorResult<()> {
        let op = ExecutorOperation::Schema;
        let mut stored = self
            .inner
            .tables
            .get_mut(table)
            .ok_or_else(|| ExecutorError::unknown_table(op, table))?;

        if stored.column(column).is_none() {
            return Err(ExecutorError::unknown_field(op, table, column));
        }
        stored.columns.retain(|c| c.column != column);
        for row in &mut stored.rows {
            row.remove(column);
        }
        Ok(())
    }

    async fn execute_script(&self, _script: &str) -> ExecutorResult<()> {
        Err(ExecutorError::unsupported(
            ExecutorOperation::Script,
            "the memory backend cannot run SQL scripts",
        ))
    }
}

#[async_trait]
impl LedgerStore for MemoryBackend {
    async fn init_ledger(&self) -> ExecutorResult<()> {
        self.inner.ledger_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn applied_migrations(&self) -> ExecutorResult<Vec<LedgerEntry>> {
        self.ensure_ledger(ExecutorOperation::Ledger)?;
        Ok(self
            .inner
            .ledger
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn record_applied(&self, entry: &LedgerEntry) -> ExecutorResult<()> {
        let op = ExecutorOperation::Ledger;
        self.ensure_ledger(op)?;
        if self.inner.ledger.contains_key(&entry.name) {
            return Err(unique_violation(LEDGER_TABLE, "name", op));
        }
        self.inner.ledger.insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn remove_applied(&self, name: &str) -> ExecutorResult<()> {
        self.ensure_ledger(ExecutorOperation::Ledger)?;
        self.inner.ledger.remove(name);
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }
}
