//! The database boundary: a transactional SQL executor.
//!
//! The loader never talks to a driver directly. It needs DDL, multi-row
//! parameterized inserts, transactions, and an atomic promotion of the staging
//! table, and it needs "value too long for column" reported as a structured
//! [`StoreError::ValueTooLong`] rather than a message to be parsed.

use std::iter::repeat_n;

use itertools::Itertools;
use thiserror::Error;

use crate::{data::SqlValue, schema::Dialect};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Data too long for column '{column}'")]
    ValueTooLong { column: String },
    #[error("{message}")]
    Database { message: String },
}

impl StoreError {
    pub fn database(message: impl Into<String>) -> Self {
        StoreError::Database {
            message: message.into(),
        }
    }

    pub fn overflow_column(&self) -> Option<&str> {
        match self {
            StoreError::ValueTooLong { column } => Some(column),
            StoreError::Database { .. } => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait SqlExecutor {
    /// SQL dialect used when rendering DDL for this executor.
    fn dialect(&self) -> Dialect;

    fn begin(&mut self) -> StoreResult<()>;

    fn commit(&mut self) -> StoreResult<()>;

    /// Rolls back the open transaction; a no-op when none is open.
    fn rollback(&mut self) -> StoreResult<()>;

    fn execute(&mut self, sql: &str) -> StoreResult<()>;

    /// Inserts `rows` (each aligned with `columns`) in source order.
    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> StoreResult<()>;

    fn drop_table_if_exists(&mut self, table: &str) -> StoreResult<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {}",
            self.dialect().quote_identifier(table)
        );
        self.execute(&sql)
    }

    /// Replaces any table named `target` with `staging` in a single step, so no
    /// reader ever sees the target missing.
    fn promote(&mut self, staging: &str, target: &str) -> StoreResult<()>;

    fn table_exists(&mut self, table: &str) -> StoreResult<bool>;
}

/// Multi-row `INSERT` with one `?` placeholder per value, `row_count` rows deep.
pub fn insert_statement(
    dialect: Dialect,
    table: &str,
    columns: &[String],
    row_count: usize,
) -> String {
    let columns_sql = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .join(", ");
    let row = format!("({})", repeat_n("?", columns.len()).join(", "));
    format!(
        "INSERT INTO {} ({columns_sql}) VALUES {}",
        dialect.quote_identifier(table),
        repeat_n(row.as_str(), row_count).join(", ")
    )
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &mut E {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn begin(&mut self) -> StoreResult<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> StoreResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        (**self).rollback()
    }

    fn execute(&mut self, sql: &str) -> StoreResult<()> {
        (**self).execute(sql)
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> StoreResult<()> {
        (**self).insert_rows(table, columns, rows)
    }

    fn drop_table_if_exists(&mut self, table: &str) -> StoreResult<()> {
        (**self).drop_table_if_exists(table)
    }

    fn promote(&mut self, staging: &str, target: &str) -> StoreResult<()> {
        (**self).promote(staging, target)
    }

    fn table_exists(&mut self, table: &str) -> StoreResult<bool> {
        (**self).table_exists(table)
    }
}
