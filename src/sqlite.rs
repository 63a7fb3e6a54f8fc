//! Embedded SQLite backend for [`SqlExecutor`].
//!
//! SQLite stores every column as `TEXT`; the declared widths are enforced by the
//! named `CHECK` constraints that [`crate::schema::TableSchema::ddl`] emits for
//! [`Dialect::Sqlite`]. A failed check carries the constraint name, which is the
//! column name, and is reported as [`StoreError::ValueTooLong`].

use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use rusqlite::{
    Connection, ffi, params_from_iter,
    types::{ToSql, ToSqlOutput, Value, ValueRef},
};

use crate::{
    config::DatabaseConfig,
    data::SqlValue,
    schema::Dialect,
    store::{SqlExecutor, StoreError, StoreResult, insert_statement},
};

const CHECK_FAILED_PREFIX: &str = "CHECK constraint failed: ";
/// Default `SQLITE_MAX_VARIABLE_NUMBER` of the bundled library.
const MAX_BOUND_PARAMETERS: usize = 32_766;

pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)
            .with_context(|| format!("Opening database {:?}", config.path))?;
        conn.busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .context("Configuring busy timeout")?;
        debug!(
            "Opened {:?} (busy timeout {}s)",
            config.path, config.busy_timeout_secs
        );
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory().context("Opening in-memory database")?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
        })
    }
}

fn map_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err {
        if code.extended_code == ffi::SQLITE_CONSTRAINT_CHECK {
            if let Some(column) = message.strip_prefix(CHECK_FAILED_PREFIX) {
                return StoreError::ValueTooLong {
                    column: column.to_string(),
                };
            }
        }
    }
    StoreError::database(err.to_string())
}

impl SqlExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn begin(&mut self) -> StoreResult<()> {
        self.conn.execute_batch("BEGIN").map_err(map_error)
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK").map_err(map_error)
    }

    fn execute(&mut self, sql: &str) -> StoreResult<()> {
        self.conn.execute_batch(sql).map_err(map_error)
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> StoreResult<()> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(());
        }
        let rows_per_statement = (MAX_BOUND_PARAMETERS / columns.len()).max(1);
        for batch in rows.chunks(rows_per_statement) {
            let sql = insert_statement(self.dialect(), table, columns, batch.len());
            let mut statement = self.conn.prepare_cached(&sql).map_err(map_error)?;
            statement
                .execute(params_from_iter(batch.iter().flatten()))
                .map_err(map_error)?;
        }
        Ok(())
    }

    fn promote(&mut self, staging: &str, target: &str) -> StoreResult<()> {
        let dialect = self.dialect();
        let staging_sql = dialect.quote_identifier(staging);
        let target_sql = dialect.quote_identifier(target);
        let savepoint = self.conn.savepoint().map_err(map_error)?;
        savepoint
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {target_sql}; ALTER TABLE {staging_sql} RENAME TO {target_sql};"
            ))
            .map_err(map_error)?;
        savepoint.commit().map_err(map_error)
    }

    fn table_exists(&mut self, table: &str) -> StoreResult<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table],
                |row| row.get::<_, bool>(0),
            )
            .map_err(map_error)
    }
}
