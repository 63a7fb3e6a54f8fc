#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_loader::data::SqlValue;
use csv_loader::schema::Dialect;
use csv_loader::sqlite::SqliteExecutor;
use csv_loader::store::{SqlExecutor, StoreError, StoreResult, insert_statement};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Creates a sub-directory for CSV inputs and returns its path.
    pub fn dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("create sub-directory");
        path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin,
    Commit,
    Rollback,
    Execute(String),
    Insert { table: String, rows: usize },
    Drop(String),
    Promote { staging: String, target: String },
}

/// SQLite-backed executor that records every call and can inject failures.
pub struct RecordingExecutor {
    pub inner: SqliteExecutor,
    pub calls: Vec<Call>,
    /// Every insert fails with this database error.
    pub insert_error: Option<String>,
    /// Every insert reports an overflow for this column.
    pub overflow_column: Option<String>,
    pub fail_commit: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            inner: SqliteExecutor::open_in_memory().expect("in-memory database"),
            calls: Vec::new(),
            insert_error: None,
            overflow_column: None,
            fail_commit: false,
        }
    }

    /// Number of `CREATE TABLE` statements issued, i.e. load attempts that got as far as DDL.
    pub fn creates(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Execute(sql) if sql.starts_with("CREATE TABLE")))
            .count()
    }

    pub fn saw(&self, expected: &Call) -> bool {
        self.calls.iter().any(|call| call == expected)
    }
}

impl SqlExecutor for RecordingExecutor {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn begin(&mut self) -> StoreResult<()> {
        self.calls.push(Call::Begin);
        self.inner.begin()
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.calls.push(Call::Commit);
        if self.fail_commit {
            return Err(StoreError::database("commit refused"));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.calls.push(Call::Rollback);
        self.inner.rollback()
    }

    fn execute(&mut self, sql: &str) -> StoreResult<()> {
        self.calls.push(Call::Execute(sql.to_string()));
        self.inner.execute(sql)
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> StoreResult<()> {
        self.calls.push(Call::Insert {
            table: table.to_string(),
            rows: rows.len(),
        });
        if let Some(message) = &self.insert_error {
            return Err(StoreError::database(message.clone()));
        }
        if let Some(column) = &self.overflow_column {
            return Err(StoreError::ValueTooLong {
                column: column.clone(),
            });
        }
        self.inner.insert_rows(table, columns, rows)
    }

    fn drop_table_if_exists(&mut self, table: &str) -> StoreResult<()> {
        self.calls.push(Call::Drop(table.to_string()));
        self.inner.drop_table_if_exists(table)
    }

    fn promote(&mut self, staging: &str, target: &str) -> StoreResult<()> {
        self.calls.push(Call::Promote {
            staging: staging.to_string(),
            target: target.to_string(),
        });
        self.inner.promote(staging, target)
    }

    fn table_exists(&mut self, table: &str) -> StoreResult<bool> {
        self.inner.table_exists(table)
    }
}

/// Executor that accepts everything and keeps the SQL it was handed, for
/// dialects without an embedded engine.
pub struct StatementLog {
    pub dialect: Dialect,
    pub statements: Vec<String>,
    pub inserted_rows: usize,
}

impl StatementLog {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            statements: Vec::new(),
            inserted_rows: 0,
        }
    }

    pub fn creates(&self) -> Vec<&str> {
        self.statements
            .iter()
            .map(String::as_str)
            .filter(|sql| sql.starts_with("CREATE TABLE"))
            .collect()
    }
}

impl SqlExecutor for StatementLog {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn begin(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> StoreResult<()> {
        self.statements.push(sql.to_string());
        Ok(())
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> StoreResult<()> {
        self.statements
            .push(insert_statement(self.dialect, table, columns, rows.len()));
        self.inserted_rows += rows.len();
        Ok(())
    }

    fn promote(&mut self, staging: &str, target: &str) -> StoreResult<()> {
        self.statements
            .push(format!("RENAME TABLE {staging} TO {target}"));
        Ok(())
    }

    fn table_exists(&mut self, _table: &str) -> StoreResult<bool> {
        Ok(false)
    }
}

pub fn row_count(executor: &SqliteExecutor, table: &str) -> i64 {
    executor
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })
        .expect("count rows")
}

/// All rows of `table` ordered by rowid, with `NULL` as `None`.
pub fn table_rows(executor: &SqliteExecutor, table: &str) -> Vec<Vec<Option<String>>> {
    let conn = executor.connection();
    let mut statement = conn
        .prepare(&format!("SELECT * FROM \"{table}\" ORDER BY rowid"))
        .expect("prepare select");
    let width = statement.column_count();
    statement
        .query_map([], |row| {
            (0..width)
                .map(|idx| row.get::<_, Option<String>>(idx))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .expect("query rows")
        .collect::<rusqlite::Result<Vec<_>>>()
        .expect("read rows")
}
