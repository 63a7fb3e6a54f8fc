//! MySQL backend for [`SqlExecutor`].
//!
//! Runs `sqlx` on a private current-thread runtime so the loader stays
//! synchronous. The session is switched to strict mode, which turns an oversized
//! value into error 1406 (`ER_DATA_TOO_LONG`) instead of silent truncation; that
//! error is reported as [`StoreError::ValueTooLong`].
//!
//! MySQL commits implicitly around DDL, so a rollback after `CREATE TABLE` does
//! not remove the staging table. The orchestrator drops it explicitly.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::debug;
use sqlx::{
    Connection, Executor, MySql, MySqlConnection,
    error::DatabaseError,
    mysql::{MySqlConnectOptions, MySqlDatabaseError},
};
use tokio::runtime::{Builder, Runtime};

use crate::{
    config::DatabaseConfig,
    data::SqlValue,
    schema::Dialect,
    store::{SqlExecutor, StoreError, StoreResult, insert_statement},
};

const ER_DATA_TOO_LONG: u16 = 1406;
/// Placeholder limit of a MySQL prepared statement.
const MAX_BOUND_PARAMETERS: usize = 65_535;
const RETIRED_SUFFIX: &str = "_old";
const STRICT_MODE: &str = "SET SESSION sql_mode = CONCAT(@@sql_mode, ',STRICT_ALL_TABLES')";

pub struct MySqlExecutor {
    runtime: Runtime,
    conn: MySqlConnection,
}

impl MySqlExecutor {
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Starting database runtime")?;
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.name)
            .charset("utf8mb4");
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        let timeout = Duration::from_secs(config.connect_timeout_secs);

        let conn = runtime
            .block_on(async {
                let connecting = MySqlConnection::connect_with(&options);
                let mut conn = tokio::time::timeout(timeout, connecting)
                    .await
                    .map_err(|_| anyhow!("Timed out after {}s", timeout.as_secs()))??;
                conn.execute(STRICT_MODE).await?;
                Ok::<_, anyhow::Error>(conn)
            })
            .with_context(|| format!("Connecting to {}", config.describe()))?;
        debug!("Connected to {}", config.describe());
        Ok(Self { runtime, conn })
    }

    /// Runs `sql` over the text protocol, without preparing it.
    fn run(&mut self, sql: &str) -> StoreResult<()> {
        self.runtime
            .block_on(self.conn.execute(sql))
            .map(|_| ())
            .map_err(map_error)
    }
}

/// Column named by an `ER_DATA_TOO_LONG` message such as
/// `Data too long for column 'note' at row 1`.
fn data_too_long_column(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once('\'')?;
    let (column, _) = rest.rsplit_once("' at row")?;
    Some(column)
}

fn map_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
            if mysql.number() == ER_DATA_TOO_LONG {
                if let Some(column) = data_too_long_column(mysql.message()) {
                    return StoreError::ValueTooLong {
                        column: column.to_string(),
                    };
                }
            }
        }
    }
    StoreError::database(err.to_string())
}

impl SqlExecutor for MySqlExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn begin(&mut self) -> StoreResult<()> {
        self.run("START TRANSACTION")
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.run("COMMIT")
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.run("ROLLBACK")
    }

    fn execute(&mut self, sql: &str) -> StoreResult<()> {
        self.run(sql)
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
            let sql = insert_statement(Dialect::MySql, table, columns, batch.len());
            let query = batch
                .iter()
                .flatten()
                .fold(sqlx::query::<MySql>(&sql), |query, value| {
                    query.bind(value.as_text())
                });
            self.runtime
                .block_on(query.execute(&mut self.conn))
                .map_err(map_error)?;
        }
        Ok(())
    }

    fn promote(&mut self, staging: &str, target: &str) -> StoreResult<()> {
        let dialect = self.dialect();
        let staging_sql = dialect.quote_identifier(staging);
        let target_sql = dialect.quote_identifier(target);
        if !self.table_exists(target)? {
            return self.run(&format!("RENAME TABLE {staging_sql} TO {target_sql}"));
        }
        // RENAME TABLE with several pairs is atomic; the old target is dropped afterwards.
        let retired = format!("{target}{RETIRED_SUFFIX}");
        let retired_sql = dialect.quote_identifier(&retired);
        self.drop_table_if_exists(&retired)?;
        self.run(&format!(
            "RENAME TABLE {target_sql} TO {retired_sql}, {staging_sql} TO {target_sql}"
        ))?;
        self.drop_table_if_exists(&retired)
    }

    fn table_exists(&mut self, table: &str) -> StoreResult<bool> {
        let count = self
            .runtime
            .block_on(
                sqlx::query_scalar::<MySql, i64>(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = DATABASE() AND table_name = ?",
                )
                .bind(table)
                .fetch_one(&mut self.conn),
            )
            .map_err(map_error)?;
        Ok(count > 0)
    }
}
