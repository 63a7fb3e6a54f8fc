//! Per-file load orchestration.
//!
//! ```text
//! START -> LOADING -> (RETRY -> LOADING)* -> COMMIT
//!                  \-> ROLLBACK
//! ```
//!
//! A file is loaded inside one transaction. Each overflow widens one column and
//! restarts the whole file, so the loop ends either with a successful attempt or
//! with the loader's terminal "already at the widest type" error. Only after the
//! commit is the staging table promoted to the final name; any failure rolls
//! back and drops the staging table, leaving no partial table behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    loader::{self, AttemptOutcome},
    reader::ReaderOptions,
    schema::{ColumnTypeMap, staging_table_name, table_name_for},
    store::SqlExecutor,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub table: String,
    pub rows: usize,
    pub attempts: usize,
    pub overrides: ColumnTypeMap,
    pub encoding: String,
}

pub struct FileLoader<E> {
    executor: E,
    options: ReaderOptions,
}

impl<E: SqlExecutor> FileLoader<E> {
    pub fn new(executor: E, options: ReaderOptions) -> Self {
        Self { executor, options }
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn into_inner(self) -> E {
        self.executor
    }

    /// Loads `path` into the table named after its file stem.
    ///
    /// On error the transaction has already been rolled back and the staging
    /// table dropped; the error is returned for the caller to report.
    pub fn load_file(&mut self, path: &Path) -> Result<FileReport> {
        let table = table_name_for(path)?;
        let staging = staging_table_name(&table);
        debug!("{table}: START");
        self.executor
            .begin()
            .with_context(|| format!("Starting transaction for {path:?}"))?;

        match self.load_and_promote(path, &table, &staging) {
            Ok(report) => {
                info!(
                    "Table `{}` created and {} row(s) inserted successfully ({} attempt(s))",
                    report.table, report.rows, report.attempts
                );
                Ok(report)
            }
            Err(err) => {
                self.roll_back(&table, &staging, &err);
                Err(err)
            }
        }
    }

    fn load_and_promote(&mut self, path: &Path, table: &str, staging: &str) -> Result<FileReport> {
        let mut overrides = ColumnTypeMap::new();
        let mut attempts = 0usize;
        let (rows, encoding) = loop {
            attempts += 1;
            debug!("{table}: LOADING attempt {attempts} with overrides {overrides}");
            match loader::load(&mut self.executor, path, staging, &overrides, &self.options)? {
                AttemptOutcome::Loaded { rows, encoding, .. } => break (rows, encoding),
                AttemptOutcome::Retry {
                    column,
                    widened_to,
                    overrides: widened,
                } => {
                    warn!(
                        "{table}: RETRY from the first row with `{column}` as {widened_to}"
                    );
                    overrides = widened;
                }
            }
        };

        debug!("{table}: COMMIT");
        self.executor
            .commit()
            .with_context(|| format!("Committing load of {path:?}"))?;
        self.executor
            .promote(staging, table)
            .with_context(|| format!("Renaming {staging} to {table}"))?;

        Ok(FileReport {
            file: path.to_path_buf(),
            table: table.to_string(),
            rows,
            attempts,
            overrides,
            encoding: encoding.name().to_string(),
        })
    }

    fn roll_back(&mut self, table: &str, staging: &str, cause: &anyhow::Error) {
        warn!("{table}: ROLLBACK due to error: {cause:#}");
        if let Err(err) = self.executor.rollback() {
            warn!("{table}: rollback failed: {err}");
        }
        if let Err(err) = self.executor.drop_table_if_exists(staging) {
            warn!("{table}: could not drop staging table {staging}: {err}");
        }
    }
}
