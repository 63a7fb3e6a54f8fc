//! One load attempt: stream a CSV file into a freshly created staging table.
//!
//! An attempt either inserts every chunk ([`AttemptOutcome::Loaded`]) or stops
//! at the first chunk the database rejects as too long for a column. In that
//! case the column is widened one step, the staging table is dropped, and the
//! caller gets [`AttemptOutcome::Retry`] with the updated overrides. The next
//! attempt starts again from the first row; already-consumed chunks are never
//! replayed into a table built with a different schema.

use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::{debug, error, warn};
use thiserror::Error;

use crate::{
    reader::{self, ReaderOptions},
    schema::{ColumnTypeMap, TextType, build_schema},
    store::{SqlExecutor, StoreError},
};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Column '{column}' is already {ty} and its data is still too long")]
    ColumnAtMaximum { column: String, ty: TextType },
    #[error("Database reported an overflow for column '{column}', which is not in the header")]
    UnknownColumn { column: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Every chunk was inserted; the overrides used are still current.
    Loaded {
        rows: usize,
        chunks: usize,
        encoding: &'static Encoding,
    },
    /// `column` overflowed and has been widened; reload with `overrides`.
    Retry {
        column: String,
        widened_to: TextType,
        overrides: ColumnTypeMap,
    },
}

pub fn load<E>(
    executor: &mut E,
    path: &Path,
    staging_table: &str,
    type_overrides: &ColumnTypeMap,
    options: &ReaderOptions,
) -> Result<AttemptOutcome>
where
    E: SqlExecutor + ?Sized,
{
    let stream = reader::open(path, options)?;
    let columns = stream.header().to_vec();
    let encoding = stream.encoding();
    let schema = build_schema(staging_table, &columns, &stream.charset(), type_overrides);
    for statement in schema.ddl(executor.dialect()).statements() {
        executor
            .execute(statement)
            .with_context(|| format!("Creating staging table {staging_table}"))?;
    }

    let mut rows = 0usize;
    let mut chunks = 0usize;
    for chunk in stream {
        let chunk = chunk?;
        match executor.insert_rows(staging_table, &columns, &chunk.rows) {
            Ok(()) => {
                rows += chunk.len();
                chunks += 1;
                debug!(
                    "{staging_table}: inserted chunk {} ({} row(s), {rows} total)",
                    chunk.index,
                    chunk.len()
                );
            }
            Err(StoreError::ValueTooLong { column }) => {
                warn!(
                    "{staging_table}: data too long for column `{column}` in chunk {}",
                    chunk.index
                );
                return widen_and_discard(executor, staging_table, &columns, type_overrides, column);
            }
            Err(err) => {
                error!("Failed to insert data into table `{staging_table}`: {err}");
                return Err(anyhow::Error::new(err).context(format!(
                    "Inserting chunk {} of {path:?} into {staging_table}",
                    chunk.index
                )));
            }
        }
    }

    Ok(AttemptOutcome::Loaded {
        rows,
        chunks,
        encoding,
    })
}

fn widen_and_discard<E>(
    executor: &mut E,
    staging_table: &str,
    columns: &[String],
    type_overrides: &ColumnTypeMap,
    column: String,
) -> Result<AttemptOutcome>
where
    E: SqlExecutor + ?Sized,
{
    if !columns.contains(&column) {
        return Err(LoadError::UnknownColumn { column }.into());
    }
    let mut overrides = type_overrides.clone();
    let Some(widened_to) = overrides.widen(&column) else {
        let ty = type_overrides.type_for(&column);
        error!("Column `{column}` already set to {ty} and still too large");
        return Err(LoadError::ColumnAtMaximum { column, ty }.into());
    };
    warn!("Recreating {staging_table} with column `{column}` as {widened_to}");
    executor
        .drop_table_if_exists(staging_table)
        .with_context(|| format!("Dropping staging table {staging_table}"))?;
    Ok(AttemptOutcome::Retry {
        column,
        widened_to,
        overrides,
    })
}
