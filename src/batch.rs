//! Sequential, failure-isolated loading of every CSV file in a directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{error, info};
use serde::Serialize;

use crate::{
    orchestrator::{FileLoader, FileReport},
    store::SqlExecutor,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Loaded(FileReport),
    Failed { file: PathBuf, error: String },
}

impl FileOutcome {
    pub fn file(&self) -> &Path {
        match self {
            FileOutcome::Loaded(report) => &report.file,
            FileOutcome::Failed { file, .. } => file,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, FileOutcome::Loaded(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub directory: PathBuf,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchSummary {
    pub fn loaded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_loaded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.loaded()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing batch summary")
    }
}

/// Regular files in `directory` whose names end with `suffix` (ASCII case-insensitive),
/// sorted by file name.
pub fn csv_files(directory: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let suffix = suffix.to_ascii_lowercase();
    let mut files = Vec::new();
    for entry in
        fs::read_dir(directory).with_context(|| format!("Listing directory {directory:?}"))?
    {
        let entry = entry.with_context(|| format!("Listing directory {directory:?}"))?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.to_ascii_lowercase().ends_with(&suffix));
        if matches {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every matching file in turn; a failed file is logged and recorded, never fatal.
pub fn run_batch<E: SqlExecutor>(
    loader: &mut FileLoader<E>,
    directory: &Path,
    suffix: &str,
) -> Result<BatchSummary> {
    let files = csv_files(directory, suffix)?;
    info!(
        "Found {} file(s) ending in '{suffix}' under {directory:?}",
        files.len()
    );
    let mut summary = BatchSummary {
        directory: directory.to_path_buf(),
        outcomes: Vec::with_capacity(files.len()),
    };
    for file in files {
        let outcome = match loader.load_file(&file) {
            Ok(report) => FileOutcome::Loaded(report),
            Err(err) => {
                error!("Error processing file {:?}: {err:#}", file);
                FileOutcome::Failed {
                    file,
                    error: format!("{err:#}"),
                }
            }
        };
        summary.outcomes.push(outcome);
    }
    info!(
        "Batch finished: {} loaded, {} failed",
        summary.loaded(),
        summary.failed()
    );
    Ok(summary)
}
