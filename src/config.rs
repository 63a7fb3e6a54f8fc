//! Start-up configuration.
//!
//! A [`LoaderConfig`] is assembled once: defaults, then an optional YAML file,
//! then command-line flags. It is validated and frozen before any file is
//! touched; the orchestrator only ever sees it by reference.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use encoding_rs::{GBK, UTF_8};
use serde::Deserialize;

use crate::{
    data::{DEFAULT_NULL_MARKERS, NullMarkers},
    io_utils,
    reader::{DEFAULT_CHUNK_SIZE, ReaderOptions},
    schema::Dialect,
};

pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_SUFFIX: &str = ".csv";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub reader: ReaderConfig,
}

/// Target database. `backend` selects which of the remaining fields apply:
/// `path` and `busy_timeout_secs` for SQLite, the server fields for MySQL.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub backend: Dialect,
    pub path: PathBuf,
    pub busy_timeout_secs: u64,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Dialect::Sqlite,
            path: PathBuf::new(),
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT_SECS,
            host: String::new(),
            port: DEFAULT_MYSQL_PORT,
            user: String::new(),
            password: None,
            name: String::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Where the data goes, for log lines. Never includes the password.
    pub fn describe(&self) -> String {
        match self.backend {
            Dialect::Sqlite => format!("{:?}", self.path),
            Dialect::MySql => format!(
                "mysql://{}@{}:{}/{}",
                self.user, self.host, self.port, self.name
            ),
        }
    }

    fn validate(&self) -> Result<()> {
        match self.backend {
            Dialect::Sqlite => ensure!(
                !self.path.as_os_str().is_empty(),
                "A database path is required (--database or database.path)"
            ),
            Dialect::MySql => {
                ensure!(
                    !self.host.is_empty(),
                    "A MySQL host is required (--host or database.host)"
                );
                ensure!(
                    !self.user.is_empty(),
                    "A MySQL user is required (--user or database.user)"
                );
                ensure!(
                    !self.name.is_empty(),
                    "A MySQL database name is required (--db-name or database.name)"
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub directory: PathBuf,
    pub suffix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    pub chunk_size: usize,
    pub primary_encoding: String,
    pub fallback_encoding: String,
    pub delimiter: char,
    pub null_markers: Vec<String>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            primary_encoding: UTF_8.name().to_string(),
            fallback_encoding: GBK.name().to_string(),
            delimiter: ',',
            null_markers: DEFAULT_NULL_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Command-line values that take precedence over the YAML file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend: Option<Dialect>,
    pub database: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub db_name: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub suffix: Option<String>,
    pub chunk_size: Option<usize>,
    pub primary_encoding: Option<String>,
    pub fallback_encoding: Option<String>,
    pub delimiter: Option<u8>,
}

impl LoaderConfig {
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context("Parsing loader configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Reading configuration file {path:?}"))?;
        Self::from_yaml_str(&raw).with_context(|| format!("Loading configuration from {path:?}"))
    }

    /// Loads `path` if given (defaults otherwise) and applies `overrides`.
    pub fn layered(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        Ok(config)
    }

    /// [`LoaderConfig::layered`], then validated for a load.
    pub fn resolve(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let config = Self::layered(path, overrides)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(backend) = overrides.backend {
            self.database.backend = backend;
        }
        if let Some(path) = overrides.database {
            self.database.path = path;
        }
        if let Some(host) = overrides.host {
            self.database.host = host;
        }
        if let Some(port) = overrides.port {
            self.database.port = port;
        }
        if let Some(user) = overrides.user {
            self.database.user = user;
        }
        if overrides.password.is_some() {
            self.database.password = overrides.password;
        }
        if let Some(name) = overrides.db_name {
            self.database.name = name;
        }
        if let Some(dir) = overrides.source_dir {
            self.source.directory = dir;
        }
        if let Some(suffix) = overrides.suffix {
            self.source.suffix = suffix;
        }
        if let Some(size) = overrides.chunk_size {
            self.reader.chunk_size = size;
        }
        if let Some(label) = overrides.primary_encoding {
            self.reader.primary_encoding = label;
        }
        if let Some(label) = overrides.fallback_encoding {
            self.reader.fallback_encoding = label;
        }
        if let Some(delimiter) = overrides.delimiter {
            self.reader.delimiter = delimiter as char;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        ensure!(
            !self.source.directory.as_os_str().is_empty(),
            "A source directory is required (--source-dir or source.directory)"
        );
        ensure!(!self.source.suffix.is_empty(), "The file suffix cannot be empty");
        self.reader.options().map(|_| ())
    }
}

impl ReaderConfig {
    pub fn options(&self) -> Result<ReaderOptions> {
        ensure!(self.chunk_size > 0, "Chunk size must be greater than zero");
        ensure!(
            self.delimiter.is_ascii(),
            "Delimiter '{}' must be an ASCII character",
            self.delimiter
        );
        let primary = io_utils::resolve_encoding(Some(&self.primary_encoding), UTF_8)?;
        let fallback = io_utils::resolve_encoding(Some(&self.fallback_encoding), GBK)?;
        if primary == fallback {
            return Err(anyhow!(
                "Primary and fallback encodings are both {}",
                primary.name()
            ));
        }
        Ok(ReaderOptions {
            chunk_size: self.chunk_size,
            primary,
            fallback,
            delimiter: self.delimiter as u8,
            null_markers: NullMarkers::new(self.null_markers.iter().cloned()),
        })
    }
}
