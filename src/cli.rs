use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config::ConfigOverrides, schema::Dialect};

#[derive(Debug, Parser)]
#[command(author, version, about = "Bulk-load CSV files into database tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load every CSV file in a directory into a table named after the file
    Load(LoadArgs),
    /// Print the staging-table DDL the first load attempt would run for a file
    Ddl(DdlArgs),
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// YAML configuration file (command-line flags take precedence)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory containing the CSV files to load
    #[arg(short = 's', long = "source-dir")]
    pub source_dir: Option<PathBuf>,
    /// Database backend to load into
    #[arg(long, value_enum)]
    pub backend: Option<Dialect>,
    /// SQLite database file to load into (created if missing)
    #[arg(short, long)]
    pub database: Option<PathBuf>,
    /// MySQL server host
    #[arg(long)]
    pub host: Option<String>,
    /// MySQL server port (defaults to 3306)
    #[arg(long)]
    pub port: Option<u16>,
    /// MySQL user name
    #[arg(short, long)]
    pub user: Option<String>,
    /// MySQL password
    #[arg(long)]
    pub password: Option<String>,
    /// MySQL database (schema) the tables are created in
    #[arg(long = "db-name")]
    pub db_name: Option<String>,
    /// File name suffix that selects input files (case-insensitive)
    #[arg(long)]
    pub suffix: Option<String>,
    /// Number of rows read and inserted per chunk
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,
    /// Encoding tried first for every file (defaults to utf-8)
    #[arg(long = "primary-encoding")]
    pub primary_encoding: Option<String>,
    /// Encoding tried when the primary encoding fails (defaults to gbk)
    #[arg(long = "fallback-encoding")]
    pub fallback_encoding: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Write a JSON summary of the batch to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl LoadArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            backend: self.backend,
            database: self.database.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            db_name: self.db_name.clone(),
            source_dir: self.source_dir.clone(),
            suffix: self.suffix.clone(),
            chunk_size: self.chunk_size,
            primary_encoding: self.primary_encoding.clone(),
            fallback_encoding: self.fallback_encoding.clone(),
            delimiter: self.delimiter,
        }
    }
}

#[derive(Debug, Args)]
pub struct DdlArgs {
    /// CSV file whose header row defines the table
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML configuration file whose reader settings are used
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// SQL dialect to render
    #[arg(long, value_enum, default_value = "mysql")]
    pub dialect: Dialect,
    /// Column type overrides of the form `column=TEXT`
    #[arg(long = "override", action = clap::ArgAction::Append)]
    pub overrides: Vec<String>,
    /// Encoding tried first (defaults to utf-8)
    #[arg(long = "primary-encoding")]
    pub primary_encoding: Option<String>,
    /// Encoding tried when the primary encoding fails (defaults to gbk)
    #[arg(long = "fallback-encoding")]
    pub fallback_encoding: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

impl DdlArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            primary_encoding: self.primary_encoding.clone(),
            fallback_encoding: self.fallback_encoding.clone(),
            delimiter: self.delimiter,
            ..ConfigOverrides::default()
        }
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
