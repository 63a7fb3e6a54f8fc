pub mod batch;
pub mod cli;
pub mod config;
pub mod data;
pub mod io_utils;
pub mod loader;
pub mod mysql;
pub mod orchestrator;
pub mod reader;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod table;

use std::{env, fs, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::LoaderConfig,
    mysql::MySqlExecutor,
    orchestrator::FileLoader,
    schema::Dialect,
    sqlite::SqliteExecutor,
    store::SqlExecutor,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Ddl(args) => handle_ddl(&args),
    }
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let config = LoaderConfig::resolve(args.config.as_deref(), args.overrides())?;
    match config.database.backend {
        Dialect::Sqlite => load_with(SqliteExecutor::open(&config.database)?, &config, args),
        Dialect::MySql => load_with(MySqlExecutor::connect(&config.database)?, &config, args),
    }
}

fn load_with<E: SqlExecutor>(
    executor: E,
    config: &LoaderConfig,
    args: &cli::LoadArgs,
) -> Result<()> {
    let options = config.reader.options()?;
    info!(
        "Loading '{}' files from {:?} into {} (chunk size {}, encodings {} -> {})",
        config.source.suffix,
        config.source.directory,
        config.database.describe(),
        options.chunk_size,
        options.primary.name(),
        options.fallback.name()
    );
    let mut loader = FileLoader::new(executor, options);
    let summary = batch::run_batch(&mut loader, &config.source.directory, &config.source.suffix)?;

    print!("{}", table::render_summary(&summary));
    if let Some(path) = &args.report {
        fs::write(path, summary.to_json()?)
            .with_context(|| format!("Writing batch report to {path:?}"))?;
        debug!("Batch report written to {path:?}");
    }
    Ok(())
}

fn handle_ddl(args: &cli::DdlArgs) -> Result<()> {
    let config = LoaderConfig::layered(args.config.as_deref(), args.overrides())?;
    let options = config.reader.options()?;
    let overrides = schema::parse_overrides(&args.overrides)?;

    let stream = reader::open(&args.input, &options)
        .with_context(|| format!("Reading header of {:?}", args.input))?;
    let table = schema::table_name_for(&args.input)?;
    let staging = schema::build_schema(
        &schema::staging_table_name(&table),
        stream.header(),
        &stream.charset(),
        &overrides,
    );
    println!("{}", staging.ddl(args.dialect));
    Ok(())
}
