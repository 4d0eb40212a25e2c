pub mod anomaly;
pub mod audit;
pub mod cli;
pub mod db;
pub mod error;
pub mod import;
pub mod io_utils;
pub mod schema;
pub mod sql;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => handle_probe(&args),
        Commands::Import(args) => import::execute(&args),
        Commands::Repair(command) => anomaly::execute(&command),
    }
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.csv.delimiter);
    let encoding = io_utils::resolve_encoding(args.csv.input_encoding.as_deref())?;
    info!(
        "Probing '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );
    let options = io_utils::CsvReadOptions {
        delimiter,
        quote: args.csv.quote,
        escape: args.csv.escape,
        has_headers: !args.csv.no_header,
    };
    let (headers, rows) = import::read_source(&args.input, &options, encoding)?;
    let mut mapping = schema::Mapping::from_headers(&headers, options.has_headers);
    let types = schema::infer_column_types(
        &rows,
        mapping.columns.len(),
        &args.null_tokens,
        args.sample_rows,
    );
    for (column, datatype) in mapping.columns.iter_mut().zip(types) {
        column.datatype = datatype;
    }
    mapping
        .save(&args.mapping)
        .with_context(|| format!("Writing mapping to {:?}", args.mapping))?;
    info!(
        "Inferred mapping for {} column(s) written to {:?}",
        mapping.columns.len(),
        args.mapping
    );
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
