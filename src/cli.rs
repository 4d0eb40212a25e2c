use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::anomaly::{self, KeepPolicy, OutlierAction, OutlierMethod, TimeseriesAction};
use crate::db::ConnectionSettings;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Stage delimited files into PostgreSQL and dispatch data-quality repairs",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Probe a CSV file and infer a column mapping into an editable YAML file
    Probe(ProbeArgs),
    /// Import a CSV file into a PostgreSQL table through a staged, atomic reload
    Import(ImportArgs),
    /// Dispatch an anomaly-repair procedure against an imported table
    #[command(subcommand)]
    Repair(RepairCommand),
}

#[derive(Debug, Args)]
pub struct CsvArgs {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Quote character for quoted fields
    #[arg(long, value_parser = parse_ascii_char, default_value = "\"")]
    pub quote: u8,
    /// Escape character inside quoted fields (doubled quotes when omitted)
    #[arg(long, value_parser = parse_ascii_char)]
    pub escape: Option<u8>,
    /// Treat the first row as data instead of a header
    #[arg(long = "no-header")]
    pub no_header: bool,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input CSV file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination mapping file path
    #[arg(short = 'o', long = "mapping")]
    pub mapping: PathBuf,
    /// Number of rows to sample when inferring types (0 means full scan)
    #[arg(long, default_value_t = 2000)]
    pub sample_rows: usize,
    /// String to treat as NULL during inference (repeatable, exact match)
    #[arg(long = "null-token", action = clap::ArgAction::Append)]
    pub null_tokens: Vec<String>,
    #[command(flatten)]
    pub csv: CsvArgs,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// PostgreSQL host
    #[arg(long, default_value = "localhost")]
    pub host: String,
    /// PostgreSQL port
    #[arg(long, default_value_t = 5432)]
    pub port: u16,
    /// Database user
    #[arg(long, default_value = "postgres")]
    pub user: String,
    /// Database password (falls back to the PGPASSWORD environment variable)
    #[arg(long)]
    pub password: Option<String>,
    /// Database name
    #[arg(long)]
    pub dbname: String,
}

impl ConnectionArgs {
    pub fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            dbname: self.dbname.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input CSV file to import
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Mapping file produced by `probe` (inferred on the fly when omitted)
    #[arg(short = 'm', long = "mapping")]
    pub mapping: Option<PathBuf>,
    /// Destination table name
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// String to treat as NULL during the typed reload (repeatable, ordered, exact match)
    #[arg(long = "null-token", action = clap::ArgAction::Append)]
    pub null_tokens: Vec<String>,
    #[command(flatten)]
    pub csv: CsvArgs,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Subcommand)]
pub enum RepairCommand {
    /// Repair missing values using a per-column rule file
    Missing(MissingArgs),
    /// Eliminate duplicate rows over a unique-key column set
    Duplicates(DuplicatesArgs),
    /// Detect and handle outliers in one numeric column
    Outliers(OutliersArgs),
    /// Apply an ordered batch of rule-based cleanups
    Rules(RulesArgs),
    /// Smooth anomalies in time-series columns
    Timeseries(TimeseriesArgs),
}

#[derive(Debug, Args)]
pub struct RepairCommonArgs {
    /// Target table name
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Schema of the target table
    #[arg(long, default_value = "public")]
    pub schema: String,
    /// Comma-separated key columns identifying rows
    #[arg(long = "key-columns", value_delimiter = ',', default_value = "id")]
    pub key_columns: Vec<String>,
    /// Schema hosting the repair procedures
    #[arg(long = "procedure-schema", default_value = anomaly::DEFAULT_PROCEDURE_SCHEMA)]
    pub procedure_schema: String,
    /// Preview the operation without persisting any mutation
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Args)]
pub struct MissingArgs {
    /// YAML file mapping columns to repair rules
    #[arg(long = "spec")]
    pub spec: PathBuf,
    #[command(flatten)]
    pub common: RepairCommonArgs,
}

#[derive(Debug, Args)]
pub struct DuplicatesArgs {
    /// Comma-separated columns forming the unique key (all columns when omitted)
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Which occurrence of a duplicate group to keep
    #[arg(long, value_enum, default_value = "first")]
    pub keep: KeepPolicy,
    #[command(flatten)]
    pub common: RepairCommonArgs,
}

#[derive(Debug, Args)]
pub struct OutliersArgs {
    /// Column to analyze
    #[arg(short = 'C', long = "column")]
    pub column: String,
    /// Detection method
    #[arg(long, value_enum, default_value = "iqr")]
    pub method: OutlierMethod,
    /// Sensitivity (k for iqr, z threshold otherwise; method default when omitted)
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Action to take on detected outliers
    #[arg(long, value_enum, default_value = "flag")]
    pub action: OutlierAction,
    /// Name of the boolean flag column written by the `flag` action
    #[arg(long = "flag-column", default_value = "is_outlier")]
    pub flag_column: String,
    #[command(flatten)]
    pub common: RepairCommonArgs,
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    /// YAML file with the ordered rule list
    #[arg(long = "rules")]
    pub rules: PathBuf,
    #[command(flatten)]
    pub common: RepairCommonArgs,
}

#[derive(Debug, Args)]
pub struct TimeseriesArgs {
    /// Timestamp column ordering the series
    #[arg(long = "time-column")]
    pub time_column: String,
    /// Comma-separated columns to analyze (all numeric columns when omitted)
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Rolling window size
    #[arg(long = "window", default_value_t = 7)]
    pub window: u32,
    /// Z-score sensitivity threshold
    #[arg(long = "z-threshold", default_value_t = 3.0)]
    pub z_threshold: f64,
    /// Action to take on flagged points
    #[arg(long, value_enum, default_value = "replace_with_rolling_mean")]
    pub action: TimeseriesAction,
    #[command(flatten)]
    pub common: RepairCommonArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => parse_ascii_char(other),
    }
}

pub fn parse_ascii_char(value: &str) -> Result<u8, String> {
    let mut chars = value.chars();
    let first = chars
        .next()
        .ok_or_else(|| "Character cannot be empty".to_string())?;
    if chars.next().is_some() {
        return Err("Expected a single character".to_string());
    }
    if !first.is_ascii() {
        return Err("Character must be ASCII".to_string());
    }
    Ok(first as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_parser_accepts_names_and_single_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert_eq!(parse_delimiter("|"), Ok(b'|'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }
}
