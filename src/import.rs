//! Staged, transactional CSV import.
//!
//! The pipeline parses the row source up front, stages every row as raw text
//! in `temp_<target>`, then re-reads it through NULL-guarded cast
//! expressions into a freshly created final table, all inside one
//! transaction. Either the final table fully replaces any prior table of the
//! same name, or no visible change occurs.

use std::path::Path;

use encoding_rs::Encoding;
use log::{debug, info};
use postgres::Client;
use postgres::types::ToSql;

use crate::{
    db,
    error::IngestError,
    io_utils::{self, CsvReadOptions},
    schema::{self, Mapping},
    sql,
};

/// PostgreSQL caps bind parameters per statement at 65535; chunk staging
/// inserts well below that.
const MAX_PARAMS_PER_INSERT: usize = 20_000;

/// Immutable parameters for one import run, constructed once at submission
/// time. The mapping set is fixed for the duration of the run.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub target_table: String,
    pub null_tokens: Vec<String>,
    pub read_options: CsvReadOptions,
    pub mapping: Mapping,
}

impl ImportSpec {
    /// Configuration checks that must pass before any transactional work
    /// begins.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_table.is_empty() {
            return Err(IngestError::config("Target table name is empty"));
        }
        if !schema::is_safe_identifier(&self.target_table) {
            return Err(IngestError::config(format!(
                "Target table name '{}' is not identifier-safe",
                self.target_table
            )));
        }
        self.mapping.validate()
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub target_table: String,
    pub rows_loaded: u64,
}

/// Fully materialized row source: generated or decoded header names plus
/// every data row. Headerless inputs get positional `col_N` names.
pub fn read_source(
    path: &Path,
    options: &CsvReadOptions,
    encoding: &'static Encoding,
) -> Result<(Vec<String>, Vec<Vec<String>>), IngestError> {
    let mut reader = io_utils::open_csv_reader_from_path(path, options)
        .map_err(|err| IngestError::Parse(err.to_string()))?;

    let headers = if options.has_headers {
        Some(
            io_utils::reader_headers(&mut reader, encoding)
                .map_err(|err| IngestError::Parse(err.to_string()))?,
        )
    } else {
        None
    };

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let row = io_utils::decode_record(&record, encoding)
            .map_err(|err| IngestError::Parse(err.to_string()))?;
        rows.push(row);
    }

    let headers = match headers {
        Some(headers) => headers,
        None => {
            let width = rows.first().map(Vec::len).ok_or_else(|| {
                IngestError::Parse(
                    "Cannot determine column count from an empty headerless input".to_string(),
                )
            })?;
            (0..width).map(schema::positional_column_name).collect()
        }
    };

    Ok((headers, rows))
}

/// Rejects a parsed row set whose width disagrees with the mapping.
pub fn check_row_width(mapping: &Mapping, rows: &[Vec<String>]) -> Result<(), IngestError> {
    let expected = mapping.columns.len();
    if let Some(row) = rows.iter().find(|row| row.len() != expected) {
        return Err(IngestError::config(format!(
            "Mapping defines {expected} column(s) but input row has {}",
            row.len()
        )));
    }
    Ok(())
}

/// Runs the staged pipeline over already-parsed rows. Everything from
/// staging creation through commit executes in one transaction; any failure
/// rolls the whole sequence back and leaves a pre-existing table of the same
/// name untouched.
pub fn run(
    client: &mut Client,
    spec: &ImportSpec,
    rows: &[Vec<String>],
) -> Result<ImportOutcome, IngestError> {
    spec.validate()?;
    check_row_width(&spec.mapping, rows)?;
    let retained = spec.mapping.retained_columns();
    let staging = sql::staging_table_name(&spec.target_table);

    let mut tx = client.transaction().map_err(transaction_error)?;

    tx.batch_execute(&sql::drop_table_if_exists(&staging))
        .map_err(transaction_error)?;
    tx.batch_execute(&sql::create_staging_table(&spec.target_table, &spec.mapping))
        .map_err(transaction_error)?;

    let width = spec.mapping.columns.len();
    let chunk_rows = (MAX_PARAMS_PER_INSERT / width).max(1);
    for chunk in rows.chunks(chunk_rows) {
        let statement = sql::staging_insert_statement(&spec.target_table, &spec.mapping, chunk.len());
        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flatten()
            .map(|value| value as &(dyn ToSql + Sync))
            .collect();
        let inserted = tx.execute(&statement, &params).map_err(transaction_error)?;
        debug!("Staged {inserted} row(s) into '{staging}'");
    }

    tx.batch_execute(&sql::drop_table_if_exists(&spec.target_table))
        .map_err(transaction_error)?;
    tx.batch_execute(&sql::create_final_table(&spec.target_table, &retained))
        .map_err(transaction_error)?;
    let reloaded = tx
        .execute(
            &sql::typed_reload_statement(&spec.target_table, &retained, &spec.null_tokens),
            &[],
        )
        .map_err(transaction_error)?;
    tx.batch_execute(&sql::drop_table(&staging))
        .map_err(transaction_error)?;
    tx.commit().map_err(transaction_error)?;

    info!(
        "Imported {reloaded} row(s) into '{}' ({} typed column(s) + primary key)",
        spec.target_table,
        retained.len()
    );
    Ok(ImportOutcome {
        target_table: spec.target_table.clone(),
        rows_loaded: reloaded,
    })
}

fn transaction_error(err: postgres::Error) -> IngestError {
    IngestError::Transaction(db::describe_db_error(&err))
}

/// CLI entry point: resolves settings, loads or infers the mapping, parses
/// the row source, and runs the pipeline over a fresh connection.
pub fn execute(args: &crate::cli::ImportArgs) -> anyhow::Result<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.csv.delimiter);
    let encoding = io_utils::resolve_encoding(args.csv.input_encoding.as_deref())?;
    info!(
        "Importing '{}' into table '{}' (delimiter '{}')",
        args.input.display(),
        args.table,
        crate::printable_delimiter(delimiter)
    );

    let mut options = CsvReadOptions {
        delimiter,
        quote: args.csv.quote,
        escape: args.csv.escape,
        has_headers: !args.csv.no_header,
    };
    let mapping = args
        .mapping
        .as_ref()
        .map(|path| Mapping::load(path))
        .transpose()?;
    if let Some(mapping) = &mapping {
        options.has_headers = mapping.has_headers;
    }

    let (headers, rows) = read_source(&args.input, &options, encoding)?;
    let mapping = match mapping {
        Some(mapping) => mapping,
        None => {
            let mut mapping = Mapping::from_headers(&headers, options.has_headers);
            let types = schema::infer_column_types(
                &rows,
                mapping.columns.len(),
                &args.null_tokens,
                0,
            );
            for (column, datatype) in mapping.columns.iter_mut().zip(types) {
                column.datatype = datatype;
            }
            mapping
        }
    };

    let spec = ImportSpec {
        target_table: args.table.clone(),
        null_tokens: args.null_tokens.clone(),
        read_options: options,
        mapping,
    };
    spec.validate()?;
    check_row_width(&spec.mapping, &rows)?;

    let mut client = args.connection.settings().connect()?;
    run(&mut client, &spec, &rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CatalogType, ColumnMapping};

    fn spec() -> ImportSpec {
        ImportSpec {
            target_table: "users".to_string(),
            null_tokens: vec!["?".to_string()],
            read_options: CsvReadOptions::default(),
            mapping: Mapping {
                columns: vec![ColumnMapping {
                    source: "Name".into(),
                    target: "name".into(),
                    datatype: CatalogType::Varchar,
                }],
                has_headers: true,
            },
        }
    }

    #[test]
    fn validate_rejects_unsafe_table_names() {
        let mut bad = spec();
        bad.target_table = "users; drop table users".to_string();
        assert!(matches!(
            bad.validate(),
            Err(IngestError::Configuration(_))
        ));

        let mut empty = spec();
        empty.target_table = String::new();
        assert!(matches!(
            empty.validate(),
            Err(IngestError::Configuration(_))
        ));

        assert!(spec().validate().is_ok());
    }

    #[test]
    fn row_width_mismatch_is_a_configuration_error() {
        let s = spec();
        let rows = vec![vec!["Alice".to_string(), "extra".to_string()]];
        assert!(matches!(
            check_row_width(&s.mapping, &rows),
            Err(IngestError::Configuration(_))
        ));
        assert!(check_row_width(&s.mapping, &[vec!["Alice".to_string()]]).is_ok());
    }
}
