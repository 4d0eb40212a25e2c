//! SQL statement planning for the staged import pipeline.
//!
//! Everything here is pure text assembly: identifier quoting, staging and
//! final DDL, NULL-guarded cast expressions, and the single
//! insert-from-select that performs the typed reload. Execution lives in
//! [`crate::import`].

use itertools::Itertools;

use crate::schema::{ColumnMapping, Mapping};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Deterministic staging-table name for a target table.
pub fn staging_table_name(target: &str) -> String {
    format!("temp_{target}")
}

pub fn drop_table_if_exists(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE {}", quote_ident(table))
}

/// Staging DDL: one `TEXT` column per mapping, in mapping order. No typing
/// happens at this stage.
pub fn create_staging_table(target: &str, mapping: &Mapping) -> String {
    let columns = mapping
        .columns
        .iter()
        .map(|column| format!("{} TEXT", quote_ident(&column.target)))
        .join(", ");
    format!(
        "CREATE TABLE {} ({columns})",
        quote_ident(&staging_table_name(target))
    )
}

/// Final DDL: system primary key first, then the retained mappings in order,
/// typed per the catalog.
pub fn create_final_table(target: &str, retained: &[&ColumnMapping]) -> String {
    let mut columns = vec![format!("{} SERIAL PRIMARY KEY", quote_ident("id"))];
    columns.extend(
        retained
            .iter()
            .map(|column| format!("{} {}", quote_ident(&column.target), column.datatype.sql_type())),
    );
    format!(
        "CREATE TABLE {} ({})",
        quote_ident(target),
        columns.join(", ")
    )
}

/// Parameterized multi-row insert into the staging table.
pub fn staging_insert_statement(target: &str, mapping: &Mapping, row_count: usize) -> String {
    let column_list = mapping
        .columns
        .iter()
        .map(|column| quote_ident(&column.target))
        .join(", ");
    let width = mapping.columns.len();
    let rows = (0..row_count)
        .map(|row| {
            let placeholders = (0..width)
                .map(|col| format!("${}", row * width + col + 1))
                .join(", ");
            format!("({placeholders})")
        })
        .join(", ");
    format!(
        "INSERT INTO {} ({column_list}) VALUES {rows}",
        quote_ident(&staging_table_name(target))
    )
}

/// NULL-token guard over the raw staged text. The comparison is exact-string
/// and happens before any cast, so a token that is also a valid literal of
/// the target type still becomes NULL.
pub fn null_guard(column: &str, null_tokens: &[String]) -> String {
    let ident = quote_ident(column);
    match null_tokens {
        [] => ident,
        [token] => format!("NULLIF({ident}, {})", quote_literal(token)),
        tokens => {
            let list = tokens.iter().map(|token| quote_literal(token)).join(", ");
            format!("CASE WHEN {ident} IN ({list}) THEN NULL ELSE {ident} END")
        }
    }
}

pub fn cast_expression(column: &ColumnMapping, null_tokens: &[String]) -> String {
    format!(
        "CAST({} AS {})",
        null_guard(&column.target, null_tokens),
        column.datatype.sql_type()
    )
}

/// The single insert-from-select performing the typed reload. `ORDER BY
/// ctid` reproduces insertion order on a heap written once inside the same
/// transaction.
pub fn typed_reload_statement(
    target: &str,
    retained: &[&ColumnMapping],
    null_tokens: &[String],
) -> String {
    let column_list = retained
        .iter()
        .map(|column| quote_ident(&column.target))
        .join(", ");
    let select_list = retained
        .iter()
        .map(|column| cast_expression(column, null_tokens))
        .join(", ");
    format!(
        "INSERT INTO {} ({column_list}) SELECT {select_list} FROM {} ORDER BY ctid",
        quote_ident(target),
        quote_ident(&staging_table_name(target))
    )
}
