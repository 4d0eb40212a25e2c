use std::io::Write;

use csv_ingest::{
    import,
    io_utils::CsvReadOptions,
    schema::{self, CatalogType},
};
use encoding_rs::UTF_8;
use tempfile::NamedTempFile;

fn read(file: &NamedTempFile, options: &CsvReadOptions) -> (Vec<String>, Vec<Vec<String>>) {
    import::read_source(file.path(), options, UTF_8).expect("read source")
}

#[test]
fn inference_follows_priority_order() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "seen,count,price,active,note").unwrap();
    writeln!(file, "2024-01-01 08:30:00,1,19.90,yes,first").unwrap();
    writeln!(file, "2024-01-02 09:45:00,2,7.50,no,second").unwrap();

    let (headers, rows) = read(&file, &CsvReadOptions::default());
    let types = schema::infer_column_types(&rows, headers.len(), &[], 0);
    assert_eq!(
        types,
        vec![
            CatalogType::Datetime,
            CatalogType::Integer,
            CatalogType::Numeric,
            CatalogType::Boolean,
            CatalogType::Varchar,
        ]
    );
}

#[test]
fn mixed_columns_fall_back_to_short_text() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "value").unwrap();
    writeln!(file, "12").unwrap();
    writeln!(file, "twelve").unwrap();

    let (headers, rows) = read(&file, &CsvReadOptions::default());
    let types = schema::infer_column_types(&rows, headers.len(), &[], 0);
    assert_eq!(types, vec![CatalogType::Varchar]);
}

#[test]
fn null_tokens_do_not_poison_inference() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "age").unwrap();
    writeln!(file, "34").unwrap();
    writeln!(file, "?").unwrap();
    writeln!(file, "27").unwrap();

    let (headers, rows) = read(&file, &CsvReadOptions::default());
    let with_token = schema::infer_column_types(&rows, headers.len(), &["?".to_string()], 0);
    assert_eq!(with_token, vec![CatalogType::Integer]);

    let without_token = schema::infer_column_types(&rows, headers.len(), &[], 0);
    assert_eq!(without_token, vec![CatalogType::Varchar]);
}

#[test]
fn sampling_depth_limits_what_inference_sees() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "value").unwrap();
    writeln!(file, "1").unwrap();
    writeln!(file, "oops").unwrap();

    let (headers, rows) = read(&file, &CsvReadOptions::default());
    let sampled = schema::infer_column_types(&rows, headers.len(), &[], 1);
    assert_eq!(sampled, vec![CatalogType::Integer]);
    let full = schema::infer_column_types(&rows, headers.len(), &[], 0);
    assert_eq!(full, vec![CatalogType::Varchar]);
}

#[test]
fn headerless_sources_get_positional_names() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "1;Alice").unwrap();
    writeln!(file, "2;Bob").unwrap();

    let options = CsvReadOptions {
        delimiter: b';',
        has_headers: false,
        ..CsvReadOptions::default()
    };
    let (headers, rows) = read(&file, &options);
    assert_eq!(headers, vec!["col_1".to_string(), "col_2".to_string()]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec!["1".to_string(), "Alice".to_string()]);
}

#[test]
fn empty_headerless_input_is_a_parse_error() {
    let file = NamedTempFile::new().expect("temp file");
    let options = CsvReadOptions {
        has_headers: false,
        ..CsvReadOptions::default()
    };
    let err = import::read_source(file.path(), &options, UTF_8).unwrap_err();
    assert!(err.to_string().contains("empty headerless input"));
}

#[test]
fn bom_prefixed_headers_are_cleaned() {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all("\u{feff}name,age\nAlice,30\n".as_bytes())
        .unwrap();

    let (headers, _) = read(&file, &CsvReadOptions::default());
    assert_eq!(headers, vec!["name".to_string(), "age".to_string()]);
}
