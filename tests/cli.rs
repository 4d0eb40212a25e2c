use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use csv_ingest::schema::{CatalogType, Mapping};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn probe_writes_an_editable_mapping_file() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("people.csv");
    let mapping_path = dir.path().join("people-mapping.yml");
    fs::write(&input, "name;age\nAlice;?\nBob;41\n").expect("write input");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "-o",
            mapping_path.to_str().unwrap(),
            "--delimiter",
            ";",
            "--null-token",
            "?",
        ])
        .assert()
        .success();

    let mapping = Mapping::load(&mapping_path).expect("load inferred mapping");
    assert_eq!(mapping.columns.len(), 2);
    assert_eq!(mapping.columns[0].target, "name");
    assert_eq!(mapping.columns[0].datatype, CatalogType::Varchar);
    assert_eq!(mapping.columns[1].target, "age");
    assert_eq!(mapping.columns[1].datatype, CatalogType::Integer);
}

#[test]
fn probe_names_headerless_columns_positionally() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("plain.csv");
    let mapping_path = dir.path().join("plain-mapping.yml");
    fs::write(&input, "1,Alice\n2,Bob\n").expect("write input");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "-o",
            mapping_path.to_str().unwrap(),
            "--no-header",
        ])
        .assert()
        .success();

    let mapping = Mapping::load(&mapping_path).expect("load inferred mapping");
    assert!(!mapping.has_headers);
    assert_eq!(mapping.columns[0].source, "col_1");
    assert_eq!(mapping.columns[1].source, "col_2");
}

#[test]
fn import_rejects_unsafe_table_names_before_touching_the_database() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("people.csv");
    fs::write(&input, "name,age\nAlice,30\n").expect("write input");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-t",
            "users; drop table users",
            "--dbname",
            "warehouse",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("identifier-safe"));
}

#[test]
fn import_rejects_duplicate_target_names_from_a_mapping_file() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("people.csv");
    let mapping_path = dir.path().join("dup-mapping.yml");
    fs::write(&input, "a,b\n1,2\n").expect("write input");
    fs::write(
        &mapping_path,
        "columns:\n- source: a\n  target: same\n  datatype: integer\n- source: b\n  target: same\n  datatype: integer\nhas_headers: true\n",
    )
    .expect("write mapping");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-m",
            mapping_path.to_str().unwrap(),
            "-t",
            "people",
            "--dbname",
            "warehouse",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate target column name"));
}

#[test]
fn import_rejects_width_mismatch_between_mapping_and_input() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("people.csv");
    let mapping_path = dir.path().join("narrow-mapping.yml");
    fs::write(&input, "a,b\n1,2\n").expect("write input");
    fs::write(
        &mapping_path,
        "columns:\n- source: a\n  target: a\n  datatype: integer\nhas_headers: true\n",
    )
    .expect("write mapping");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-m",
            mapping_path.to_str().unwrap(),
            "-t",
            "people",
            "--dbname",
            "warehouse",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Mapping defines 1 column(s)"));
}

#[test]
fn repair_missing_rejects_an_all_skip_spec_before_connecting() {
    let dir = tempdir().expect("temp dir");
    let spec = dir.path().join("missing.yml");
    fs::write(&spec, "actions:\n  age:\n    method: skip\n").expect("write spec");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "repair",
            "missing",
            "--spec",
            spec.to_str().unwrap(),
            "-t",
            "people",
            "--dbname",
            "warehouse",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no active per-column rules"));
}

#[test]
fn repair_rules_rejects_unnamed_rules_before_connecting() {
    let dir = tempdir().expect("temp dir");
    let rules = dir.path().join("rules.yml");
    fs::write(
        &rules,
        "rules:\n- name: ''\n  expr: amount < 0\n  action: delete\n",
    )
    .expect("write rules");

    cargo_bin_cmd!("csv-ingest")
        .args([
            "repair",
            "rules",
            "--rules",
            rules.to_str().unwrap(),
            "-t",
            "people",
            "--dbname",
            "warehouse",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has no name"));
}

#[test]
fn repair_timeseries_validates_window_size_locally() {
    cargo_bin_cmd!("csv-ingest")
        .args([
            "repair",
            "timeseries",
            "--time-column",
            "ts",
            "--window",
            "1",
            "-t",
            "readings",
            "--dbname",
            "warehouse",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("window size must be at least 2"));
}
