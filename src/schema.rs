//! Column mapping model, target-type catalog, and type inference.
//!
//! This module owns the [`CatalogType`] enum (the nine supported storage
//! types), the [`ColumnMapping`] record (source name, sanitized target name,
//! target type), the [`Mapping`] document with YAML persistence, and the
//! sampling-based inference engine that suggests a catalog type per column.
//!
//! ## Responsibilities
//!
//! - Identifier sanitization (non-alphanumeric → `_`, case-folded)
//! - Reserved primary-key collision detection (`id`)
//! - Mapping validation: unique targets, identifier-safe table names
//! - Advisory type inference with configurable sample depth
//! - YAML mapping loading and saving via `serde_yaml`

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Column name reserved for the system-assigned primary key of every final
/// table. A source column sanitizing to this name is dropped, not renamed.
pub const RESERVED_PRIMARY_KEY: &str = "id";

const BOOLEAN_TOKENS: &[&str] = &["true", "false", "t", "f", "yes", "no", "y", "n"];

/// Fixed catalog of target storage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogType {
    Integer,
    Numeric,
    Float,
    Varchar,
    Text,
    Datetime,
    Date,
    Time,
    Boolean,
}

impl CatalogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogType::Integer => "integer",
            CatalogType::Numeric => "numeric",
            CatalogType::Float => "float",
            CatalogType::Varchar => "varchar",
            CatalogType::Text => "text",
            CatalogType::Datetime => "datetime",
            CatalogType::Date => "date",
            CatalogType::Time => "time",
            CatalogType::Boolean => "boolean",
        }
    }

    /// The PostgreSQL type each catalog entry maps to.
    pub fn sql_type(&self) -> &'static str {
        match self {
            CatalogType::Integer => "INTEGER",
            CatalogType::Numeric => "NUMERIC(18, 2)",
            CatalogType::Float => "DOUBLE PRECISION",
            CatalogType::Varchar => "VARCHAR(255)",
            CatalogType::Text => "TEXT",
            CatalogType::Datetime => "TIMESTAMP",
            CatalogType::Date => "DATE",
            CatalogType::Time => "TIME",
            CatalogType::Boolean => "BOOLEAN",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "integer", "numeric", "float", "varchar", "text", "datetime", "date", "time",
            "boolean",
        ]
    }
}

impl fmt::Display for CatalogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CatalogType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => Ok(CatalogType::Integer),
            "numeric" | "decimal" => Ok(CatalogType::Numeric),
            "float" | "double" => Ok(CatalogType::Float),
            "varchar" | "string" => Ok(CatalogType::Varchar),
            "text" => Ok(CatalogType::Text),
            "datetime" | "timestamp" => Ok(CatalogType::Datetime),
            "date" => Ok(CatalogType::Date),
            "time" => Ok(CatalogType::Time),
            "boolean" | "bool" => Ok(CatalogType::Boolean),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                CatalogType::variants().join(", ")
            )),
        }
    }
}

/// One source column's destination: target name and storage type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
    pub datatype: CatalogType,
}

/// Ordered mapping set for one import run, persisted as an editable YAML
/// document between `probe` and `import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub columns: Vec<ColumnMapping>,
    #[serde(default = "Mapping::default_has_headers")]
    pub has_headers: bool,
}

impl Mapping {
    pub const fn default_has_headers() -> bool {
        true
    }

    /// Builds a mapping from raw header names with sanitized targets and the
    /// fallback type for every column.
    pub fn from_headers(headers: &[String], has_headers: bool) -> Self {
        let columns = headers
            .iter()
            .map(|name| ColumnMapping {
                source: name.clone(),
                target: sanitize_identifier(name),
                datatype: CatalogType::Varchar,
            })
            .collect();
        Mapping {
            columns,
            has_headers,
        }
    }

    /// Mappings that survive into the final table: a target colliding with
    /// the reserved primary-key name is excluded (with a warning), never
    /// renamed.
    pub fn retained_columns(&self) -> Vec<&ColumnMapping> {
        self.columns
            .iter()
            .filter(|column| {
                if column.target == RESERVED_PRIMARY_KEY {
                    warn!(
                        "Source column '{}' maps to reserved primary-key name '{}'; dropping it from the final schema",
                        column.source, RESERVED_PRIMARY_KEY
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Rejects duplicate or empty sanitized target names before any
    /// transactional work begins.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.columns.is_empty() {
            return Err(IngestError::config("Mapping contains no columns"));
        }
        let mut seen = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            if column.target.is_empty() {
                return Err(IngestError::config(format!(
                    "Source column '{}' sanitizes to an empty target name",
                    column.source
                )));
            }
            if !is_safe_identifier(&column.target) {
                return Err(IngestError::config(format!(
                    "Target name '{}' is not identifier-safe",
                    column.target
                )));
            }
            if seen.contains(&column.target.as_str()) {
                return Err(IngestError::config(format!(
                    "Duplicate target column name '{}'",
                    column.target
                )));
            }
            seen.push(column.target.as_str());
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating mapping file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing mapping YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening mapping file {path:?}"))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).context("Parsing mapping YAML")
    }
}

/// Sanitizes a source column name into an identifier-safe target: every
/// non-alphanumeric character becomes `_`, the rest is ASCII-lowercased.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn is_safe_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let pattern = IDENT.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
    pattern.is_match(name)
}

/// Generated name for column `index` (0-based) of a headerless file.
pub fn positional_column_name(index: usize) -> String {
    format!("col_{}", index + 1)
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Per-column accumulator behind [`infer_column_types`]. Values equal to a
/// configured NULL token, and empty values, never reach it.
#[derive(Debug, Clone, Default)]
pub struct TypeObservations {
    non_empty: usize,
    datetime_matches: usize,
    integer_matches: usize,
    float_matches: usize,
    boolean_matches: usize,
}

impl TypeObservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        self.non_empty += 1;

        if parse_naive_datetime(trimmed).is_ok() || parse_naive_date(trimmed).is_ok() {
            self.datetime_matches += 1;
        }
        if trimmed.parse::<i64>().is_ok() {
            self.integer_matches += 1;
        }
        if trimmed.parse::<f64>().is_ok() {
            self.float_matches += 1;
        }
        if BOOLEAN_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            self.boolean_matches += 1;
        }
    }

    /// Priority order: date-time, integer, numeric, boolean, short text.
    /// Mixed or unrecognized columns always fall through to short text.
    pub fn decide(&self) -> CatalogType {
        if self.non_empty == 0 {
            return CatalogType::Varchar;
        }
        if self.datetime_matches == self.non_empty {
            CatalogType::Datetime
        } else if self.integer_matches == self.non_empty {
            CatalogType::Integer
        } else if self.float_matches == self.non_empty {
            CatalogType::Numeric
        } else if self.boolean_matches == self.non_empty {
            CatalogType::Boolean
        } else {
            CatalogType::Varchar
        }
    }
}

/// Advisory inference over already-parsed rows: one suggestion per column,
/// in column order. `sample_rows` of 0 means scan everything.
pub fn infer_column_types(
    rows: &[Vec<String>],
    column_count: usize,
    null_tokens: &[String],
    sample_rows: usize,
) -> Vec<CatalogType> {
    let mut observations = vec![TypeObservations::new(); column_count];
    let limit = if sample_rows == 0 {
        rows.len()
    } else {
        sample_rows.min(rows.len())
    };
    for row in &rows[..limit] {
        for (index, value) in row.iter().enumerate().take(column_count) {
            if null_tokens.iter().any(|token| token == value) {
                continue;
            }
            observations[index].record(value);
        }
    }
    observations.iter().map(TypeObservations::decide).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_non_alphanumeric_and_lowercases() {
        assert_eq!(sanitize_identifier("Order ID"), "order_id");
        assert_eq!(sanitize_identifier("$Percent%"), "_percent_");
        assert_eq!(sanitize_identifier("Größe"), "gr__e");
    }

    #[test]
    fn catalog_type_tokens_accept_common_aliases() {
        assert_eq!("int".parse::<CatalogType>().unwrap(), CatalogType::Integer);
        assert_eq!(
            "Timestamp".parse::<CatalogType>().unwrap(),
            CatalogType::Datetime
        );
        assert_eq!(
            "string".parse::<CatalogType>().unwrap(),
            CatalogType::Varchar
        );
        assert!("blob".parse::<CatalogType>().is_err());
    }

    #[test]
    fn decide_prefers_datetime_over_numeric() {
        let mut obs = TypeObservations::new();
        obs.record("2024-05-06 14:30:00");
        obs.record("2024-05-07 09:00:00");
        assert_eq!(obs.decide(), CatalogType::Datetime);
    }

    #[test]
    fn decide_distinguishes_integer_and_numeric() {
        let mut ints = TypeObservations::new();
        ints.record("12");
        ints.record("-4");
        assert_eq!(ints.decide(), CatalogType::Integer);

        let mut floats = TypeObservations::new();
        floats.record("12.5");
        floats.record("-4");
        assert_eq!(floats.decide(), CatalogType::Numeric);
    }

    #[test]
    fn decide_falls_back_to_varchar_for_mixed_columns() {
        let mut obs = TypeObservations::new();
        obs.record("12");
        obs.record("hello");
        assert_eq!(obs.decide(), CatalogType::Varchar);
        assert_eq!(TypeObservations::new().decide(), CatalogType::Varchar);
    }

    #[test]
    fn boolean_tokens_are_case_folded() {
        let mut obs = TypeObservations::new();
        obs.record("Yes");
        obs.record("n");
        obs.record("TRUE");
        assert_eq!(obs.decide(), CatalogType::Boolean);
    }

    #[test]
    fn null_tokens_are_excluded_from_sampling() {
        let rows = vec![
            vec!["1".to_string(), "?".to_string()],
            vec!["2".to_string(), "3".to_string()],
        ];
        let types = infer_column_types(&rows, 2, &["?".to_string()], 0);
        assert_eq!(types, vec![CatalogType::Integer, CatalogType::Integer]);
    }

    #[test]
    fn validate_rejects_duplicate_targets() {
        let mapping = Mapping {
            columns: vec![
                ColumnMapping {
                    source: "Name".into(),
                    target: "name".into(),
                    datatype: CatalogType::Varchar,
                },
                ColumnMapping {
                    source: "name ".into(),
                    target: "name".into(),
                    datatype: CatalogType::Varchar,
                },
            ],
            has_headers: true,
        };
        let err = mapping.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate target column name"));
    }

    #[test]
    fn retained_columns_drop_reserved_primary_key() {
        let mapping = Mapping {
            columns: vec![
                ColumnMapping {
                    source: "ID".into(),
                    target: "id".into(),
                    datatype: CatalogType::Integer,
                },
                ColumnMapping {
                    source: "name".into(),
                    target: "name".into(),
                    datatype: CatalogType::Varchar,
                },
            ],
            has_headers: true,
        };
        let retained = mapping.retained_columns();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].target, "name");
    }
}
