//! Anomaly-repair operation model and dispatch.
//!
//! Five operation kinds, each bound to one database-side procedure and each
//! carrying its own strongly-typed parameter record. The dispatcher
//! normalizes a request into exactly one procedure call: it never retries,
//! never reorders caller-supplied column or rule lists, and always forwards
//! the dry-run flag verbatim.
//!
//! Procedure contract: `SELECT <schema>.<proc>(target_schema, table,
//! target_columns, key_columns, action, params, dry_run)` returning a JSON
//! object or NULL, which the audit interpreter normalizes.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use clap::ValueEnum;
use indexmap::IndexMap;
use log::{info, warn};
use postgres::Client;
use postgres::types::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    audit::{self, AuditSummary},
    db,
    error::IngestError,
    sql,
};

/// Schema the five repair procedures live in, unless overridden.
pub const DEFAULT_PROCEDURE_SCHEMA: &str = "anomaly";

/// Per-column repair rule for missing values. `skip` rows are collected by
/// the presentation layer but never serialized into the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MissingRule {
    Skip,
    DeleteRow,
    SetConstant { value: String },
    SetMode,
    SetMean,
    ForwardFill { order_by: String },
    BackwardFill { order_by: String },
    CopyFromOtherColumn { source_column: String },
}

impl MissingRule {
    pub fn is_skip(&self) -> bool {
        matches!(self, MissingRule::Skip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum KeepPolicy {
    First,
    Last,
}

impl KeepPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeepPolicy::First => "first",
            KeepPolicy::Last => "last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum OutlierMethod {
    Iqr,
    Zscore,
    Mad,
}

impl OutlierMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlierMethod::Iqr => "iqr",
            OutlierMethod::Zscore => "zscore",
            OutlierMethod::Mad => "mad",
        }
    }

    /// Conventional sensitivity default per detection method.
    pub fn default_threshold(&self) -> f64 {
        match self {
            OutlierMethod::Iqr => 1.5,
            OutlierMethod::Zscore => 3.0,
            OutlierMethod::Mad => 3.5,
        }
    }

    /// The iqr method names its sensitivity `k`; the score-based methods
    /// call it `threshold`.
    pub fn threshold_key(&self) -> &'static str {
        match self {
            OutlierMethod::Iqr => "k",
            OutlierMethod::Zscore | OutlierMethod::Mad => "threshold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum OutlierAction {
    Flag,
    Nullify,
    ReplaceWithMedian,
    ReplaceWithMean,
    Cap,
    Delete,
}

impl OutlierAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlierAction::Flag => "flag",
            OutlierAction::Nullify => "nullify",
            OutlierAction::ReplaceWithMedian => "replace_with_median",
            OutlierAction::ReplaceWithMean => "replace_with_mean",
            OutlierAction::Cap => "cap",
            OutlierAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RuleAction {
    Report,
    SetNull,
    SetValue,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TimeseriesAction {
    ReplaceWithRollingMean,
    Nullify,
    Delete,
}

impl TimeseriesAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeseriesAction::ReplaceWithRollingMean => "replace_with_rolling_mean",
            TimeseriesAction::Nullify => "nullify",
            TimeseriesAction::Delete => "delete",
        }
    }
}

/// One rule of a rule-based cleanup batch. `params` holds the operator's
/// raw JSON parameter text; it is parsed leniently at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupRule {
    pub name: String,
    pub expr: String,
    pub action: RuleAction,
    #[serde(default)]
    pub params: Option<String>,
}

/// YAML document driving a missing-value repair: ordered column → rule map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingValueSpec {
    pub actions: IndexMap<String, MissingRule>,
}

impl MissingValueSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Opening missing-value spec {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing missing-value spec YAML")
    }
}

/// YAML document driving a rule-based cleanup: ordered rule list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub rules: Vec<CleanupRule>,
}

impl RuleSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening rule spec {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing rule spec YAML")
    }
}

/// The five supported operation kinds with their kind-specific parameters.
#[derive(Debug, Clone)]
pub enum AnomalyOperation {
    MissingValues {
        actions: IndexMap<String, MissingRule>,
    },
    Duplicates {
        target_columns: Option<Vec<String>>,
        keep: KeepPolicy,
    },
    Outliers {
        target_column: String,
        method: OutlierMethod,
        threshold: f64,
        action: OutlierAction,
        flag_column: String,
    },
    Rules {
        rules: Vec<CleanupRule>,
    },
    Timeseries {
        time_column: String,
        target_columns: Option<Vec<String>>,
        window_size: u32,
        z_threshold: f64,
        action: TimeseriesAction,
    },
}

impl AnomalyOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            AnomalyOperation::MissingValues { .. } => "missing-values",
            AnomalyOperation::Duplicates { .. } => "duplicates",
            AnomalyOperation::Outliers { .. } => "outliers",
            AnomalyOperation::Rules { .. } => "rules",
            AnomalyOperation::Timeseries { .. } => "timeseries",
        }
    }

    pub fn procedure(&self) -> &'static str {
        match self {
            AnomalyOperation::MissingValues { .. } => "repair_missing_values",
            AnomalyOperation::Duplicates { .. } => "repair_duplicates",
            AnomalyOperation::Outliers { .. } => "repair_outliers",
            AnomalyOperation::Rules { .. } => "apply_cleanup_rules",
            AnomalyOperation::Timeseries { .. } => "repair_timeseries",
        }
    }
}

/// One repair invocation: operation, target, row-identification keys, and
/// the dry-run flag. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct AnomalyRequest {
    pub schema: String,
    pub table: String,
    pub key_columns: Vec<String>,
    pub operation: AnomalyOperation,
    pub dry_run: bool,
}

/// A fully normalized procedure invocation, ready to execute.
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    pub procedure_schema: String,
    pub procedure: String,
    pub target_schema: String,
    pub table: String,
    pub target_columns: Option<Vec<String>>,
    pub key_columns: Option<Vec<String>>,
    pub action: Option<String>,
    pub params: Value,
    pub dry_run: bool,
}

/// Normalizes a request into its procedure call. Required kind-specific
/// fields are validated here, before anything reaches the database.
pub fn build_call(
    request: &AnomalyRequest,
    procedure_schema: &str,
) -> Result<ProcedureCall, IngestError> {
    if request.table.trim().is_empty() {
        return Err(IngestError::config("Target table name is empty"));
    }

    let (target_columns, action, params) = match &request.operation {
        AnomalyOperation::MissingValues { actions } => {
            let active: IndexMap<&String, &MissingRule> = actions
                .iter()
                .filter(|(_, rule)| !rule.is_skip())
                .collect();
            if active.is_empty() {
                return Err(IngestError::config(
                    "Missing-value request has no active per-column rules",
                ));
            }
            let columns: Vec<String> = active.keys().map(|name| (*name).clone()).collect();
            let mut serialized = serde_json::Map::new();
            for (column, rule) in &active {
                let value = serde_json::to_value(rule).map_err(|err| {
                    IngestError::config(format!(
                        "Cannot serialize rule for column '{column}': {err}"
                    ))
                })?;
                serialized.insert((*column).clone(), value);
            }
            (
                Some(columns),
                None,
                json!({ "actions": Value::Object(serialized) }),
            )
        }
        AnomalyOperation::Duplicates {
            target_columns,
            keep,
        } => (
            target_columns.clone(),
            None,
            json!({ "keep": keep.as_str() }),
        ),
        AnomalyOperation::Outliers {
            target_column,
            method,
            threshold,
            action,
            flag_column,
        } => {
            if target_column.is_empty() {
                return Err(IngestError::config("Outlier request has no target column"));
            }
            if flag_column.is_empty() {
                return Err(IngestError::config("Outlier flag column name is empty"));
            }
            let mut params = json!({
                "method": method.as_str(),
                "flag_column": flag_column,
            });
            params[method.threshold_key()] = json!(threshold);
            (
                Some(vec![target_column.clone()]),
                Some(action.as_str().to_string()),
                params,
            )
        }
        AnomalyOperation::Rules { rules } => {
            if rules.is_empty() {
                return Err(IngestError::config("Rule-based request has no rules"));
            }
            if let Some(rule) = rules.iter().find(|rule| rule.name.trim().is_empty()) {
                return Err(IngestError::config(format!(
                    "Rule with expression '{}' has no name",
                    rule.expr
                )));
            }
            let payloads: Vec<Value> = rules.iter().map(rule_payload).collect();
            (None, None, json!({ "rules": payloads }))
        }
        AnomalyOperation::Timeseries {
            time_column,
            target_columns,
            window_size,
            z_threshold,
            action,
        } => {
            if time_column.is_empty() {
                return Err(IngestError::config(
                    "Time-series request has no time column",
                ));
            }
            if *window_size < 2 {
                return Err(IngestError::config(
                    "Time-series window size must be at least 2",
                ));
            }
            (
                target_columns.clone(),
                Some(action.as_str().to_string()),
                json!({
                    "time_column": time_column,
                    "window_size": window_size,
                    "z_threshold": z_threshold,
                }),
            )
        }
    };

    let key_columns = if request.key_columns.is_empty() {
        None
    } else {
        Some(request.key_columns.clone())
    };

    Ok(ProcedureCall {
        procedure_schema: procedure_schema.to_string(),
        procedure: request.operation.procedure().to_string(),
        target_schema: request.schema.clone(),
        table: request.table.clone(),
        target_columns,
        key_columns,
        action,
        params,
        dry_run: request.dry_run,
    })
}

/// Serializes one cleanup rule, shaping its raw parameter text per action.
/// Unparsable text degrades to an empty parameter object for that rule only.
fn rule_payload(rule: &CleanupRule) -> Value {
    let mut payload = json!({
        "name": rule.name,
        "expr": rule.expr,
        "action": rule.action,
    });
    let raw = rule.params.as_deref().unwrap_or("");
    match serde_json::from_str::<Value>(raw) {
        Ok(parsed) => match rule.action {
            RuleAction::SetValue => {
                payload["params"] = json!({ "set_value": parsed });
            }
            RuleAction::SetNull => {
                let columns = parsed
                    .get("target_columns")
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                payload["params"] = json!({ "target_columns": columns });
            }
            RuleAction::Report | RuleAction::Delete => {}
        },
        Err(err) => {
            warn!(
                "Rule '{}' has unparsable parameter text ({err}); falling back to an empty parameter object",
                rule.name
            );
            payload["params"] = json!({});
        }
    }
    payload
}

/// Executes a normalized call: exactly one procedure invocation, no
/// automatic retry. The structured result (or its absence) is normalized
/// into an [`AuditSummary`].
pub fn dispatch(client: &mut Client, call: &ProcedureCall) -> Result<AuditSummary, IngestError> {
    let statement = format!(
        "SELECT {}.{}($1, $2, $3, $4, $5, $6, $7)",
        sql::quote_ident(&call.procedure_schema),
        sql::quote_ident(&call.procedure)
    );
    info!(
        "Dispatching {} against {}.{} (dry_run={})",
        call.procedure, call.target_schema, call.table, call.dry_run
    );
    let row = client
        .query_one(
            &statement,
            &[
                &call.target_schema,
                &call.table,
                &call.target_columns,
                &call.key_columns,
                &call.action,
                &Json(call.params.clone()),
                &call.dry_run,
            ],
        )
        .map_err(|err| IngestError::Dispatch(db::describe_db_error(&err)))?;
    let result: Option<Json<Value>> = row.get(0);
    let value = result.map(|json| json.0);
    Ok(audit::interpret(value.as_ref()))
}

/// CLI entry point: shapes a request from the parsed subcommand, dispatches
/// it over a fresh connection, and reports the audit summary.
pub fn execute(command: &crate::cli::RepairCommand) -> anyhow::Result<()> {
    use crate::cli::RepairCommand;

    let (common, operation) = match command {
        RepairCommand::Missing(args) => {
            let spec = MissingValueSpec::load(&args.spec)?;
            (
                &args.common,
                AnomalyOperation::MissingValues {
                    actions: spec.actions,
                },
            )
        }
        RepairCommand::Duplicates(args) => (
            &args.common,
            AnomalyOperation::Duplicates {
                target_columns: columns_option(&args.columns),
                keep: args.keep,
            },
        ),
        RepairCommand::Outliers(args) => (
            &args.common,
            AnomalyOperation::Outliers {
                target_column: args.column.clone(),
                method: args.method,
                threshold: args
                    .threshold
                    .unwrap_or_else(|| args.method.default_threshold()),
                action: args.action,
                flag_column: args.flag_column.clone(),
            },
        ),
        RepairCommand::Rules(args) => {
            let spec = RuleSpec::load(&args.rules)?;
            (&args.common, AnomalyOperation::Rules { rules: spec.rules })
        }
        RepairCommand::Timeseries(args) => (
            &args.common,
            AnomalyOperation::Timeseries {
                time_column: args.time_column.clone(),
                target_columns: columns_option(&args.columns),
                window_size: args.window,
                z_threshold: args.z_threshold,
                action: args.action,
            },
        ),
    };

    let request = AnomalyRequest {
        schema: common.schema.clone(),
        table: common.table.clone(),
        key_columns: common.key_columns.clone(),
        operation,
        dry_run: common.dry_run,
    };
    info!(
        "Preparing {} repair for {}.{}",
        request.operation.kind(),
        request.schema,
        request.table
    );
    let call = build_call(&request, &common.procedure_schema)?;
    let mut client = common.connection.settings().connect()?;
    let summary = dispatch(&mut client, &call)?;
    info!("{}", summary.describe());
    Ok(())
}

fn columns_option(columns: &[String]) -> Option<Vec<String>> {
    let cleaned: Vec<String> = columns
        .iter()
        .map(|column| column.trim().to_string())
        .filter(|column| !column.is_empty())
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}
