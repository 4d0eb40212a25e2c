//! Best-effort normalization of repair procedure results.
//!
//! The procedures return loosely structured JSON (or nothing at all); this
//! interpreter never fails and always yields a usable summary.

use log::warn;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Completed,
    /// The procedure returned no result payload; counts default to zero.
    NoResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditSummary {
    pub audit_id: Option<String>,
    pub kind: String,
    pub mode: String,
    pub dry_run: bool,
    pub affected: i64,
    pub status: AuditStatus,
}

impl AuditSummary {
    pub fn describe(&self) -> String {
        let id = self.audit_id.as_deref().unwrap_or("-");
        format!(
            "audit {id} [{}/{}] dry_run={} affected={}",
            self.kind, self.mode, self.dry_run, self.affected
        )
    }
}

/// Normalizes a raw procedure result. Missing fields default (`kind` →
/// "unknown", `mode` → "process", `dry_run` → false); the affected count is
/// first-present-wins across `groups_processed` then `rows_affected`, never
/// summed.
pub fn interpret(result: Option<&Value>) -> AuditSummary {
    let Some(value) = result else {
        warn!("Repair procedure returned no result payload; reporting zero affected rows");
        return AuditSummary {
            audit_id: None,
            kind: "unknown".to_string(),
            mode: "process".to_string(),
            dry_run: false,
            affected: 0,
            status: AuditStatus::NoResult,
        };
    };

    let audit_id = match value.get("audit_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let mode = value
        .get("mode")
        .and_then(Value::as_str)
        .unwrap_or("process")
        .to_string();
    let dry_run = value
        .get("dry_run")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let affected = value
        .get("groups_processed")
        .and_then(Value::as_i64)
        .or_else(|| value.get("rows_affected").and_then(Value::as_i64))
        .unwrap_or(0);

    AuditSummary {
        audit_id,
        kind,
        mode,
        dry_run,
        affected,
        status: AuditStatus::Completed,
    }
}
