//! Format detection and normalization of uploaded transcript batches.
//!
//! Raw bytes are parsed into loosely-typed rows (CSV with header
//! normalization, or a JSON array/object), the batch schema is detected
//! from the first row's key set, alternative-format rows are remapped
//! into the standard field names, and every row then passes through the
//! same validation to become a [`ChatRecord`].

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::{ChatRecord, Role};

/// A parsed-but-unvalidated row: normalized keys to arbitrary scalars.
pub type RawRow = Map<String, Value>;

/// Accepted upload formats, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    /// Detect the format from a filename. Only `.csv` and `.json` are
    /// accepted.
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".csv") {
            Some(FileFormat::Csv)
        } else if lower.ends_with(".json") {
            Some(FileFormat::Json)
        } else {
            None
        }
    }
}

/// Which known input schema a batch matches. Detected once per batch
/// from the first row, so a batch must be homogeneous in schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSchema {
    /// Already uses the canonical field names.
    Standard,
    /// `Content`/`MessageType`/`TimeSent`/`ConversationId` export shape.
    Alternative,
}

/// Fields every row must carry after remapping.
pub const REQUIRED_FIELDS: &[&str] =
    &["conversation_id", "tenant_id", "timestamp", "role", "message"];

const ALTERNATIVE_KEYS: &[&str] = &["content", "messagetype", "timesent", "conversationid"];

/// Output of [`normalize`]: accepted records plus full row-level
/// diagnostics, so callers can surface partial-failure warnings.
#[derive(Debug, Default)]
pub struct Normalized {
    pub records: Vec<ChatRecord>,
    pub errors: Vec<String>,
    /// Alternative-format rows excluded by message-type code.
    pub skipped_rows: usize,
}

/// Normalize a header or JSON key: lowercase, trim, whitespace runs to
/// a single underscore.
pub fn normalize_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Parse raw upload bytes into rows. Malformed CSV/JSON syntax is a
/// batch-level failure; no partial ingestion happens.
pub fn parse_rows(format: FileFormat, bytes: &[u8]) -> Result<Vec<RawRow>> {
    match format {
        FileFormat::Csv => parse_csv(bytes),
        FileFormat::Json => parse_json(bytes),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(normalize_key)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        // skipEmptyLines: a row with no non-empty field is dropped.
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let mut row = RawRow::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or_default();
            row.insert(header.clone(), Value::String(value.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_json(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(format!("invalid JSON: {e}")))?;

    // Support both an array of records and a single record object.
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(obj) = item else {
            return Err(Error::Parse(
                "expected a JSON object or array of objects".to_string(),
            ));
        };
        let mut row = RawRow::new();
        for (key, val) in obj {
            row.insert(normalize_key(&key), val);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Classify a batch by inspecting the first row's key set.
pub fn detect_schema(rows: &[RawRow]) -> BatchSchema {
    let Some(first) = rows.first() else {
        return BatchSchema::Standard;
    };
    let is_alternative = ALTERNATIVE_KEYS.iter().all(|key| first.contains_key(*key));
    if is_alternative {
        BatchSchema::Alternative
    } else {
        BatchSchema::Standard
    }
}

/// Parse a timestamp from ISO-8601 or any other recognized datetime
/// form. Naive datetimes are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    dateparser::parse_with_timezone(raw, &Utc).ok()
}

/// Remap one alternative-format row into the standard field names.
/// Returns `None` for rows whose message-type code is not a kept
/// ai/tenant turn (system codes and anything unparseable).
fn transform_alternative(row: &RawRow) -> Option<RawRow> {
    let role = match message_type(row)? {
        1 => "ai",
        3 => "tenant",
        _ => return None,
    };

    let mut out = RawRow::new();
    out.insert("role".to_string(), Value::String(role.to_string()));

    // This export carries no independent tenant identifier, so the
    // conversation id doubles as the tenant id.
    if let Some(conversation_id) = scalar_to_string(row.get("conversationid")) {
        out.insert(
            "conversation_id".to_string(),
            Value::String(conversation_id.clone()),
        );
        out.insert("tenant_id".to_string(), Value::String(conversation_id));
    }

    // Re-serialize parseable timestamps to RFC 3339; otherwise pass the
    // original through and let validation decide.
    if let Some(time_sent) = scalar_to_string(row.get("timesent")) {
        let normalized = parse_timestamp(&time_sent)
            .map_or(time_sent, |dt| dt.to_rfc3339());
        out.insert("timestamp".to_string(), Value::String(normalized));
    }

    let message = scalar_to_string(row.get("content")).unwrap_or_default();
    out.insert("message".to_string(), Value::String(message));

    Some(out)
}

fn message_type(row: &RawRow) -> Option<i64> {
    match row.get("messagetype")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Normalize a parsed batch into canonical records.
///
/// Row-level validation failures never raise; they are collected and
/// returned alongside the accepted records. The batch as a whole fails
/// only when it is empty, or when every row was rejected.
pub fn normalize(rows: Vec<RawRow>) -> Result<Normalized> {
    if rows.is_empty() {
        return Err(Error::Validation("no records found in file".to_string()));
    }

    let schema = detect_schema(&rows);
    tracing::debug!(?schema, rows = rows.len(), "normalizing batch");

    let mut skipped_rows = 0usize;
    let candidates: Vec<RawRow> = match schema {
        BatchSchema::Standard => rows,
        BatchSchema::Alternative => rows
            .iter()
            .filter_map(|row| {
                let transformed = transform_alternative(row);
                if transformed.is_none() {
                    skipped_rows += 1;
                }
                transformed
            })
            .collect(),
    };

    if candidates.is_empty() {
        return Err(Error::Validation(format!(
            "no records remained after filtering ({skipped_rows} rows dropped by message type)"
        )));
    }

    let mut records = Vec::with_capacity(candidates.len());
    let mut errors = Vec::new();
    for (i, row) in candidates.iter().enumerate() {
        match validate_row(row) {
            Ok(record) => records.push(record),
            Err(reason) => errors.push(format!("Record {}: {reason}", i + 1)),
        }
    }

    if records.is_empty() && !errors.is_empty() {
        return Err(Error::Validation(summarize_errors(&errors)));
    }

    if !errors.is_empty() {
        tracing::warn!(
            rejected = errors.len(),
            accepted = records.len(),
            "batch accepted with row-level rejections"
        );
    }

    Ok(Normalized {
        records,
        errors,
        skipped_rows,
    })
}

/// Collapse row errors into a single batch failure message: the first
/// five verbatim plus a count of the rest.
pub fn summarize_errors(errors: &[String]) -> String {
    let mut message = errors
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if errors.len() > 5 {
        message.push_str(&format!("\n... and {} more errors", errors.len() - 5));
    }
    message
}

fn validate_row(row: &RawRow) -> std::result::Result<ChatRecord, String> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| field_is_blank(row.get(*field)))
        .collect();
    if !missing.is_empty() {
        return Err(format!("Missing required fields: {}", missing.join(", ")));
    }

    // The required-field check above guarantees these are present.
    let conversation_id = scalar_to_string(row.get("conversation_id")).unwrap_or_default();
    let tenant_id = scalar_to_string(row.get("tenant_id")).unwrap_or_default();
    let message = scalar_to_string(row.get("message")).unwrap_or_default();

    let raw_role = scalar_to_string(row.get("role")).unwrap_or_default();
    let role = Role::from_str(&raw_role)
        .map_err(|_| format!("Invalid role \"{raw_role}\". Must be \"ai\" or \"tenant\""))?;

    let raw_timestamp = scalar_to_string(row.get("timestamp")).unwrap_or_default();
    let timestamp = parse_timestamp(&raw_timestamp)
        .ok_or_else(|| format!("Unparseable timestamp \"{raw_timestamp}\""))?;

    let response_time_ms =
        parse_optional_f64(row.get("response_time_ms")).filter(|v| *v >= 0.0);
    let satisfaction_score = parse_optional_f64(row.get("satisfaction_score"));
    let resolved = parse_resolved(row.get("resolved"));

    Ok(ChatRecord {
        conversation_id,
        tenant_id,
        timestamp,
        role,
        message,
        response_time_ms,
        resolved,
        satisfaction_score,
        client_id: None,
    })
}

/// True when a required field is absent, null, or blank.
fn field_is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Coerce whatever scalar was supplied into a string.
fn scalar_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lenient float parse: absent, empty, or unparseable inputs yield an
/// absent value, never zero and never an error.
fn parse_optional_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

/// Tri-state resolved parse. Native booleans pass through; strings are
/// matched positive-only against true/1/yes, so any other non-empty
/// string yields false. Everything else is "unknown".
pub fn parse_resolved(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lower = trimmed.to_lowercase();
            Some(lower == "true" || lower == "1" || lower == "yes")
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
