//! Domain models for canonical chat records and derived entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// One message/turn of a conversation, normalized to the canonical
/// field set after format detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub conversation_id: String,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub message: String,
    pub response_time_ms: Option<f64>,
    pub resolved: Option<bool>,
    pub satisfaction_score: Option<f64>,
    pub client_id: Option<String>,
}

/// Who produced a message. Exactly two roles exist; anything else is
/// rejected at normalization time, never coerced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Ai,
    Tenant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Ai => write!(f, "ai"),
            Role::Tenant => write!(f, "tenant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ai" => Ok(Role::Ai),
            "tenant" => Ok(Role::Tenant),
            other => Err(Error::Parse(format!(
                "invalid role \"{other}\", must be \"ai\" or \"tenant\""
            ))),
        }
    }
}

/// Derived aggregate over all records sharing a conversation id.
///
/// Owned by the aggregator: each upload that touches a conversation id
/// recomputes and overwrites this wholesale from that upload's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub tenant_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub message_count: i64,
    pub resolved: bool,
    pub satisfaction_score: Option<f64>,
    /// Whole seconds between first and last message, zero for
    /// single-message conversations.
    pub duration: i64,
    pub client_id: String,
}

/// Lifecycle of an upload audit entry. Terminal once it leaves
/// `Processing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadStatus {
    Processing,
    Success,
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Processing => write!(f, "PROCESSING"),
            UploadStatus::Success => write!(f, "SUCCESS"),
            UploadStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(UploadStatus::Processing),
            "SUCCESS" => Ok(UploadStatus::Success),
            "FAILED" => Ok(UploadStatus::Failed),
            other => Err(Error::Parse(format!("unknown upload status \"{other}\""))),
        }
    }
}

/// Audit entry for one ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub records_count: i64,
    pub uploaded_at: DateTime<Utc>,
    pub status: UploadStatus,
    pub error_message: Option<String>,
    pub client_id: String,
}

/// A client/tenant scope that uploads are tagged with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Display color for the dashboard, assigned at creation when the
    /// caller does not provide one.
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Create a client with a fresh id, deriving a default color from
    /// the id when none is given.
    pub fn new(name: String, description: Option<String>, color: Option<String>) -> Self {
        let id = Uuid::new_v4();
        let color = color.or_else(|| Some(default_color(&id)));
        Self {
            id,
            name,
            description,
            color,
            created_at: Utc::now(),
        }
    }
}

fn default_color(id: &Uuid) -> String {
    let bytes = id.as_bytes();
    format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}

/// Result of one ingestion batch, returned by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub upload_id: Uuid,
    pub records_count: usize,
    pub conversations_count: usize,
    /// Alternative-format rows excluded by message-type code.
    pub skipped_rows: usize,
    /// Per-row validation errors for rows that were dropped while the
    /// batch still succeeded.
    pub row_errors: Vec<String>,
}

/// Store-wide counts, optionally scoped to one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub clients_count: i64,
    pub conversations_count: i64,
    pub messages_count: i64,
    pub uploads_count: i64,
    pub unique_tenants: i64,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
