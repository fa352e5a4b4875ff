//! Ingestion pipeline: one upload batch from raw bytes to persisted
//! records, conversations, and an audit entry.
//!
//! Processing is request-scoped: a batch is fully parsed, normalized,
//! grouped, and persisted before the next operation on the same data
//! begins. There is no cancellation; a started batch runs to completion
//! or fails into a terminal FAILED upload status. Prior batches are
//! never rolled back.

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate::group_conversations;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::ingest::{self, FileFormat};
use crate::models::{IngestReport, UploadRecord, UploadStatus};

/// Ingest one uploaded file for a client.
///
/// Transport-level problems (unknown extension, unknown client) are
/// rejected before any parsing and leave no audit entry. Everything
/// after that is tracked by an upload record that ends in SUCCESS or
/// FAILED exactly once.
pub async fn ingest_file(
    db: &Database,
    filename: &str,
    bytes: &[u8],
    client_id: Uuid,
) -> Result<IngestReport> {
    let format = FileFormat::from_filename(filename).ok_or_else(|| {
        Error::Validation("Invalid file type. Only CSV and JSON files are supported".to_string())
    })?;

    let client = db
        .get_client(client_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("client '{client_id}'")))?;

    tracing::info!(
        file = filename,
        size = bytes.len(),
        client = %client.name,
        "ingesting upload"
    );

    let upload = UploadRecord {
        id: Uuid::new_v4(),
        filename: filename.to_string(),
        file_size: bytes.len() as i64,
        records_count: 0,
        uploaded_at: Utc::now(),
        status: UploadStatus::Processing,
        error_message: None,
        client_id: client_id.to_string(),
    };
    db.insert_upload(&upload).await?;

    match run_batch(db, format, bytes, &upload.client_id).await {
        Ok(report) => {
            db.finish_upload(
                upload.id,
                UploadStatus::Success,
                None,
                report.records_count as i64,
            )
            .await?;
            tracing::info!(
                upload = %upload.id,
                records = report.records_count,
                conversations = report.conversations_count,
                "upload completed"
            );
            Ok(IngestReport {
                upload_id: upload.id,
                ..report
            })
        }
        Err(err) => {
            db.finish_upload(upload.id, UploadStatus::Failed, Some(&err.to_string()), 0)
                .await?;
            tracing::warn!(upload = %upload.id, error = %err, "upload failed");
            Err(err)
        }
    }
}

async fn run_batch(
    db: &Database,
    format: FileFormat,
    bytes: &[u8],
    client_id: &str,
) -> Result<IngestReport> {
    let rows = ingest::parse_rows(format, bytes)?;
    let mut normalized = ingest::normalize(rows)?;

    // Tag every accepted record with the upload's client.
    for record in &mut normalized.records {
        record.client_id = Some(client_id.to_string());
    }

    let conversations = group_conversations(&normalized.records, client_id);
    for conversation in &conversations {
        db.replace_conversation(conversation).await?;
    }
    db.append_messages(&normalized.records).await?;

    Ok(IngestReport {
        upload_id: Uuid::nil(),
        records_count: normalized.records.len(),
        conversations_count: conversations.len(),
        skipped_rows: normalized.skipped_rows,
        row_errors: normalized.errors,
    })
}
