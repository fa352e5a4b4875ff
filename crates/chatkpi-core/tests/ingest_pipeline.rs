//! End-to-end ingestion tests: raw upload bytes through to persisted
//! conversations, messages, and audit entries.

use chatkpi_core::Database;
use chatkpi_core::db::Scope;
use chatkpi_core::kpi;
use chatkpi_core::models::{Client, UploadStatus};
use chatkpi_core::service;
use uuid::Uuid;

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("chatkpi-test-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

async fn db_with_client() -> (Database, Client) {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let client = Client::new("Acme".to_string(), None, None);
    db.insert_client(&client).await.expect("insert client");
    (db, client)
}

const STANDARD_CSV: &str = "\
conversation_id,tenant_id,timestamp,role,message,response_time_ms,resolved,satisfaction_score
conv_001,tenant_42,2024-01-15T10:00:00Z,tenant,My login fails,,false,
conv_001,tenant_42,2024-01-15T10:01:03Z,ai,Try resetting your password,3000,true,4
conv_002,tenant_7,2024-01-15T11:00:00Z,tenant,Where is my invoice?,,,
";

#[tokio::test]
async fn csv_upload_lands_as_conversations_and_messages() {
    let (db, client) = db_with_client().await;

    let report = service::ingest_file(&db, "export.csv", STANDARD_CSV.as_bytes(), client.id)
        .await
        .expect("ingest");

    assert_eq!(report.records_count, 3);
    assert_eq!(report.conversations_count, 2);
    assert_eq!(report.skipped_rows, 0);
    assert!(report.row_errors.is_empty());

    let conv = db
        .get_conversation("conv_001")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(conv.message_count, 2);
    assert!(conv.resolved);
    assert_eq!(conv.satisfaction_score, Some(4.0));
    assert_eq!(conv.duration, 63);
    assert_eq!(conv.tenant_id, "tenant_42");
    assert_eq!(conv.client_id, client.id.to_string());

    let messages = db.list_messages(&Scope::default()).await.expect("list");
    assert_eq!(messages.len(), 3);

    let uploads = db.list_uploads(None).await.expect("list uploads");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].status, UploadStatus::Success);
    assert_eq!(uploads[0].records_count, 3);
    assert_eq!(uploads[0].id, report.upload_id);
}

#[tokio::test]
async fn reupload_replaces_the_conversation_wholesale() {
    let (db, client) = db_with_client().await;

    service::ingest_file(&db, "export.csv", STANDARD_CSV.as_bytes(), client.id)
        .await
        .expect("first ingest");

    // A later upload for the same conversation carries only one row;
    // the stored aggregate must reflect this batch alone.
    let second = "\
conversation_id,tenant_id,timestamp,role,message
conv_001,tenant_42,2024-02-01T09:00:00Z,tenant,Following up
";
    service::ingest_file(&db, "export2.csv", second.as_bytes(), client.id)
        .await
        .expect("second ingest");

    let conv = db
        .get_conversation("conv_001")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(conv.message_count, 1);
    assert!(!conv.resolved);
    assert_eq!(conv.duration, 0);

    // Messages are append-only across uploads.
    let scope = Scope::default();
    assert_eq!(db.count_messages(&scope).await.expect("count"), 4);
}

#[tokio::test]
async fn json_upload_is_accepted() {
    let (db, client) = db_with_client().await;

    let body = serde_json::json!([
        {
            "conversation_id": "conv_j1",
            "tenant_id": "tenant_1",
            "timestamp": "2024-01-15T10:00:00Z",
            "role": "tenant",
            "message": "hi",
            "resolved": "yes"
        }
    ]);
    let bytes = serde_json::to_vec(&body).expect("serialize");

    let report = service::ingest_file(&db, "records.json", &bytes, client.id)
        .await
        .expect("ingest");
    assert_eq!(report.records_count, 1);

    let conv = db
        .get_conversation("conv_j1")
        .await
        .expect("get")
        .expect("exists");
    assert!(conv.resolved);
}

#[tokio::test]
async fn alternative_export_is_remapped() {
    let (db, client) = db_with_client().await;

    let csv = "\
Content,MessageType,TimeSent,ConversationId
Hello there,3,2025-03-24 08:39:41,c1
How can I help?,1,2025-03-24 08:39:55,c1
session opened,5,2025-03-24 08:39:40,c1
";
    let report = service::ingest_file(&db, "export.csv", csv.as_bytes(), client.id)
        .await
        .expect("ingest");

    assert_eq!(report.records_count, 2);
    assert_eq!(report.skipped_rows, 1);

    let conv = db.get_conversation("c1").await.expect("get").expect("exists");
    assert_eq!(conv.tenant_id, "c1");
    assert_eq!(conv.message_count, 2);
    assert_eq!(conv.duration, 14);
}

#[tokio::test]
async fn rejected_extension_leaves_no_audit_entry() {
    let (db, client) = db_with_client().await;

    let err = service::ingest_file(&db, "export.xlsx", b"whatever", client.id)
        .await
        .expect_err("should fail");
    assert!(err.to_string().contains("Only CSV and JSON"));

    assert!(db.list_uploads(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn unknown_client_is_rejected_before_parsing() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let err = service::ingest_file(&db, "export.csv", STANDARD_CSV.as_bytes(), Uuid::new_v4())
        .await
        .expect_err("should fail");
    assert!(err.to_string().contains("client"));
}

#[tokio::test]
async fn failed_batch_ends_in_failed_upload() {
    let (db, client) = db_with_client().await;

    let csv = "\
conversation_id,tenant_id,timestamp,role,message
conv_1,tenant_1,2024-01-15T10:00:00Z,operator,hi
";
    let err = service::ingest_file(&db, "export.csv", csv.as_bytes(), client.id)
        .await
        .expect_err("batch should fail");
    assert!(err.to_string().contains("Invalid role"));

    let uploads = db.list_uploads(None).await.expect("list");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].status, UploadStatus::Failed);
    assert_eq!(uploads[0].records_count, 0);
    assert!(
        uploads[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("Invalid role"))
    );
}

#[tokio::test]
async fn partial_batch_succeeds_with_row_errors() {
    let (db, client) = db_with_client().await;

    let csv = "\
conversation_id,tenant_id,timestamp,role,message
conv_1,tenant_1,2024-01-15T10:00:00Z,tenant,hi
conv_1,tenant_1,not a date,ai,hello
";
    let report = service::ingest_file(&db, "export.csv", csv.as_bytes(), client.id)
        .await
        .expect("ingest");

    assert_eq!(report.records_count, 1);
    assert_eq!(report.row_errors.len(), 1);
    assert!(report.row_errors[0].contains("timestamp"));

    let uploads = db.list_uploads(None).await.expect("list");
    assert_eq!(uploads[0].status, UploadStatus::Success);
    assert_eq!(uploads[0].records_count, 1);
}

#[tokio::test]
async fn kpis_over_an_ingested_store() {
    let (db, client) = db_with_client().await;

    service::ingest_file(&db, "export.csv", STANDARD_CSV.as_bytes(), client.id)
        .await
        .expect("ingest");

    let scope = Scope::default();
    let records = db.list_messages(&scope).await.expect("messages");
    let conversations = db
        .list_conversations(&chatkpi_core::db::ConversationQuery::default())
        .await
        .expect("conversations");

    let report = kpi::calculate(&records, &conversations, None);
    assert_eq!(report.total_messages, 3);
    assert_eq!(report.total_conversations, 2);
    assert_eq!(report.active_tenants, 2);
    assert_eq!(report.resolution_rate, Some(50.0));
    assert_eq!(report.avg_response_time_ms, Some(3000.0));

    let bucketed: i64 = report.messages_over_time.iter().map(|b| b.count).sum();
    assert_eq!(bucketed, report.total_messages);
}
