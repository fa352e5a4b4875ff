//! Database operations for chatkpi.
//!
//! A SQLite-backed record store with the operations the pipeline and
//! the KPI calculator need: upsert/list/filter with date-range and
//! client scoping. Constructed once at process start and passed
//! explicitly to the components that use it.

use crate::error::{Error, Result};
use crate::models::*;
use crate::schema::SCHEMA;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Scope filter for record/conversation queries: inclusive date bounds
/// plus an optional client tag.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub client_id: Option<String>,
}

/// Options for paginated conversation listings.
#[derive(Debug, Default, Clone)]
pub struct ConversationQuery {
    pub scope: Scope,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Database handle for chatkpi.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Clients
    // =========================================================================

    /// Insert a client.
    pub async fn insert_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            "INSERT INTO clients (id, name, description, color, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(client.id.to_string())
        .bind(&client.name)
        .bind(&client.description)
        .bind(&client.color)
        .bind(client.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a client by ID.
    pub async fn get_client(&self, id: Uuid) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| client_from_row(&row)).transpose()
    }

    /// List all clients, oldest first.
    pub async fn list_clients(&self) -> Result<Vec<Client>> {
        let rows = sqlx::query("SELECT * FROM clients ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(client_from_row).collect()
    }

    /// Update a client's mutable fields.
    pub async fn update_client(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Client> {
        let mut client = self
            .get_client(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("client '{id}'")))?;

        if let Some(name) = name {
            client.name = name.trim().to_string();
        }
        if let Some(description) = description {
            client.description = Some(description.trim().to_string());
        }
        if let Some(color) = color {
            client.color = Some(color.to_string());
        }

        sqlx::query("UPDATE clients SET name = ?, description = ?, color = ? WHERE id = ?")
            .bind(&client.name)
            .bind(&client.description)
            .bind(&client.color)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(client)
    }

    /// Remove a client and all data tagged with it.
    pub async fn delete_client(&self, id: Uuid) -> Result<()> {
        let client_id = id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM conversations WHERE client_id = ?")
            .bind(&client_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE client_id = ?")
            .bind(&client_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM uploads WHERE client_id = ?")
            .bind(&client_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM clients WHERE id = ?")
            .bind(&client_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("client '{id}'")));
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Insert an upload audit entry.
    pub async fn insert_upload(&self, upload: &UploadRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (id, filename, file_size, records_count, uploaded_at, status, error_message, client_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(upload.id.to_string())
        .bind(&upload.filename)
        .bind(upload.file_size)
        .bind(upload.records_count)
        .bind(upload.uploaded_at.timestamp())
        .bind(upload.status.to_string())
        .bind(&upload.error_message)
        .bind(&upload.client_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition an upload out of PROCESSING. The status is terminal
    /// once set.
    pub async fn finish_upload(
        &self,
        id: Uuid,
        status: UploadStatus,
        error_message: Option<&str>,
        records_count: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE uploads SET status = ?, error_message = ?, records_count = ? WHERE id = ? AND status = 'PROCESSING'",
        )
        .bind(status.to_string())
        .bind(error_message)
        .bind(records_count)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("in-flight upload '{id}'")));
        }
        Ok(())
    }

    /// List uploads, newest first, optionally for one client.
    pub async fn list_uploads(&self, client_id: Option<&str>) -> Result<Vec<UploadRecord>> {
        let mut sql = String::from("SELECT * FROM uploads WHERE 1=1");
        if client_id.is_some() {
            sql.push_str(" AND client_id = ?");
        }
        sql.push_str(" ORDER BY uploaded_at DESC, id");

        let mut query = sqlx::query(&sql);
        if let Some(client_id) = client_id {
            query = query.bind(client_id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(upload_from_row).collect()
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Replace a conversation wholesale (last write wins, no merge).
    pub async fn replace_conversation(&self, conv: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, tenant_id, start_time, end_time, message_count, resolved, satisfaction_score, duration, client_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                message_count = excluded.message_count,
                resolved = excluded.resolved,
                satisfaction_score = excluded.satisfaction_score,
                duration = excluded.duration,
                client_id = excluded.client_id
            "#,
        )
        .bind(&conv.conversation_id)
        .bind(&conv.tenant_id)
        .bind(conv.start_time.timestamp())
        .bind(conv.end_time.timestamp())
        .bind(conv.message_count)
        .bind(conv.resolved)
        .bind(conv.satisfaction_score)
        .bind(conv.duration)
        .bind(&conv.client_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a conversation by its id.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| conversation_from_row(&row)).transpose()
    }

    /// List conversations in scope, newest start time first.
    pub async fn list_conversations(&self, query: &ConversationQuery) -> Result<Vec<Conversation>> {
        let mut sql = String::from("SELECT * FROM conversations WHERE 1=1");
        push_scope_sql(&mut sql, &query.scope, "start_time");
        sql.push_str(" ORDER BY start_time DESC, conversation_id");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut q = sqlx::query(&sql);
        for value in scope_binds(&query.scope) {
            q = match value {
                BindValue::Int(v) => q.bind(v),
                BindValue::Text(s) => q.bind(s),
            };
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(conversation_from_row).collect()
    }

    /// Count conversations in scope.
    pub async fn count_conversations(&self, scope: &Scope) -> Result<i64> {
        self.scoped_count("conversations", "start_time", scope).await
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append a batch of canonical records to the message store.
    pub async fn append_messages(&self, records: &[ChatRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO messages (conversation_id, tenant_id, timestamp, role, message, response_time_ms, resolved, satisfaction_score, client_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.conversation_id)
            .bind(&record.tenant_id)
            .bind(record.timestamp.timestamp())
            .bind(record.role.to_string())
            .bind(&record.message)
            .bind(record.response_time_ms)
            .bind(record.resolved)
            .bind(record.satisfaction_score)
            .bind(&record.client_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// List records in scope, oldest first.
    pub async fn list_messages(&self, scope: &Scope) -> Result<Vec<ChatRecord>> {
        let mut sql = String::from("SELECT * FROM messages WHERE 1=1");
        push_scope_sql(&mut sql, scope, "timestamp");
        sql.push_str(" ORDER BY timestamp, id");

        let mut q = sqlx::query(&sql);
        for value in scope_binds(scope) {
            q = match value {
                BindValue::Int(v) => q.bind(v),
                BindValue::Text(s) => q.bind(s),
            };
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(message_from_row).collect()
    }

    /// Count records in scope.
    pub async fn count_messages(&self, scope: &Scope) -> Result<i64> {
        self.scoped_count("messages", "timestamp", scope).await
    }

    /// Count distinct tenant ids among records in scope.
    pub async fn count_tenants(&self, scope: &Scope) -> Result<i64> {
        let mut sql = String::from("SELECT COUNT(DISTINCT tenant_id) FROM messages WHERE 1=1");
        push_scope_sql(&mut sql, scope, "timestamp");

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        for value in scope_binds(scope) {
            q = match value {
                BindValue::Int(v) => q.bind(v),
                BindValue::Text(s) => q.bind(s),
            };
        }

        let count = q.fetch_one(&self.pool).await?;
        Ok(count.0)
    }

    /// Earliest and latest record timestamps in scope, if any records
    /// exist.
    pub async fn message_time_range(
        &self,
        scope: &Scope,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let mut sql =
            String::from("SELECT MIN(timestamp), MAX(timestamp) FROM messages WHERE 1=1");
        push_scope_sql(&mut sql, scope, "timestamp");

        let mut q = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(&sql);
        for value in scope_binds(scope) {
            q = match value {
                BindValue::Int(v) => q.bind(v),
                BindValue::Text(s) => q.bind(s),
            };
        }

        match q.fetch_one(&self.pool).await? {
            (Some(min), Some(max)) => Ok(Some((ts_from_unix(min), ts_from_unix(max)))),
            _ => Ok(None),
        }
    }

    async fn scoped_count(&self, table: &str, time_column: &str, scope: &Scope) -> Result<i64> {
        let mut sql = format!("SELECT COUNT(*) FROM {table} WHERE 1=1");
        push_scope_sql(&mut sql, scope, time_column);

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        for value in scope_binds(scope) {
            q = match value {
                BindValue::Int(v) => q.bind(v),
                BindValue::Text(s) => q.bind(s),
            };
        }

        let count = q.fetch_one(&self.pool).await?;
        Ok(count.0)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Store-wide counts, optionally scoped to one client.
    pub async fn stats(&self, client_id: Option<&str>) -> Result<StoreStats> {
        let scope = Scope {
            client_id: client_id.map(ToOwned::to_owned),
            ..Scope::default()
        };

        let clients: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await?;

        let uploads = {
            let mut sql = String::from("SELECT COUNT(*) FROM uploads WHERE 1=1");
            if scope.client_id.is_some() {
                sql.push_str(" AND client_id = ?");
            }
            let mut query = sqlx::query_as::<_, (i64,)>(&sql);
            if let Some(ref client_id) = scope.client_id {
                query = query.bind(client_id);
            }
            query.fetch_one(&self.pool).await?.0
        };

        Ok(StoreStats {
            clients_count: clients.0,
            conversations_count: self.count_conversations(&scope).await?,
            messages_count: self.count_messages(&scope).await?,
            uploads_count: uploads,
            unique_tenants: self.count_tenants(&scope).await?,
        })
    }

    /// Delete all records, conversations, and uploads tagged with a
    /// client, keeping the client itself.
    pub async fn clear_client_data(&self, client_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM conversations WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM messages WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM uploads WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete everything.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["conversations", "messages", "uploads", "clients"] {
            let sql = format!("DELETE FROM {table}");
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn push_scope_sql(sql: &mut String, scope: &Scope, time_column: &str) {
    if scope.start.is_some() {
        sql.push_str(&format!(" AND {time_column} >= ?"));
    }
    if scope.end.is_some() {
        sql.push_str(&format!(" AND {time_column} <= ?"));
    }
    if scope.client_id.is_some() {
        sql.push_str(" AND client_id = ?");
    }
}

/// Parameter values produced by a [`Scope`], in the order
/// [`push_scope_sql`] emits placeholders.
enum BindValue {
    Int(i64),
    Text(String),
}

fn scope_binds(scope: &Scope) -> Vec<BindValue> {
    let mut binds = Vec::new();
    if let Some(start) = scope.start {
        binds.push(BindValue::Int(start.timestamp()));
    }
    if let Some(end) = scope.end {
        binds.push(BindValue::Int(end.timestamp()));
    }
    if let Some(ref client_id) = scope.client_id {
        binds.push(BindValue::Text(client_id.clone()));
    }
    binds
}

fn ts_from_unix(ts: i64) -> DateTime<Utc> {
    chrono::DateTime::from_timestamp(ts, 0)
        .unwrap_or_default()
        .with_timezone(&Utc)
}

fn client_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Client> {
    Ok(Client {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        name: row.get("name"),
        description: row.get("description"),
        color: row.get("color"),
        created_at: ts_from_unix(row.get::<i64, _>("created_at")),
    })
}

fn upload_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UploadRecord> {
    Ok(UploadRecord {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        filename: row.get("filename"),
        file_size: row.get("file_size"),
        records_count: row.get("records_count"),
        uploaded_at: ts_from_unix(row.get::<i64, _>("uploaded_at")),
        status: UploadStatus::from_str(row.get::<&str, _>("status"))?,
        error_message: row.get("error_message"),
        client_id: row.get("client_id"),
    })
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        conversation_id: row.get("conversation_id"),
        tenant_id: row.get("tenant_id"),
        start_time: ts_from_unix(row.get::<i64, _>("start_time")),
        end_time: ts_from_unix(row.get::<i64, _>("end_time")),
        message_count: row.get("message_count"),
        resolved: row.get("resolved"),
        satisfaction_score: row.get("satisfaction_score"),
        duration: row.get("duration"),
        client_id: row.get("client_id"),
    })
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChatRecord> {
    Ok(ChatRecord {
        conversation_id: row.get("conversation_id"),
        tenant_id: row.get("tenant_id"),
        timestamp: ts_from_unix(row.get::<i64, _>("timestamp")),
        role: Role::from_str(row.get::<&str, _>("role"))?,
        message: row.get("message"),
        response_time_ms: row.get("response_time_ms"),
        resolved: row.get("resolved"),
        satisfaction_score: row.get("satisfaction_score"),
        client_id: row.get("client_id"),
    })
}
