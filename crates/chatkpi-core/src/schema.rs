//! Database schema for chatkpi.

/// SQL schema, applied idempotently on open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    color TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    records_count INTEGER NOT NULL,
    uploaded_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    client_id TEXT NOT NULL
);

-- One row per conversation id; replaced wholesale on re-upload.
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    message_count INTEGER NOT NULL,
    resolved INTEGER NOT NULL,
    satisfaction_score REAL,
    duration INTEGER NOT NULL,
    client_id TEXT NOT NULL
);

-- Append-only canonical record store.
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    role TEXT NOT NULL,
    message TEXT NOT NULL,
    response_time_ms REAL,
    resolved INTEGER,
    satisfaction_score REAL,
    client_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_client ON messages(client_id);
CREATE INDEX IF NOT EXISTS idx_conversations_start ON conversations(start_time);
CREATE INDEX IF NOT EXISTS idx_conversations_client ON conversations(client_id);
CREATE INDEX IF NOT EXISTS idx_uploads_client ON uploads(client_id);
"#;
