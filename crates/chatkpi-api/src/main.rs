//! HTTP API server for chatkpi: uploads, KPI queries, and client
//! management for the dashboard.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::{Args, Parser};
use log::info;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use chatkpi_core::db::{ConversationQuery, Scope};
use chatkpi_core::models::{Client, Conversation, IngestReport, StoreStats};
use chatkpi_core::{Config, Database, Error, kpi, service};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn try_main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config_path = cli
        .common
        .config
        .unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    let port = cli.common.port.unwrap_or(config.server.port);
    let db = Database::open(&config.database).await?;

    let state = AppState { db: Arc::new(db) };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/kpis", get(kpis))
        .route("/conversations", get(conversations))
        .route("/clients", get(list_clients).post(create_client))
        .route("/clients/{id}", delete(delete_client).patch(update_client))
        .route("/clients/{id}/stats", get(client_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting API server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP API server for chatkpi")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port to listen on (defaults to the configured port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
}

// ============================================================================
// Error mapping
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Map core errors onto HTTP statuses, keeping the message as the
/// response body.
fn from_core(err: Error) -> ApiError {
    let status = match &err {
        Error::Validation(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid client id '{raw}'")))
}

/// Parse a query-string date bound; naive datetimes are taken as UTC.
fn parse_date(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    dateparser::parse_with_timezone(raw, &Utc)
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Unparseable date '{raw}'")))
}

// ============================================================================
// Basic routes
// ============================================================================

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    store: StoreStats,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let store = state.db.stats(None).await.map_err(from_core)?;
    Ok(Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        store,
    }))
}

// ============================================================================
// Upload
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    #[serde(flatten)]
    report: IngestReport,
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut client_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("clientId") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                client_id = Some(value);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No file provided"))?;
    let client_id =
        client_id.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Client ID is required"))?;
    let client_id = parse_uuid(&client_id)?;

    let report = service::ingest_file(&state.db, &filename, &bytes, client_id)
        .await
        .map_err(from_core)?;

    Ok(Json(UploadResponse {
        success: true,
        report,
    }))
}

// ============================================================================
// KPIs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KpiParams {
    start_date: Option<String>,
    end_date: Option<String>,
    client_id: Option<String>,
}

async fn kpis(
    State(state): State<AppState>,
    Query(params): Query<KpiParams>,
) -> Result<Json<kpi::KpiReport>, ApiError> {
    let start = params.start_date.as_deref().map(parse_date).transpose()?;
    let end = params.end_date.as_deref().map(parse_date).transpose()?;

    let scope = Scope {
        start,
        end,
        client_id: params.client_id,
    };
    let records = state.db.list_messages(&scope).await.map_err(from_core)?;
    let conversations = state
        .db
        .list_conversations(&ConversationQuery {
            scope: scope.clone(),
            limit: None,
            offset: None,
        })
        .await
        .map_err(from_core)?;

    // Rate-over-time metrics only make sense with both bounds given.
    let range = match (start, end) {
        (Some(start), Some(end)) => Some(kpi::DateRange { start, end }),
        _ => None,
    };
    let report = kpi::calculate(&records, &conversations, range.as_ref());

    Ok(Json(report))
}

// ============================================================================
// Conversations
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationParams {
    page: Option<i64>,
    limit: Option<i64>,
    client_id: Option<String>,
}

#[derive(Serialize)]
struct Pagination {
    page: i64,
    limit: i64,
    total: i64,
    pages: i64,
}

#[derive(Serialize)]
struct ConversationsResponse {
    conversations: Vec<Conversation>,
    pagination: Pagination,
}

async fn conversations(
    State(state): State<AppState>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).max(1);

    let scope = Scope {
        client_id: params.client_id,
        ..Scope::default()
    };
    let total = state
        .db
        .count_conversations(&scope)
        .await
        .map_err(from_core)?;

    let query = ConversationQuery {
        scope,
        limit: Some(limit),
        offset: Some((page - 1) * limit),
    };
    let conversations = state
        .db
        .list_conversations(&query)
        .await
        .map_err(from_core)?;

    Ok(Json(ConversationsResponse {
        conversations,
        pagination: Pagination {
            page,
            limit,
            total,
            pages: (total + limit - 1) / limit,
        },
    }))
}

// ============================================================================
// Clients
// ============================================================================

#[derive(Serialize)]
struct ClientsResponse {
    clients: Vec<Client>,
}

async fn list_clients(State(state): State<AppState>) -> Result<Json<ClientsResponse>, ApiError> {
    let clients = state.db.list_clients().await.map_err(from_core)?;
    Ok(Json(ClientsResponse { clients }))
}

#[derive(Debug, Deserialize)]
struct CreateClientBody {
    name: String,
    description: Option<String>,
    color: Option<String>,
}

#[derive(Serialize)]
struct ClientResponse {
    client: Client,
}

async fn create_client(
    State(state): State<AppState>,
    Json(body): Json<CreateClientBody>,
) -> Result<(StatusCode, Json<ClientResponse>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Client name is required",
        ));
    }

    let client = Client::new(
        name.to_string(),
        body.description.map(|d| d.trim().to_string()),
        body.color,
    );
    state.db.insert_client(&client).await.map_err(from_core)?;

    Ok((StatusCode::CREATED, Json(ClientResponse { client })))
}

#[derive(Debug, Deserialize)]
struct UpdateClientBody {
    name: Option<String>,
    description: Option<String>,
    color: Option<String>,
}

async fn update_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateClientBody>,
) -> Result<Json<ClientResponse>, ApiError> {
    let id = parse_uuid(&id)?;
    let client = state
        .db
        .update_client(
            id,
            body.name.as_deref(),
            body.description.as_deref(),
            body.color.as_deref(),
        )
        .await
        .map_err(from_core)?;
    Ok(Json(ClientResponse { client }))
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
}

async fn delete_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = parse_uuid(&id)?;
    state.db.delete_client(id).await.map_err(from_core)?;
    Ok(Json(DeleteResponse { success: true }))
}

// ============================================================================
// Client stats
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientStatsResponse {
    #[serde(flatten)]
    stats: StoreStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_upload_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_time_range: Option<TimeRange>,
}

async fn client_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientStatsResponse>, ApiError> {
    let id = parse_uuid(&id)?;
    state
        .db
        .get_client(id)
        .await
        .map_err(from_core)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("client '{id}'")))?;

    let client_id = id.to_string();
    let stats = state.db.stats(Some(&client_id)).await.map_err(from_core)?;

    let uploads = state
        .db
        .list_uploads(Some(&client_id))
        .await
        .map_err(from_core)?;
    let last_upload_date = uploads.first().map(|u| u.uploaded_at);

    let scope = Scope {
        client_id: Some(client_id),
        ..Scope::default()
    };
    let data_time_range = state
        .db
        .message_time_range(&scope)
        .await
        .map_err(from_core)?
        .map(|(start, end)| TimeRange { start, end });

    Ok(Json(ClientStatsResponse {
        stats,
        last_upload_date,
        data_time_range,
    }))
}
