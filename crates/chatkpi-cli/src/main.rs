//! chatkpi CLI - chat transcript ingestion and KPI analytics

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use chatkpi_core::db::{ConversationQuery, Scope};
use chatkpi_core::models::Client;
use chatkpi_core::{Config, Database, kpi, service};

#[derive(Debug, Parser)]
#[command(
    name = "chatkpi",
    author,
    version,
    about = "Chat transcript ingestion and KPI analytics",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a CSV or JSON transcript file
    Ingest {
        /// Path to the transcript file
        file: PathBuf,

        /// Client to tag the upload with (id or name)
        #[arg(long)]
        client: String,
    },

    /// Compute KPIs over the stored records
    Kpis {
        /// Start of the date range (inclusive)
        #[arg(long)]
        start: Option<String>,

        /// End of the date range (inclusive)
        #[arg(long)]
        end: Option<String>,

        /// Filter by client (id or name)
        #[arg(long)]
        client: Option<String>,
    },

    /// List conversations
    List {
        /// Filter by client (id or name)
        #[arg(long)]
        client: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "50")]
        limit: i64,

        /// Skip this many results
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// List upload history
    Uploads {
        /// Filter by client (id or name)
        #[arg(long)]
        client: Option<String>,
    },

    /// Manage clients
    Client {
        #[command(subcommand)]
        command: ClientCommand,
    },

    /// Show database statistics
    Stats {
        /// Scope to one client (id or name)
        #[arg(long)]
        client: Option<String>,
    },

    /// Delete stored data
    Clear {
        /// Only clear data tagged with this client (id or name)
        #[arg(long)]
        client: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ClientCommand {
    /// Add a new client
    Add {
        /// Client name
        name: String,

        /// Optional description
        #[arg(long)]
        description: Option<String>,

        /// Display color, e.g. #3b82f6
        #[arg(long)]
        color: Option<String>,
    },

    /// List clients
    List,

    /// Remove a client and all its data
    Remove {
        /// Client id or name
        client: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    // Open database
    let db = Database::open(&config.database).await?;

    match cli.command {
        Command::Ingest { file, client } => cmd_ingest(&db, &file, &client).await,
        Command::Kpis { start, end, client } => cmd_kpis(&db, start, end, client).await,
        Command::List {
            client,
            limit,
            offset,
        } => cmd_list(&db, client, limit, offset).await,
        Command::Uploads { client } => cmd_uploads(&db, client).await,
        Command::Client { command } => cmd_client(&db, command).await,
        Command::Stats { client } => cmd_stats(&db, client).await,
        Command::Clear { client } => cmd_clear(&db, client).await,
    }
}

async fn cmd_ingest(db: &Database, file: &Path, client: &str) -> Result<()> {
    let client = resolve_client(db, client).await?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("Not a file: {}", file.display()))?;
    let bytes = std::fs::read(file)?;

    let report = service::ingest_file(db, &filename, &bytes, client.id).await?;

    println!("Upload {} completed", report.upload_id);
    println!("  Records:       {}", report.records_count);
    println!("  Conversations: {}", report.conversations_count);
    if report.skipped_rows > 0 {
        println!("  Skipped rows:  {}", report.skipped_rows);
    }
    for error in &report.row_errors {
        eprintln!("  Warning: {}", error);
    }

    Ok(())
}

async fn cmd_kpis(
    db: &Database,
    start: Option<String>,
    end: Option<String>,
    client: Option<String>,
) -> Result<()> {
    let start = start.as_deref().map(parse_date).transpose()?;
    let end = end.as_deref().map(parse_date).transpose()?;
    let client_id = resolve_client_opt(db, client).await?;

    let scope = Scope {
        start,
        end,
        client_id: client_id.map(|id| id.to_string()),
    };
    let records = db.list_messages(&scope).await?;
    let conversations = db
        .list_conversations(&ConversationQuery {
            scope: scope.clone(),
            limit: None,
            offset: None,
        })
        .await?;

    let range = match (start, end) {
        (Some(start), Some(end)) => Some(kpi::DateRange { start, end }),
        _ => None,
    };
    let report = kpi::calculate(&records, &conversations, range.as_ref());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_list(
    db: &Database,
    client: Option<String>,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let client_id = resolve_client_opt(db, client).await?;

    let query = ConversationQuery {
        scope: Scope {
            client_id: client_id.map(|id| id.to_string()),
            ..Scope::default()
        },
        limit: Some(limit),
        offset: Some(offset),
    };
    let conversations = db.list_conversations(&query).await?;

    if conversations.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    for conv in conversations {
        let resolved = if conv.resolved { "resolved" } else { "open" };
        let date = conv.start_time.format("%Y-%m-%d %H:%M");
        println!(
            "{} | {} | {} msgs | {} | tenant {}",
            conv.conversation_id, date, conv.message_count, resolved, conv.tenant_id
        );
    }

    Ok(())
}

async fn cmd_uploads(db: &Database, client: Option<String>) -> Result<()> {
    let client_id = resolve_client_opt(db, client).await?;
    let client_id = client_id.map(|id| id.to_string());
    let uploads = db.list_uploads(client_id.as_deref()).await?;

    if uploads.is_empty() {
        println!("No uploads found.");
        return Ok(());
    }

    for upload in uploads {
        let date = upload.uploaded_at.format("%Y-%m-%d %H:%M");
        println!(
            "{} | {} | {} | {} | {} records",
            upload.id, date, upload.filename, upload.status, upload.records_count
        );
        if let Some(err) = &upload.error_message {
            println!("    {}", err);
        }
    }

    Ok(())
}

async fn cmd_client(db: &Database, command: ClientCommand) -> Result<()> {
    match command {
        ClientCommand::Add {
            name,
            description,
            color,
        } => {
            let client = Client::new(name, description, color);
            db.insert_client(&client).await?;
            println!("Added client: {} ({})", client.name, client.id);
        }
        ClientCommand::List => {
            let clients = db.list_clients().await?;
            if clients.is_empty() {
                println!("No clients configured.");
            } else {
                for client in clients {
                    println!(
                        "{} | {} | {}",
                        client.id,
                        client.name,
                        client.description.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        ClientCommand::Remove { client } => {
            let client = resolve_client(db, &client).await?;
            db.delete_client(client.id).await?;
            println!("Removed client: {}", client.name);
        }
    }
    Ok(())
}

async fn cmd_stats(db: &Database, client: Option<String>) -> Result<()> {
    let client_id = resolve_client_opt(db, client).await?;
    let client_id = client_id.map(|id| id.to_string());
    let stats = db.stats(client_id.as_deref()).await?;

    println!("Database Statistics");
    println!("-------------------");
    println!("Clients:       {}", stats.clients_count);
    println!("Conversations: {}", stats.conversations_count);
    println!("Messages:      {}", stats.messages_count);
    println!("Uploads:       {}", stats.uploads_count);
    println!("Tenants:       {}", stats.unique_tenants);

    Ok(())
}

async fn cmd_clear(db: &Database, client: Option<String>) -> Result<()> {
    match resolve_client_opt(db, client).await? {
        Some(client_id) => {
            db.clear_client_data(&client_id.to_string()).await?;
            println!("Cleared data for client {}", client_id);
        }
        None => {
            db.clear_all().await?;
            println!("Cleared all data.");
        }
    }
    Ok(())
}

/// Look a client up by id, falling back to a name match.
async fn resolve_client(db: &Database, ident: &str) -> Result<Client> {
    if let Ok(id) = Uuid::parse_str(ident) {
        if let Some(client) = db.get_client(id).await? {
            return Ok(client);
        }
    }
    db.list_clients()
        .await?
        .into_iter()
        .find(|c| c.name == ident)
        .ok_or_else(|| anyhow::anyhow!("No client matching '{}'", ident))
}

async fn resolve_client_opt(db: &Database, ident: Option<String>) -> Result<Option<Uuid>> {
    match ident {
        Some(ident) => Ok(Some(resolve_client(db, &ident).await?.id)),
        None => Ok(None),
    }
}

/// Parse a user-supplied date bound; naive datetimes are taken as UTC.
fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    dateparser::parse_with_timezone(raw, &Utc)
        .map_err(|_| anyhow::anyhow!("Unparseable date: '{}'", raw))
}
