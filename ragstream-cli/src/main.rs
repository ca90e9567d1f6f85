//! Ragstream CLI: terminal client for a retrieval-augmented assistant backend.
//!
//! Streams chat turns as they are generated and follows document ingestion
//! until it settles.

mod commands;
mod render;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Ragstream: streaming client for your document assistant
#[derive(Parser, Debug)]
#[command(name = "ragstream", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (for `.ragstream/config.toml`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Override the REST base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Override the WebSocket base URL
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ask questions and stream the answers
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
    /// Manage conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
    /// Manage the document library
    Documents {
        #[command(subcommand)]
        action: DocumentAction,
    },
    /// Manage external data connectors
    Connectors {
        #[command(subcommand)]
        action: ConnectorAction,
    },
    /// Show or change backend RAG settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Inspect the local client configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check that the backend is reachable
    Health,
}

#[derive(clap::Subcommand, Debug)]
enum ChatAction {
    /// Send one message and stream the reply
    Send {
        /// Conversation ID
        conversation: String,
        /// The question to ask
        message: String,
        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Create a new conversation
    New {
        /// Conversation title
        #[arg(default_value = "New conversation")]
        title: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConversationAction {
    /// List conversations
    List,
    /// Show a conversation with its messages
    Show { id: String },
    /// Delete a conversation
    Delete { id: String },
}

#[derive(clap::Subcommand, Debug)]
enum DocumentAction {
    /// List documents and their processing status
    List,
    /// Upload files and follow their ingestion
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Return as soon as the upload is accepted
        #[arg(long)]
        no_watch: bool,
    },
    /// Ingest a web page and follow its ingestion
    Url {
        url: String,
        /// Return as soon as the request is accepted
        #[arg(long)]
        no_watch: bool,
    },
    /// Follow an in-flight document until it completes or fails
    Watch { id: String },
    /// Delete a document
    Delete { id: String },
}

#[derive(clap::Subcommand, Debug)]
enum ConnectorAction {
    /// List connectors
    List,
    /// Register a connector
    Create {
        name: String,
        /// notion, confluence, google_drive, s3, web
        #[arg(value_name = "TYPE")]
        connector_type: String,
        /// Connector configuration as a JSON object
        #[arg(long, default_value = "{}")]
        config: String,
    },
    /// Test connectivity
    Test { id: String },
    /// Start a sync job
    Sync { id: String },
    /// Delete a connector
    Delete { id: String },
}

#[derive(clap::Subcommand, Debug)]
enum SettingsAction {
    /// Show current settings
    Show,
    /// Update one or more settings (key=value)
    Set {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default `.ragstream/config.toml` into the workspace
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "ragstream", "ragstream")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragstream.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = ragstream_core::config::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(api_url) = cli.api_url {
        config.server.api_url = api_url;
    }
    if let Some(ws_url) = cli.ws_url {
        config.server.ws_url = ws_url;
    }

    commands::handle_command(cli.command, config, &workspace).await
}
