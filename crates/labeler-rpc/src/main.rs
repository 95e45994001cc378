//! Labeler RPC Server - JSON-RPC backend for the labeling view.
//!
//! This binary hosts one labeling session over a document loaded from a JSON
//! snapshot and exposes the view channel as JSON-RPC 2.0 methods.

mod handlers;
mod server;
mod wrapper;

use anyhow::{Context, Result};
use clap::Parser;
use labeler_core::snapshot::load_document;
use labeler_core::{
    to_resource_name, DocumentHost, HttpClassifier, MemoryDocument, Session, SessionHandle,
    SessionOptions, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// File name of the store database inside the data directory.
const STORE_FILE_NAME: &str = "labeler.sqlite";

#[derive(Parser, Debug)]
#[command(name = "labeler-rpc")]
#[command(about = "JSON-RPC server for the UI labeler")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Document snapshot to load, and to write back on close
    #[arg(long)]
    document: Option<PathBuf>,

    /// Directory holding the store database (in-memory store if omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Send processing requests to the classifier from the server
    #[arg(long)]
    auto_classify: bool,

    /// Classify the raw selection without expanding containers
    #[arg(long)]
    top_level_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Labeler RPC Server");

    let document = Arc::new(match &args.document {
        Some(path) => load_document(path)
            .with_context(|| format!("Failed to load document {}", path.display()))?,
        None => MemoryDocument::new("Untitled"),
    });
    let filename = to_resource_name(&document.document_name());

    let store = match &args.data_dir {
        Some(dir) => SqliteStore::open(dir.join(STORE_FILE_NAME))?,
        None => SqliteStore::open_in_memory()?,
    };
    info!("Using store namespace '{}'", filename);

    let options = SessionOptions {
        top_level_only: args.top_level_only,
        ..SessionOptions::default()
    };
    let mut session = Session::new(
        document.clone(),
        Arc::new(store.namespace(filename)),
        options,
    );
    if args.auto_classify {
        info!("Classifying processing requests server-side");
        session = session.with_classifier(Arc::new(HttpClassifier::new()?));
    }

    let state = server::AppState {
        session: SessionHandle::spawn(session),
        document,
        document_path: args.document.clone(),
    };

    let addr = server::start_server(state, &args.host, args.port).await?;

    // Print port for the view host to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
