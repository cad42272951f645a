//! Assessment continuity server
//!
//! Holds one resumable assessment record per signed-in user and serves the
//! check / clear endpoints the client's welcome view relies on.

mod auth;
mod logging;
mod migration_runner;
mod paths;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::auth::TokenDirectory;
use crate::logging::LogFormat;
use crate::state::AppState;
use crate::store::{MemoryStore, SessionStore, SqliteStore};

#[derive(Parser)]
#[command(name = "assessment-server", about = "Session continuity service")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "ASSESSMENT_BIND", default_value = "127.0.0.1:4100")]
    bind: SocketAddr,

    /// Data directory (defaults to ~/.assessment)
    #[arg(long, env = "ASSESSMENT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TOML file mapping bearer tokens to emails (defaults to <data-dir>/tokens.toml)
    #[arg(long, env = "ASSESSMENT_TOKENS_FILE")]
    tokens_file: Option<PathBuf>,

    /// Only accept identities whose email is in this domain
    #[arg(long, env = "ASSESSMENT_ALLOWED_DOMAIN")]
    allowed_domain: Option<String>,

    /// Keep records in memory instead of SQLite
    #[arg(long)]
    in_memory: bool,

    /// Log line format
    #[arg(long, env = "ASSESSMENT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    paths::init_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs()?;
    let logging = logging::init_logging(&paths::log_dir(), cli.log_format)?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        data_dir = %paths::data_dir().display(),
        "Starting assessment continuity server"
    );

    let tokens_path = cli.tokens_file.unwrap_or_else(paths::tokens_path);
    let tokens = if tokens_path.exists() {
        TokenDirectory::load(&tokens_path, cli.allowed_domain)?
    } else {
        warn!(
            component = "auth",
            event = "auth.no_tokens_file",
            path = %tokens_path.display(),
            "No tokens file; every request will be rejected"
        );
        TokenDirectory::default()
    };
    info!(
        component = "auth",
        event = "auth.tokens_loaded",
        count = tokens.len(),
        "Loaded token directory"
    );

    let store: Arc<dyn SessionStore> = if cli.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(paths::db_path())?)
    };

    let app = routes::router(Arc::new(AppState::new(store, tokens, logging.run_id.as_str())));

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %cli.bind,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        component = "server",
        event = "server.stopped",
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal_failed",
            error = %e,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
