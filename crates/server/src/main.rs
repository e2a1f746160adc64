// crates/server/src/main.rs
//! Docharvest server binary.
//!
//! Opens the job store, drains records orphaned by a previous process,
//! starts the cron scheduler, and serves the control API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use docharvest_db::Database;
use docharvest_server::work::{HttpSourceFactory, SqliteBackupProvider};
use docharvest_server::{create_app, AppState, Scheduler};

/// Default port for the server.
const DEFAULT_PORT: u16 = 47311;

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("DOCHARVEST_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Database path: `DOCHARVEST_DB` or `~/.cache/docharvest/docharvest.db`.
fn get_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("DOCHARVEST_DB") {
        return Ok(PathBuf::from(path));
    }
    let cache = dirs::cache_dir().context("no cache directory available")?;
    Ok(cache.join("docharvest").join("docharvest.db"))
}

/// Backup directory: `DOCHARVEST_BACKUP_DIR` or `<db dir>/backups`.
fn get_backup_dir(db_path: &std::path::Path) -> PathBuf {
    std::env::var("DOCHARVEST_BACKUP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            db_path
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join("backups")
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docharvest=info,tower_http=warn")),
        )
        .init();

    let db_path = get_db_path()?;
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("opening job store at {}", db_path.display()))?;

    // Checkpoints are memory-only: anything still marked active belongs
    // to a dead process and cannot be resumed.
    let drained = db
        .fail_interrupted_jobs("process restarted; progress not recoverable")
        .await?;
    if drained > 0 {
        tracing::warn!(count = drained, "drained interrupted jobs from previous run");
    }

    let backup_dir = get_backup_dir(&db_path);
    let state = AppState::new(
        db.clone(),
        Arc::new(HttpSourceFactory::new()),
        Arc::new(SqliteBackupProvider::new(db.clone(), backup_dir)),
    );

    Scheduler::new(db, Arc::clone(&state.supervisor)).spawn();

    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], get_port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("docharvest listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
