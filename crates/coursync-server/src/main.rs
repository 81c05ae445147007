use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coursync_server::external::{ExternalRecordStore, MemoryStore, NotionStore};
use coursync_server::{api, AppState, RemoteDb, ServerConfig};

/// How often payload files without a row are swept.
const ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coursync_server=debug")),
        )
        .init();

    info!("Starting coursync server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = RemoteDb::open(&config.database_path)?;

    let external: Arc<dyn ExternalRecordStore> = match &config.notion_api_key {
        Some(key) => Arc::new(NotionStore::new(
            key.clone(),
            config.notion_assignments_db.clone(),
            config.notion_courses_db.clone(),
        )),
        None => {
            warn!("NOTION_API_KEY not set, records are mirrored in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, db, external)?;

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic orphan sweep of the document directory
    let sweep_db = app_state.db.clone();
    let sweep_docs = app_state.documents.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ORPHAN_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let db = sweep_db.clone();
            let docs = sweep_docs.clone();
            let result = tokio::task::spawn_blocking(move || {
                db.with_conn(|conn| Ok(docs.sweep_orphans(conn)?))
            })
            .await;
            match result {
                Ok(Ok(removed)) => info!(removed, "orphan sweep complete"),
                Ok(Err(e)) => warn!(error = %e, "orphan sweep failed"),
                Err(e) => warn!(error = %e, "orphan sweep task panicked"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
