/**
 * examsync Agent Entry Point
 *
 * Runs the offline service headless: SQLite storage, the HTTP examination
 * client and (when configured) the connectivity probe, until Ctrl-C.
 *
 * Configuration comes from the TOML file named by `EXAMSYNC_CONFIG`, or the
 * defaults, with `EXAMSYNC_*` environment variables applied on top.
 */
use examsync::local_db::SqliteBackend;
use examsync::realtime::StorageBus;
use examsync::remote::HttpRemoteApi;
use examsync::shared::config::OfflineConfig;
use examsync::OfflineService;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = match std::env::var("EXAMSYNC_CONFIG") {
        Ok(path) => {
            tracing::info!("[Agent] Loading configuration from {}", path);
            OfflineConfig::load(path)?
        }
        Err(_) => OfflineConfig::default(),
    }
    .with_env_overrides()?;

    let database_path = config.database_path();
    tracing::info!("[Agent] Opening local database at {}", database_path.display());
    let backend = SqliteBackend::open(&database_path).await?;
    let remote = HttpRemoteApi::new(&config)?;

    if config.probe_url.is_none() {
        tracing::warn!("[Agent] No probe_url configured; connectivity is assumed online");
    }

    let service = OfflineService::new(config, Arc::new(backend), Arc::new(remote), StorageBus::default());
    service.init().await?;

    let mut events = service.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_warning() => tracing::warn!("[Agent] {:?}", event),
                Ok(event) => tracing::info!("[Agent] {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("[Agent] Missed {} events", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("[Agent] Shutting down");

    reporter.abort();
    service.dispose().await;
    Ok(())
}
