//! Moi Sync Agent - keeps the app's writes flowing to the remote store
//! across connectivity loss.

use std::sync::Arc;

use moi_agent::config::{Config, QueuePersistence};
use moi_agent::db::{self, QueueStore};
use moi_agent::engine::SyncEngine;
use moi_agent::network::{Connectivity, NetworkMonitor, ProbeSource};
use moi_agent::remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
use moi_agent::websocket::{spawn_relay, ConnectionManager};
use moi_agent::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moi_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Moi Sync Agent on {}:{}", config.host, config.port);

    // Remote store and the connectivity signal that goes with it
    let (remote, connectivity): (Arc<dyn RemoteStore>, Connectivity) = match &config.remote_url {
        Some(url) => {
            let store =
                HttpRemoteStore::new(url, config.remote_token.clone(), config.remote_timeout)?;
            let probe =
                ProbeSource::new(store.client().clone(), store.health_url(), config.probe_interval);
            tracing::info!(remote = %url, "Using HTTP remote store");
            (Arc::new(store), probe.start().await)
        }
        None => {
            tracing::warn!("REMOTE_URL not set, using the in-memory remote store");
            (Arc::new(MemoryRemoteStore::new()), Connectivity::always_online())
        }
    };
    let monitor = NetworkMonitor::spawn(connectivity, config.debounce);

    // Sync engine, restored from SQLite when the queue is persisted
    let engine = match (config.queue_persistence, &config.database_url) {
        (QueuePersistence::Persist, Some(url)) => {
            let pool = db::create_pool(url).await?;
            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;
            SyncEngine::open(
                monitor.subscribe(),
                remote,
                QueueStore::new(pool),
                config.engine_settings(),
            )
            .await?
        }
        _ => {
            tracing::info!("Queue persistence disabled, queued writes are lost on exit");
            SyncEngine::new(monitor.subscribe(), remote, config.engine_settings())
        }
    };
    engine.start();

    let conn_manager = ConnectionManager::new_shared();
    let relay = spawn_relay(&engine, conn_manager.clone());

    let state = AppState {
        engine: engine.clone(),
        conn_manager,
    };

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Agent listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown();
    relay.abort();
    let pending = engine.current_status().pending_changes();
    if pending > 0 {
        tracing::warn!(pending, "Shutting down with unsynced writes");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
