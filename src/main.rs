mod adapters;
mod backup;
mod config;
mod db;
mod handlers;
mod jobs;
mod models;
mod render;
mod reporter;
mod router;
mod status;
mod utils;
mod ws;

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adapters::simulated::SimulatedConnector;
use adapters::transport::SshConnector;
use adapters::{AdapterSet, Connector};
use backup::BackupService;
use config::{AdapterMode, Config};
use db::Store;
use jobs::{Dispatcher, DispatcherSettings};
use render::Renderer;
use status::StatusChecker;
use ws::Hub;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
    pub backups: Arc<BackupService>,
    pub renderer: Renderer,
    pub connector: Arc<dyn Connector>,
    pub ws_hub: Option<Arc<Hub>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netswift_dispatcher=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting NetSwift dispatcher");
    tracing::info!("Database: {}", cfg.db_path);
    tracing::info!("Adapter mode: {}", cfg.adapter_mode);
    tracing::info!(
        "Concurrency: {} (retries={}, job timeout={:?}, batch timeout={:?})",
        cfg.max_concurrency,
        cfg.max_retries,
        cfg.job_timeout,
        cfg.batch_timeout
    );
    tracing::info!("Listen: {}", cfg.listen_addr);

    // Initialize database
    let store = Store::with_pool_size(&cfg.db_path, cfg.db_max_connections).await?;
    tracing::info!("Database initialized (pool_size={})", cfg.db_max_connections);

    let connector: Arc<dyn Connector> = match cfg.adapter_mode {
        AdapterMode::Simulated => Arc::new(SimulatedConnector::default()),
        AdapterMode::Ssh => Arc::new(SshConnector::new(cfg.ssh_connect_timeout)),
    };

    // Initialize WebSocket hub
    let ws_hub = Arc::new(Hub::new());

    // Initialize dispatcher and close out jobs a previous run left behind
    let dispatcher = Dispatcher::new(
        store.clone(),
        AdapterSet::new(connector.clone()),
        cfg.credential_provider(),
        DispatcherSettings::from_config(&cfg),
        Some(ws_hub.clone()),
    );
    dispatcher.recover_interrupted().await?;

    let backups = BackupService::new(store.clone());

    // Initialize status checker
    let mut status_checker = StatusChecker::new(
        store.clone(),
        connector.clone(),
        Some(ws_hub.clone()),
        cfg.status_check_interval,
    );
    status_checker.start();

    if let Err(e) = store.log_event(models::event_type::SYSTEM, "Dispatcher started").await {
        tracing::warn!("Failed to record startup event: {}", e);
    }

    // Create app state
    let state = Arc::new(AppState {
        store: store.clone(),
        config: cfg.clone(),
        dispatcher: dispatcher.clone(),
        backups,
        renderer: Renderer::new(store.clone()),
        connector,
        ws_hub: Some(ws_hub),
    });

    // Build router
    let app = router::build(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("NetSwift listening on {}", cfg.listen_addr);

    let shutdown_dispatcher = dispatcher.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_dispatcher.shutdown();
        })
        .await?;

    status_checker.stop();
    if let Err(e) = store.log_event(models::event_type::SYSTEM, "Dispatcher stopped").await {
        tracing::warn!("Failed to record shutdown event: {}", e);
    }
    tracing::info!("NetSwift shutting down");
    Ok(())
}

/// WebSocket upgrade handler
pub async fn ws_upgrade_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    if let Some(hub) = &state.ws_hub {
        ws::ws_handler(ws, axum::extract::State(hub.clone())).await
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
