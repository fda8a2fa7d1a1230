//! LifeOS Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use lifeos_core::{
    api::{self, AppState},
    config::Config,
    events::{EventLog, EventStorage, InMemoryEventStorage, PgEventStorage},
    telemetry,
    Kernel,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    // Metrics recorder first so descriptions registered by telemetry land in it
    let prometheus = telemetry::metrics::install_prometheus()?;
    telemetry::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting LifeOS Server"
    );

    // Event storage
    let storage: Arc<dyn EventStorage> = match &config.database {
        Some(db) => {
            let pg = PgEventStorage::connect(db).await?;
            if db.run_migrations {
                pg.migrate().await?;
                tracing::info!("Database migrations applied");
            }
            tracing::info!("Connected to database");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("No database configured, events are kept in memory");
            Arc::new(InMemoryEventStorage::new())
        }
    };

    let kernel = Kernel::new(EventLog::new(storage), config.kernel.clone(), &config.policies);
    tracing::info!(policies = ?kernel.registry().names(), "Kernel initialized");

    let app = api::build_router(AppState::new(kernel).with_metrics(prometheus));

    let ip: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((ip, config.server.port));
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    telemetry::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
