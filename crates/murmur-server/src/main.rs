mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_api::state::AppStateInner;
use murmur_db::Database;
use murmur_db::notify::LocalNotifier;
use murmur_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and the notification bus it publishes to
    let db = Arc::new(Database::open(&config.db_path)?);
    let notifier = Arc::new(LocalNotifier::new(config.channel_capacity));

    // Shared state
    let dispatcher = Dispatcher::new(notifier.clone(), db.clone(), config.failure_policy);
    let state = Arc::new(AppStateInner {
        db,
        dispatcher,
        keep_alive: config.keep_alive,
    });

    let app = murmur_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr()?;
    info!("Murmur server listening on {}", addr);
    info!(
        "Stream keep-alive every {}s, {} buffered notifications per stream, skip policy {:?}",
        config.keep_alive.as_secs(),
        config.channel_capacity,
        config.failure_policy
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(notifier))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. Streams never finish on their own, so the
/// notifier is shut down here to end every open stream and let the server drain.
async fn shutdown_signal(notifier: Arc<LocalNotifier>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    notifier.shutdown();
}
