use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use link_relay::config::Settings;
use link_relay::fallback::create_fallback_publisher;
use link_relay::server::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Connect the fallback broker
    let (publisher, broker_handle) =
        create_fallback_publisher(&settings.broker, shutdown_tx.subscribe()).await?;

    // Create application state and start the delivery coordinator
    let addr = settings.server_addr();
    let (state, coordinator_handle) =
        AppState::new(settings, publisher, shutdown_tx.clone());
    tracing::info!("Application state initialized");

    // Create Axum app
    let app = create_app(state);

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx.clone()))
        .await?;

    // Server may also stop on its own; make sure background tasks see it
    let _ = shutdown_tx.send(());

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    if let Err(e) = coordinator_handle.await {
        tracing::error!(error = %e, "Delivery coordinator task failed");
    }
    if let Some(handle) = broker_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Broker driver task failed");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the coordinator and broker driver
    let _ = shutdown_tx.send(());
}
