//! Doc Relay - real-time document broadcast server
//!
//! Entry point wiring configuration, the seed document, logging and
//! graceful shutdown around the relay's WebSocket server.

use anyhow::Context;
use relay::server::{RelayServer, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting Doc Relay server");

    let config = ServerConfig::from_env().context("reading RELAY_* configuration")?;
    let document = config.load_document().context("loading seed document")?;
    match &config.document_path {
        Some(path) => tracing::info!("Seed document loaded from {}", path.display()),
        None => tracing::info!("Using built-in seed document"),
    }

    let server = RelayServer::new(config, document);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                shutdown.shutdown();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
