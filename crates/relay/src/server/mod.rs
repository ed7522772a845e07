//! WebSocket relay server.
//!
//! This module exposes the relay over WebSocket text frames. Each accepted
//! connection runs in its own task with a separate writer task draining
//! that session's bounded outbox, so a slow client never blocks the relay.
//!
//! # Example
//!
//! ```ignore
//! use relay::server::{RelayServer, ServerConfig};
//! use relay::DocumentState;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::new(ServerConfig::default(), DocumentState::default());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

mod connection;

use crate::document::DocumentState;
use crate::error::DocumentError;
use crate::relay::BroadcastRelay;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

/// Server configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Request path accepted for the WebSocket upgrade.
    pub ws_path: String,
    /// Maximum concurrent connections, counted from accept; further
    /// connections are dropped before the handshake.
    pub max_total_connections: usize,
    /// Per-session outbound queue length before the session is disconnected.
    pub outbox_capacity: usize,
    /// Upper bound on a single socket write, in milliseconds.
    pub send_timeout_ms: u64,
    /// Time a new connection has to complete the WebSocket upgrade, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Optional JSON file to seed the document from.
    pub document_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            ws_path: "/ws".to_string(),
            max_total_connections: 256,
            outbox_capacity: 64,
            send_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            document_path: None,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the specified port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Get the full bind address.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Build a configuration from `RELAY_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("RELAY_BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Some(port) = parse_var(&lookup, "RELAY_PORT")? {
            config.port = port;
        }
        if let Some(path) = lookup("RELAY_WS_PATH") {
            config.ws_path = if path.starts_with('/') {
                path
            } else {
                format!("/{}", path)
            };
        }
        if let Some(max) = parse_var(&lookup, "RELAY_MAX_CONNECTIONS")? {
            config.max_total_connections = max;
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "RELAY_OUTBOX_CAPACITY")? {
            if capacity == 0 {
                return Err(ServerError::Config(
                    "RELAY_OUTBOX_CAPACITY must be at least 1".to_string(),
                ));
            }
            config.outbox_capacity = capacity;
        }
        if let Some(timeout) = parse_var(&lookup, "RELAY_SEND_TIMEOUT_MS")? {
            config.send_timeout_ms = timeout;
        }
        if let Some(timeout) = parse_var(&lookup, "RELAY_HANDSHAKE_TIMEOUT_MS")? {
            config.handshake_timeout_ms = timeout;
        }
        if let Some(path) = lookup("RELAY_DOCUMENT_PATH") {
            config.document_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Load the seed document named by `document_path`, or the built-in one.
    pub fn load_document(&self) -> Result<DocumentState, ServerError> {
        match &self.document_path {
            Some(path) => Ok(DocumentState::from_path(path)?),
            None => Ok(DocumentState::default()),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ServerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ServerError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    relay: BroadcastRelay,
    connection_slots: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a server for the given document.
    pub fn new(config: ServerConfig, document: DocumentState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            connection_slots: Arc::new(Semaphore::new(
                config.max_total_connections.min(Semaphore::MAX_PERMITS),
            )),
            config: Arc::new(config),
            relay: BroadcastRelay::new(document),
            shutdown_tx,
        }
    }

    /// Configuration this server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle to the relay for snapshot and health queries.
    pub fn relay(&self) -> BroadcastRelay {
        self.relay.clone()
    }

    /// Get a shutdown handle.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Bind to the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: addr.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        match listener.local_addr() {
            Ok(addr) => {
                self.relay.set_server_addr(addr);
                tracing::info!("Relay listening on ws://{}{}", addr, self.config.ws_path);
            }
            Err(e) => tracing::warn!("Relay listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // The slot is taken before the handshake and held until the
                            // connection task finishes.
                            let slot = match Arc::clone(&self.connection_slots).try_acquire_owned() {
                                Ok(slot) => slot,
                                Err(_) => {
                                    tracing::warn!(
                                        "Max connections reached ({}), rejecting {}",
                                        self.config.max_total_connections,
                                        addr
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            tokio::spawn(connection::serve_connection(
                                stream,
                                addr,
                                self.relay.clone(),
                                Arc::clone(&self.config),
                                self.shutdown_tx.subscribe(),
                                slot,
                            ));
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server received shutdown signal");
                    break;
                }
            }
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Get current server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            connected_sessions: self.relay.count().await,
            document_revision: self.relay.revision().await,
        }
    }
}

/// Server statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerStats {
    /// Live sessions.
    pub connected_sessions: usize,
    /// Edits applied since startup.
    pub document_revision: u64,
}

/// Handle for triggering server shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Signal the server and all connection tasks to shut down.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Seed document could not be loaded.
    #[error(transparent)]
    Document(#[from] DocumentError),
}
