//! Per-connection task for the relay server.
//!
//! Each connection is split into a reader loop, which feeds text frames to
//! the relay in arrival order, and a writer task, which drains the session's
//! outbox onto the socket. Either side ending closes the session.

use super::ServerConfig;
use crate::error::RelayError;
use crate::relay::BroadcastRelay;
use crate::session::{PeerReceiver, SessionId};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Run one client connection from handshake to cleanup.
///
/// `_slot` is the connection slot reserved at accept time. It is released
/// when this function returns, whether or not the handshake succeeded.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: BroadcastRelay,
    config: Arc<ServerConfig>,
    mut shutdown_rx: broadcast::Receiver<()>,
    _slot: OwnedSemaphorePermit,
) {
    tracing::debug!("New connection from {}", addr);

    let ws_path = config.ws_path.clone();
    let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == ws_path {
            Ok(resp)
        } else {
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = match timeout(config.handshake_timeout(), accept_hdr_async(stream, check_path)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
        Err(_) => {
            tracing::warn!("WebSocket handshake timed out for {}", addr);
            return;
        }
    };

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (outbox, inbox) = mpsc::channel(config.outbox_capacity.max(1));

    // Connecting -> Active
    let session_id = relay.admit(outbox).await;
    let mut writer = tokio::spawn(write_loop(ws_tx, inbox, config.send_timeout(), session_id));

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match relay.handle_frame(session_id, &text).await {
                            Ok(_) | Err(RelayError::InvalidMessage(_)) => {}
                            Err(RelayError::ConnectionClosed(_)) => break,
                            Err(e) => {
                                tracing::warn!(session_id = %session_id, error = %e, "Relay error");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::warn!(
                            session_id = %session_id,
                            bytes = data.len(),
                            "Dropping binary frame, expected JSON text"
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(session_id = %session_id, reason = ?frame, "Client initiated close");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => {
                        tracing::debug!(session_id = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
            _ = &mut writer => {
                tracing::debug!(session_id = %session_id, "Writer stopped, closing session");
                break;
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!(session_id = %session_id, "Connection received shutdown signal");
                break;
            }
        }
    }

    // Active -> Closed
    relay.remove(session_id).await;
    writer.abort();
}

/// Forward queued broadcasts to the socket until the outbox closes or a
/// write fails or stalls past `send_timeout`.
async fn write_loop(
    mut ws_tx: WsSink,
    mut inbox: PeerReceiver,
    send_timeout: Duration,
    session_id: SessionId,
) {
    while let Some(msg) = inbox.recv().await {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(session_id = %session_id, "Failed to serialize message: {}", e);
                continue;
            }
        };

        match timeout(send_timeout, ws_tx.send(Message::Text(json.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                return;
            }
            Err(_) => {
                tracing::warn!(session_id = %session_id, "WebSocket send timed out");
                return;
            }
        }
    }

    // Outbox closed: the relay dropped this session.
    let _ = timeout(send_timeout, ws_tx.close()).await;
}
