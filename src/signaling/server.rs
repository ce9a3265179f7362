//! Signaling server
//!
//! Accepts WebSocket connections (plain or TLS) and drives one task per
//! connection that feeds inbound frames to the [`Router`] and drains the
//! connection's outbound queue onto the socket.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::error::SignalingError;
use super::router::Router;

/// Signaling server state
pub struct SignalingServer {
    router: Arc<Router>,
}

impl SignalingServer {
    /// Create a new signaling server with an empty directory
    pub fn new() -> Self {
        Self::with_router(Arc::new(Router::new()))
    }

    /// Create a server around an existing router
    pub fn with_router(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Bind `addr` and serve plain WebSocket connections
    pub async fn run(&self, addr: &str) -> Result<(), SignalingError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SignalingError::Bind(format!("{}: {}", addr, e)))?;

        info!("Signaling server listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve plain WebSocket connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SignalingError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New signaling connection from {}", peer_addr);
                    let router = self.router.clone();
                    tokio::spawn(async move {
                        let ws_stream = match accept_async(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                warn!("WebSocket upgrade failed for {}: {}", peer_addr, e);
                                return;
                            }
                        };
                        handle_connection(ws_stream, router).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Bind `addr` and serve WebSocket connections over TLS
    pub async fn run_tls(&self, addr: &str, acceptor: TlsAcceptor) -> Result<(), SignalingError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SignalingError::Bind(format!("{}: {}", addr, e)))?;

        info!("TLS signaling server listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New TLS connection from {}", peer_addr);

                    let acceptor = acceptor.clone();
                    let router = self.router.clone();

                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                warn!("TLS handshake failed for {}: {}", peer_addr, e);
                                return;
                            }
                        };

                        let ws_stream = match accept_async(tls_stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                warn!("WebSocket upgrade failed for {}: {}", peer_addr, e);
                                return;
                            }
                        };

                        handle_connection(ws_stream, router).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

impl Default for SignalingServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one WebSocket connection until either side closes it.
///
/// The router sees exactly one `disconnect` for the connection, whether or
/// not the peer ever registered.
async fn handle_connection<S>(ws_stream: WebSocketStream<S>, router: Arc<Router>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (handle, mut outbound) = router.connect();
    let (mut write, mut read) = ws_stream.split();

    debug!("Connection {} opened", handle.id());

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        router.handle_text(&handle, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", handle.id(), e);
                        break;
                    }
                    // Binary frames carry nothing in this protocol; pings are answered by tungstenite
                    _ => {}
                }
            }

            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                let json = match envelope.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {} envelope: {}", envelope.kind(), e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }

            _ = handle.overflowed() => {
                warn!("Connection {} is not reading, closing it", handle.id());
                break;
            }
        }
    }

    router.disconnect(handle.id());
    debug!("Connection {} closed", handle.id());
}
