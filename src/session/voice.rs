//! Voice session lifecycle
//!
//! Connects to the signaling server, acquires the local capture stream,
//! registers in a room and then feeds every inbound envelope to the
//! [`SessionManager`] until the session is disabled or the transport closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::manager::SessionManager;
use super::media::{AudioSink, CaptureDevice, PeerConnectionFactory};
use crate::signaling::{Envelope, SignalingClient, SignalingError, SignalingReceiver};

/// How long `disable` waits for the leave message to be flushed
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signaling server URL (`ws://` or `wss://`)
    pub server_url: String,
    pub local_id: String,
    /// Bubble to join
    pub room_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}", crate::signaling::DEFAULT_PORT),
            local_id: uuid::Uuid::new_v4().to_string(),
            room_id: "lobby".to_string(),
        }
    }
}

/// A running voice session
pub struct VoiceSession {
    local_id: String,
    manager: Arc<Mutex<SessionManager>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: watch::Receiver<bool>,
}

impl VoiceSession {
    /// Join `config.room_id`.
    ///
    /// Capture is acquired before anything is sent; if it fails the
    /// connection is closed again and no `register` ever reaches the server.
    pub async fn start(
        config: SessionConfig,
        capture: &dyn CaptureDevice,
        factory: Arc<dyn PeerConnectionFactory>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, SessionError> {
        let connection = SignalingClient::new(&config.server_url).connect().await?;

        let local_media = match capture.acquire().await {
            Ok(media) => media,
            Err(e) => {
                warn!("Local capture unavailable: {}", e);
                if let Err(close_err) = connection.close().await {
                    debug!("Closing signaling connection failed: {}", close_err);
                }
                return Err(e);
            }
        };

        let (mut sender, receiver) = connection.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();

        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if let Err(e) = sender.send(&envelope).await {
                    warn!("Failed to send {}: {}", envelope.kind(), e);
                    break;
                }
            }
            let _ = sender.close().await;
        });

        outbound_tx
            .send(Envelope::Register {
                id: config.local_id.clone(),
                room_id: config.room_id.clone(),
            })
            .map_err(|_| SessionError::TransportClosed)?;

        info!(
            "Joining bubble {} as {} via {}",
            config.room_id, config.local_id, config.server_url
        );

        let manager = Arc::new(Mutex::new(SessionManager::new(
            &config.local_id,
            local_media,
            factory,
            sink,
            outbound_tx,
        )));

        let (closed_tx, closed) = watch::channel(false);
        let reader = tokio::spawn(read_loop(receiver, manager.clone(), closed_tx));

        Ok(Self {
            local_id: config.local_id,
            manager,
            reader,
            writer,
            closed,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Remote peers currently tracked
    pub async fn peer_ids(&self) -> Vec<String> {
        self.manager.lock().await.peer_ids()
    }

    pub fn manager(&self) -> Arc<Mutex<SessionManager>> {
        self.manager.clone()
    }

    /// Resolves once the signaling transport has closed
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Leave the bubble: stop capture, close every peer, send `leave`.
    pub async fn disable(self) {
        self.manager.lock().await.teardown().await;
        self.reader.abort();
        let _ = self.reader.await;

        // Dropping the manager releases the last outbound sender so the writer
        // flushes `leave` and closes the socket
        drop(self.manager);
        if tokio::time::timeout(FLUSH_TIMEOUT, self.writer).await.is_err() {
            debug!("Signaling writer did not finish in time");
        }
    }
}

async fn read_loop(
    mut receiver: SignalingReceiver,
    manager: Arc<Mutex<SessionManager>>,
    closed: watch::Sender<bool>,
) {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                debug!("Received {}", envelope.kind());
                manager.lock().await.handle_envelope(envelope).await;
            }
            Err(SignalingError::Protocol(e)) => {
                warn!("Dropping malformed envelope: {}", e);
            }
            Err(SignalingError::Closed) => {
                info!("Signaling server closed the connection");
                break;
            }
            Err(e) => {
                warn!("Signaling receive failed: {}", e);
                break;
            }
        }
    }

    manager.lock().await.teardown().await;
    closed.send_replace(true);
}
