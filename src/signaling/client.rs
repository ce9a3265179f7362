//! Signaling client for connecting to a signaling server

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::error::SignalingError;
use super::message::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Signaling client for connecting to a signaling server
pub struct SignalingClient {
    server_url: String,
}

impl SignalingClient {
    /// Create a new signaling client
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Connect to the signaling server
    pub async fn connect(&self) -> Result<SignalingConnection, SignalingError> {
        let (ws_stream, _) = connect_async(self.server_url.as_str())
            .await
            .map_err(|e| SignalingError::WebSocket(format!("Connect failed: {}", e)))?;

        debug!("Connected to signaling server: {}", self.server_url);

        Ok(SignalingConnection { ws_stream })
    }
}

/// An active connection to the signaling server
pub struct SignalingConnection {
    ws_stream: WsStream,
}

impl SignalingConnection {
    /// Send an envelope to the server
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), SignalingError> {
        send_envelope(&mut self.ws_stream, envelope).await
    }

    /// Receive the next envelope from the server.
    ///
    /// A frame that fails to decode yields [`SignalingError::Protocol`]; the
    /// connection stays usable.
    pub async fn recv(&mut self) -> Result<Envelope, SignalingError> {
        recv_envelope(&mut self.ws_stream).await
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<(), SignalingError> {
        self.ws_stream
            .close(None)
            .await
            .map_err(|e| SignalingError::WebSocket(format!("Close failed: {}", e)))
    }

    /// Split into independently owned send and receive halves
    pub fn split(self) -> (SignalingSender, SignalingReceiver) {
        let (sink, stream) = self.ws_stream.split();
        (SignalingSender { sink }, SignalingReceiver { stream })
    }
}

/// Send half of a [`SignalingConnection`]
pub struct SignalingSender {
    sink: SplitSink<WsStream, Message>,
}

impl SignalingSender {
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), SignalingError> {
        send_envelope(&mut self.sink, envelope).await
    }

    pub async fn close(mut self) -> Result<(), SignalingError> {
        self.sink
            .close()
            .await
            .map_err(|e| SignalingError::WebSocket(format!("Close failed: {}", e)))
    }
}

/// Receive half of a [`SignalingConnection`]
pub struct SignalingReceiver {
    stream: SplitStream<WsStream>,
}

impl SignalingReceiver {
    pub async fn recv(&mut self) -> Result<Envelope, SignalingError> {
        recv_envelope(&mut self.stream).await
    }
}

async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<(), SignalingError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = envelope.to_json()?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| SignalingError::WebSocket(format!("Send failed: {}", e)))
}

async fn recv_envelope<S>(stream: &mut S) -> Result<Envelope, SignalingError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Envelope::parse(&text),
            Some(Ok(Message::Close(_))) | None => return Err(SignalingError::Closed),
            Some(Err(e)) => {
                return Err(SignalingError::WebSocket(format!("Receive failed: {}", e)));
            }
            _ => continue,
        }
    }
}
