//! Session error types

use thiserror::Error;

use crate::signaling::SignalingError;

/// Errors that can occur in the client session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Peer connection error: {0}")]
    Connection(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Signaling transport closed")]
    TransportClosed,
}
