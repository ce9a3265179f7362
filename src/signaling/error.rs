//! Signaling error types

use thiserror::Error;

/// Errors that can occur in the signaling subsystem
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind failed: {0}")]
    Bind(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Malformed envelope: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection closed")]
    Closed,
}
