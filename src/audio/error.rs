//! Audio error types

use thiserror::Error;

use crate::session::SessionError;

/// Errors that can occur in the audio subsystem
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Any failure to open the microphone means the session has no local audio
impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::PermissionDenied(err.to_string())
    }
}
