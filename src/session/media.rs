//! Media collaborators consumed by the session
//!
//! The session never touches audio devices or the peer-to-peer transport
//! directly. It talks to them through these traits: a [`CaptureDevice`]
//! yields the local stream once per session, a [`PeerConnectionFactory`]
//! builds one [`PeerConnection`] per remote peer, and an [`AudioSink`]
//! receives each remote peer's incoming audio.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::error::SessionError;
use super::peer::PeerCommand;

/// Opaque session description blob (`{"type": ..., "sdp": ...}`)
pub type SessionDescription = Value;

/// Opaque ICE candidate blob
pub type IceCandidate = Value;

/// One local media track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Media kind, e.g. `"audio"`
    fn kind(&self) -> &str;

    /// Stop producing media. Idempotent.
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Backend access to the concrete track type
    fn as_any(&self) -> &dyn Any;
}

struct LocalMediaInner {
    stream_id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

/// The local capture stream
///
/// Cloning shares the same tracks; it never duplicates the capture.
#[derive(Clone)]
pub struct LocalMedia {
    inner: Arc<LocalMediaInner>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            inner: Arc::new(LocalMediaInner {
                stream_id: stream_id.into(),
                tracks,
            }),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.inner.tracks
    }

    /// Stop every track of the stream
    pub fn stop(&self) {
        for track in &self.inner.tracks {
            track.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.tracks.iter().all(|t| t.is_stopped())
    }

    /// True if both handles refer to the same capture stream
    pub fn same_stream(&self, other: &LocalMedia) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.inner.stream_id)
            .field("tracks", &self.inner.tracks.len())
            .finish()
    }
}

/// Source of the local capture stream
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire the local stream. Denied access is [`SessionError::PermissionDenied`].
    async fn acquire(&self) -> Result<LocalMedia, SessionError>;
}

/// Negotiated media connection to one remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach every track of the local stream
    async fn attach_local_media(&self, media: &LocalMedia) -> Result<(), SessionError>;

    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), SessionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError>;

    /// Release the connection. Safe to call more than once.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Builds peer connections
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        remote_id: &str,
        observer: PeerObserver,
    ) -> Result<Box<dyn PeerConnection>, SessionError>;
}

/// Incoming audio from one remote peer
#[async_trait]
pub trait RemoteAudio: Send + Sync {
    fn track_id(&self) -> String;

    /// Next encoded audio frame, or `None` once the track has ended
    async fn next_frame(&self) -> Option<Bytes>;
}

/// Consumer of incoming audio
pub trait AudioSink: Send + Sync {
    fn attach(&self, remote_id: &str, audio: Box<dyn RemoteAudio>);
}

/// Callbacks from a peer connection back into the session
///
/// Locally gathered ICE candidates are queued behind the negotiation step that
/// produced them, so a candidate is never sent ahead of its offer or answer.
#[derive(Clone)]
pub struct PeerObserver {
    remote_id: String,
    commands: mpsc::UnboundedSender<PeerCommand>,
    sink: Arc<dyn AudioSink>,
}

impl PeerObserver {
    pub(crate) fn new(
        remote_id: &str,
        commands: mpsc::UnboundedSender<PeerCommand>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            commands,
            sink,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// A local ICE candidate was gathered
    pub fn on_ice_candidate(&self, candidate: IceCandidate) {
        if self
            .commands
            .send(PeerCommand::LocalCandidate(candidate))
            .is_err()
        {
            debug!("Dropping local candidate for closed peer {}", self.remote_id);
        }
    }

    /// Remote audio arrived
    pub fn on_remote_audio(&self, audio: Box<dyn RemoteAudio>) {
        debug!(
            "Remote track {} from peer {}",
            audio.track_id(),
            self.remote_id
        );
        self.sink.attach(&self.remote_id, audio);
    }
}
