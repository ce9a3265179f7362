//! Client-side voice session
//!
//! One [`Negotiation`] per remote peer, each driven by its own actor, owned by
//! a [`SessionManager`] that follows the room's membership. [`VoiceSession`]
//! ties the manager to a signaling connection and the local capture stream.

mod error;
mod manager;
mod media;
mod negotiation;
mod peer;
mod voice;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SessionError;
pub use manager::SessionManager;
pub use media::{
    AudioSink, CaptureDevice, IceCandidate, LocalMedia, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerObserver, RemoteAudio, SessionDescription,
};
pub use negotiation::{Negotiation, NegotiationState, Role};
pub use peer::PeerHandle;
pub use voice::{SessionConfig, VoiceSession};
