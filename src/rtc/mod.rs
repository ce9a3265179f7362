//! WebRTC media backend
//!
//! Implements the session's media traits on top of the `webrtc` crate:
//! SDP blobs use the browser `{type, sdp}` shape and ICE candidates the
//! `RTCIceCandidateInit` JSON shape, so native and browser peers interoperate.

mod config;
mod connection;
mod track;

pub use config::{IceServerConfig, RtcConfig, DEFAULT_STUN_SERVER};
pub use connection::{WebRtcFactory, WebRtcPeerConnection};
pub use track::{RtpRemoteAudio, WebRtcAudioTrack, PCMU_CLOCK_RATE};
