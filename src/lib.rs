//! bubblevoice - Mesh voice chat for rooms ("bubbles")
//!
//! A lightweight signaling relay partitions connected peers into isolated
//! rooms and forwards negotiation messages between peer pairs. Each client
//! runs one negotiation state machine per remote peer and connects directly
//! to every other member of its room.

pub mod audio;
pub mod rtc;
pub mod session;
pub mod signaling;

pub use session::{Role, SessionManager, VoiceSession};
pub use signaling::{Envelope, Router, SignalingServer};
