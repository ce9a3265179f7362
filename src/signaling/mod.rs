//! Signaling relay and client
//!
//! The server side keeps a presence directory of registered peers, partitions
//! them into rooms and relays negotiation envelopes between members of the
//! same room. The client side is a thin WebSocket wrapper speaking the same
//! envelopes.

mod client;
mod directory;
mod error;
mod message;
mod router;
mod server;
mod tls;

pub use client::{SignalingClient, SignalingConnection, SignalingReceiver, SignalingSender};
pub use directory::{ConnectionHandle, ConnectionId, PeerRecord, PresenceDirectory};
pub use error::SignalingError;
pub use message::Envelope;
pub use router::{Router, OUTBOUND_QUEUE_CAPACITY};
pub use server::SignalingServer;
pub use tls::{create_tls_acceptor, load_certs, load_key};

/// Default signaling port
pub const DEFAULT_PORT: u16 = 8080;
