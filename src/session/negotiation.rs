//! Per-peer negotiation state machine
//!
//! ```text
//! [*] --> New
//! New --> HaveLocalOffer: start() as initiator
//! New --> HaveRemoteOffer: offer received, remote description set
//! HaveRemoteOffer --> Connected: answer sent
//! HaveLocalOffer --> Connected: answer received
//! any --> Closed: close()
//! ```
//!
//! Every step that fails is logged and leaves the state where it was. There
//! is no retry and no renegotiation.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::media::{LocalMedia, PeerConnection};
use crate::signaling::Envelope;

/// Negotiation role of the local side toward one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Deterministic tie-break: the lexicographically greater id initiates.
    ///
    /// Both ends compute the same assignment independently.
    pub fn for_pair(local_id: &str, remote_id: &str) -> Self {
        if local_id > remote_id {
            Self::Initiator
        } else {
            Self::Responder
        }
    }
}

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    /// Descriptions exchanged; media establishes on its own from here
    Connected,
    Closed,
}

impl NegotiationState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Offer/answer/ICE exchange with one remote peer
pub struct Negotiation {
    remote_id: String,
    role: Role,
    state: NegotiationState,
    connection: Box<dyn PeerConnection>,
    local_media: LocalMedia,
    media_attached: bool,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Negotiation {
    pub fn new(
        remote_id: &str,
        role: Role,
        connection: Box<dyn PeerConnection>,
        local_media: LocalMedia,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            role,
            state: NegotiationState::New,
            connection,
            local_media,
            media_attached: false,
            outbound,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Entry action. Initiators attach media and send an offer; responders wait.
    pub async fn start(&mut self) {
        if self.role != Role::Initiator || self.state != NegotiationState::New {
            return;
        }

        if !self.attach_media().await {
            return;
        }

        let offer = match self.connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Offer creation for {} failed: {}", self.remote_id, e);
                return;
            }
        };
        if let Err(e) = self.connection.set_local_description(offer.clone()).await {
            warn!("Setting local offer for {} failed: {}", self.remote_id, e);
            return;
        }

        if self.send(Envelope::Offer {
            to: self.remote_id.clone(),
            from: None,
            offer,
        }) {
            info!("Sent offer to {}", self.remote_id);
            self.state = NegotiationState::HaveLocalOffer;
        }
    }

    /// Remote offer received
    pub async fn handle_offer(&mut self, offer: Value) {
        if self.state != NegotiationState::New {
            debug!(
                "Ignoring offer from {} in state {:?}",
                self.remote_id, self.state
            );
            return;
        }

        if !self.attach_media().await {
            return;
        }

        if let Err(e) = self.connection.set_remote_description(offer).await {
            warn!("Applying offer from {} failed: {}", self.remote_id, e);
            return;
        }
        self.state = NegotiationState::HaveRemoteOffer;

        let answer = match self.connection.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Answer creation for {} failed: {}", self.remote_id, e);
                return;
            }
        };
        if let Err(e) = self.connection.set_local_description(answer.clone()).await {
            warn!("Setting local answer for {} failed: {}", self.remote_id, e);
            return;
        }

        if self.send(Envelope::Answer {
            to: self.remote_id.clone(),
            from: None,
            answer,
        }) {
            info!("Sent answer to {}", self.remote_id);
            self.state = NegotiationState::Connected;
        }
    }

    /// Remote answer received. Only meaningful after our own offer.
    pub async fn handle_answer(&mut self, answer: Value) {
        if self.state != NegotiationState::HaveLocalOffer {
            debug!(
                "Ignoring stale answer from {} in state {:?}",
                self.remote_id, self.state
            );
            return;
        }

        if let Err(e) = self.connection.set_remote_description(answer).await {
            warn!("Applying answer from {} failed: {}", self.remote_id, e);
            return;
        }

        info!("Negotiation with {} complete", self.remote_id);
        self.state = NegotiationState::Connected;
    }

    /// Remote ICE candidate received
    pub async fn handle_remote_candidate(&mut self, candidate: Value) {
        if self.state.is_closed() {
            return;
        }
        if let Err(e) = self.connection.add_ice_candidate(candidate).await {
            warn!("Adding ICE candidate from {} failed: {}", self.remote_id, e);
        }
    }

    /// Local ICE candidate gathered; relay it to the remote peer
    pub fn send_local_candidate(&mut self, candidate: Value) {
        if self.state.is_closed() {
            return;
        }
        self.send(Envelope::Ice {
            to: self.remote_id.clone(),
            from: None,
            ice: candidate,
        });
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = NegotiationState::Closed;
        if let Err(e) = self.connection.close().await {
            warn!("Closing connection to {} failed: {}", self.remote_id, e);
        }
        debug!("Closed negotiation with {}", self.remote_id);
    }

    async fn attach_media(&mut self) -> bool {
        if self.media_attached {
            return true;
        }
        match self.connection.attach_local_media(&self.local_media).await {
            Ok(()) => {
                self.media_attached = true;
                true
            }
            Err(e) => {
                warn!("Attaching local media for {} failed: {}", self.remote_id, e);
                false
            }
        }
    }

    fn send(&self, envelope: Envelope) -> bool {
        let kind = envelope.kind();
        if self.outbound.send(envelope).is_err() {
            warn!(
                "Signaling transport closed, {} to {} not sent",
                kind, self.remote_id
            );
            return false;
        }
        true
    }
}
