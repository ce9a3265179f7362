//! Peer session manager
//!
//! Keeps the local view of the room and one negotiation per remote peer.
//! Membership notifications create and destroy peers; relayed envelopes are
//! routed into the owning peer's actor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::media::{AudioSink, LocalMedia, PeerConnectionFactory, PeerObserver};
use super::negotiation::{Negotiation, Role};
use super::peer::{PeerCommand, PeerHandle};
use crate::signaling::Envelope;

/// Owns every peer negotiation of the local participant
pub struct SessionManager {
    local_id: String,
    local_media: Option<LocalMedia>,
    peers: HashMap<String, PeerHandle>,
    factory: Arc<dyn PeerConnectionFactory>,
    sink: Arc<dyn AudioSink>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl SessionManager {
    /// `outbound` carries envelopes to the signaling transport.
    pub fn new(
        local_id: &str,
        local_media: LocalMedia,
        factory: Arc<dyn PeerConnectionFactory>,
        sink: Arc<dyn AudioSink>,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            local_id: local_id.to_string(),
            local_media: Some(local_media),
            peers: HashMap::new(),
            factory,
            sink,
            outbound,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn peer(&self, remote_id: &str) -> Option<&PeerHandle> {
        self.peers.get(remote_id)
    }

    /// Remote ids currently tracked, sorted
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// False once the session has been torn down
    pub fn is_active(&self) -> bool {
        self.local_media.is_some()
    }

    /// React to one envelope from the signaling server
    pub async fn handle_envelope(&mut self, envelope: Envelope) {
        if !self.is_active() {
            debug!("Session closed, ignoring {}", envelope.kind());
            return;
        }

        match envelope {
            Envelope::UserList { users } => {
                for id in users {
                    let role = Role::for_pair(&self.local_id, &id);
                    self.ensure_peer(&id, role).await;
                }
            }
            Envelope::UserJoined { id } => {
                let role = Role::for_pair(&self.local_id, &id);
                self.ensure_peer(&id, role).await;
            }
            Envelope::UserLeft { id } => {
                self.remove_peer(&id).await;
            }
            Envelope::Offer { from, offer, .. } => {
                self.deliver(from, PeerCommand::Offer(offer)).await;
            }
            Envelope::Answer { from, answer, .. } => {
                self.deliver(from, PeerCommand::Answer(answer)).await;
            }
            Envelope::Ice { from, ice, .. } => {
                self.deliver(from, PeerCommand::RemoteCandidate(ice)).await;
            }
            other => {
                debug!("Ignoring {} envelope", other.kind());
            }
        }
    }

    /// Create a negotiation for `remote_id` unless one already exists.
    ///
    /// Returns true if a new peer was created.
    pub async fn ensure_peer(&mut self, remote_id: &str, role: Role) -> bool {
        if remote_id == self.local_id || self.peers.contains_key(remote_id) {
            return false;
        }
        let Some(local_media) = self.local_media.clone() else {
            return false;
        };

        let (commands, inbox) = mpsc::unbounded_channel();
        let observer = PeerObserver::new(remote_id, commands.clone(), self.sink.clone());

        let connection = match self.factory.create(remote_id, observer).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Creating connection to {} failed: {}", remote_id, e);
                return false;
            }
        };

        info!("Tracking peer {} as {:?}", remote_id, role);

        let negotiation = Negotiation::new(
            remote_id,
            role,
            connection,
            local_media,
            self.outbound.clone(),
        );
        self.peers.insert(
            remote_id.to_string(),
            PeerHandle::spawn(negotiation, commands, inbox),
        );
        true
    }

    /// Destroy the negotiation for `remote_id`. Idempotent.
    pub async fn remove_peer(&mut self, remote_id: &str) {
        if let Some(peer) = self.peers.remove(remote_id) {
            info!("Peer {} left", remote_id);
            peer.close().await;
        }
    }

    /// Tear down the whole session.
    ///
    /// Stops local capture, closes every peer, then tells the server we left
    /// if the transport is still open. Safe to call more than once.
    pub async fn teardown(&mut self) {
        let Some(local_media) = self.local_media.take() else {
            return;
        };

        info!("Disabling voice session for {}", self.local_id);

        local_media.stop();

        for (_, peer) in self.peers.drain() {
            peer.close().await;
        }

        if self.outbound.is_closed() {
            debug!("Signaling transport already closed, skipping leave");
            return;
        }
        let _ = self.outbound.send(Envelope::Leave {
            id: self.local_id.clone(),
        });
    }

    async fn deliver(&mut self, from: Option<String>, command: PeerCommand) {
        let Some(from) = from else {
            debug!("Dropping relayed envelope without sender");
            return;
        };

        // An offer can race ahead of the membership notification for its sender
        if !self.peers.contains_key(&from) {
            self.ensure_peer(&from, Role::Responder).await;
        }

        match self.peers.get(&from) {
            Some(peer) => peer.send(command),
            None => debug!("No peer for sender {}, dropping", from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::negotiation::NegotiationState;
    use crate::session::testing::{local_media, logged_media, FakeFactory, NullSink};
    use serde_json::json;
    use std::time::Duration;

    fn manager(local_id: &str) -> (SessionManager, FakeFactory, mpsc::UnboundedReceiver<Envelope>) {
        let factory = FakeFactory::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = SessionManager::new(
            local_id,
            local_media(),
            Arc::new(factory.clone()),
            Arc::new(NullSink),
            tx,
        );
        (manager, factory, rx)
    }

    async fn wait_for_state(manager: &SessionManager, id: &str, expected: NegotiationState) {
        let mut rx = manager.peer(id).expect("peer tracked").subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == expected))
            .await
            .expect("state reached in time")
            .expect("actor alive");
    }

    #[tokio::test]
    async fn test_user_list_creates_peers_with_tie_break_roles() {
        let (mut m, _factory, _rx) = manager("m");

        m.handle_envelope(Envelope::UserList {
            users: vec!["a".to_string(), "z".to_string(), "m".to_string()],
        })
        .await;

        assert_eq!(m.peer_ids(), vec!["a", "z"]);
        assert_eq!(m.peer("a").unwrap().role(), Role::Initiator);
        assert_eq!(m.peer("z").unwrap().role(), Role::Responder);
    }

    #[tokio::test]
    async fn test_initiator_offer_reaches_outbound() {
        let (mut m, _factory, mut rx) = manager("b");

        m.handle_envelope(Envelope::UserJoined { id: "a".to_string() })
            .await;
        wait_for_state(&m, "a", NegotiationState::HaveLocalOffer).await;

        match rx.recv().await {
            Some(Envelope::Offer { to, .. }) => assert_eq!(to, "a"),
            other => panic!("Expected Offer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_notifications_create_one_peer() {
        let (mut m, factory, _rx) = manager("b");

        m.handle_envelope(Envelope::UserJoined { id: "a".to_string() })
            .await;
        m.handle_envelope(Envelope::UserList {
            users: vec!["a".to_string()],
        })
        .await;

        assert_eq!(m.peer_count(), 1);
        let creates = factory
            .log
            .calls()
            .iter()
            .filter(|c| c.starts_with("create:"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_offer_from_unknown_sender_creates_responder() {
        let (mut m, _factory, mut rx) = manager("z");

        m.handle_envelope(Envelope::Offer {
            to: "z".to_string(),
            from: Some("a".to_string()),
            offer: json!({"type": "offer", "sdp": "O"}),
        })
        .await;

        assert_eq!(m.peer("a").unwrap().role(), Role::Responder);
        wait_for_state(&m, "a", NegotiationState::Connected).await;
        assert!(matches!(rx.recv().await, Some(Envelope::Answer { to, .. }) if to == "a"));

        // The later membership notification does not replace the entry
        m.handle_envelope(Envelope::UserJoined { id: "a".to_string() })
            .await;
        assert_eq!(m.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_local_candidate_follows_offer() {
        let (mut m, factory, mut rx) = manager("b");

        m.handle_envelope(Envelope::UserJoined { id: "a".to_string() })
            .await;
        let observer = factory.observers.lock()[0].clone();
        observer.on_ice_candidate(json!({"candidate": "c1"}));

        assert!(matches!(rx.recv().await, Some(Envelope::Offer { .. })));
        assert!(matches!(rx.recv().await, Some(Envelope::Ice { .. })));
    }

    #[tokio::test]
    async fn test_user_left_removes_peer_idempotently() {
        let (mut m, factory, _rx) = manager("b");
        m.handle_envelope(Envelope::UserJoined { id: "a".to_string() })
            .await;

        m.handle_envelope(Envelope::UserLeft { id: "a".to_string() })
            .await;
        m.handle_envelope(Envelope::UserLeft { id: "a".to_string() })
            .await;

        assert_eq!(m.peer_count(), 0);
        assert_eq!(
            factory.log.calls().iter().filter(|c| *c == "close").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_relayed_envelope_without_sender_is_dropped() {
        let (mut m, _factory, _rx) = manager("b");

        m.handle_envelope(Envelope::Ice {
            to: "b".to_string(),
            from: None,
            ice: json!({}),
        })
        .await;

        assert_eq!(m.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_twice_leaves_no_peers() {
        let media = local_media();
        let factory = FakeFactory::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut m = SessionManager::new(
            "b",
            media.clone(),
            Arc::new(factory.clone()),
            Arc::new(NullSink),
            tx,
        );
        m.handle_envelope(Envelope::UserList {
            users: vec!["a".to_string(), "c".to_string()],
        })
        .await;

        m.teardown().await;
        m.teardown().await;

        assert_eq!(m.peer_count(), 0);
        assert!(!m.is_active());
        assert!(media.is_stopped());

        let mut leaves = 0;
        while let Ok(env) = rx.try_recv() {
            if matches!(env, Envelope::Leave { ref id } if id == "b") {
                leaves += 1;
            }
        }
        assert_eq!(leaves, 1);

        // Late envelopes no longer create peers
        m.handle_envelope(Envelope::UserJoined { id: "d".to_string() })
            .await;
        assert_eq!(m.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_stops_capture_then_closes_peers_then_leaves() {
        let factory = FakeFactory::default();
        let log = factory.log.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut m = SessionManager::new(
            "m",
            logged_media(&log),
            Arc::new(factory.clone()),
            Arc::new(NullSink),
            tx,
        );
        m.handle_envelope(Envelope::UserList {
            users: vec!["a".to_string(), "z".to_string()],
        })
        .await;

        // Outbound envelopes land in the same log as they are sent
        let recorder = {
            let log = log.clone();
            tokio::spawn(async move {
                while let Some(env) = rx.recv().await {
                    log.push(format!("send:{}", env.kind()));
                }
            })
        };
        wait_for_state(&m, "a", NegotiationState::HaveLocalOffer).await;

        m.teardown().await;
        drop(m);
        recorder.await.unwrap();

        let calls = log.calls();
        let position = |call: &str| calls.iter().position(|c| c == call);
        let stop = position("stop").expect("capture stopped");
        let leave = position("send:leave").expect("leave sent");
        let closes: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == "close")
            .map(|(i, _)| i)
            .collect();

        assert_eq!(closes.len(), 2, "{:?}", calls);
        assert!(closes.iter().all(|&i| stop < i && i < leave), "{:?}", calls);
        assert_eq!(calls.iter().filter(|c| *c == "stop").count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_skips_leave_when_transport_closed() {
        let (mut m, _factory, rx) = manager("b");
        drop(rx);

        m.teardown().await;

        assert!(!m.is_active());
    }
}
