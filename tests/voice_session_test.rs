//! E2E tests for voice sessions over a real signaling server
//!
//! Media is replaced by in-memory fakes so the tests exercise membership,
//! role assignment and the offer/answer relay end to end.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use bubblevoice::session::{
    AudioSink, CaptureDevice, LocalMedia, MediaTrack, NegotiationState, PeerConnection,
    PeerConnectionFactory, PeerObserver, RemoteAudio, Role, SessionConfig, SessionError,
    VoiceSession,
};
use bubblevoice::signaling::{Router, SignalingServer};

#[derive(Debug, Default)]
struct TestTrack {
    stopped: AtomicBool,
}

impl MediaTrack for TestTrack {
    fn id(&self) -> &str {
        "test-audio"
    }

    fn kind(&self) -> &str {
        "audio"
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Capture that hands out one shared stream and counts acquisitions
#[derive(Clone)]
struct TestCapture {
    media: LocalMedia,
    acquired: Arc<AtomicUsize>,
}

impl TestCapture {
    fn new() -> Self {
        Self {
            media: LocalMedia::new("test-stream", vec![Arc::new(TestTrack::default())]),
            acquired: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CaptureDevice for TestCapture {
    async fn acquire(&self) -> Result<LocalMedia, SessionError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(self.media.clone())
    }
}

/// Connection that accepts everything and emits one local candidate per
/// local description
struct TestConnection {
    observer: PeerObserver,
}

#[async_trait]
impl PeerConnection for TestConnection {
    async fn attach_local_media(&self, _media: &LocalMedia) -> Result<(), SessionError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<Value, SessionError> {
        Ok(json!({"type": "offer", "sdp": "test-offer"}))
    }

    async fn create_answer(&self) -> Result<Value, SessionError> {
        Ok(json!({"type": "answer", "sdp": "test-answer"}))
    }

    async fn set_local_description(&self, _desc: Value) -> Result<(), SessionError> {
        self.observer
            .on_ice_candidate(json!({"candidate": "candidate:1 1 udp 1 127.0.0.1 9 typ host"}));
        Ok(())
    }

    async fn set_remote_description(&self, _desc: Value) -> Result<(), SessionError> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: Value) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

struct TestFactory;

#[async_trait]
impl PeerConnectionFactory for TestFactory {
    async fn create(
        &self,
        _remote_id: &str,
        observer: PeerObserver,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        Ok(Box::new(TestConnection { observer }))
    }
}

struct DiscardSink;

impl AudioSink for DiscardSink {
    fn attach(&self, _remote_id: &str, _audio: Box<dyn RemoteAudio>) {}
}

async fn start_test_server() -> (String, Arc<Router>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to ephemeral port");
    let addr = listener.local_addr().expect("Failed to get local address");
    let server = SignalingServer::new();
    let router = server.router();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (format!("ws://{}", addr), router)
}

async fn join(url: &str, id: &str, capture: &TestCapture) -> VoiceSession {
    VoiceSession::start(
        SessionConfig {
            server_url: url.to_string(),
            local_id: id.to_string(),
            room_id: "r1".to_string(),
        },
        capture,
        Arc::new(TestFactory),
        Arc::new(DiscardSink),
    )
    .await
    .expect("Failed to start session")
}

async fn wait_for_peers(session: &VoiceSession, expected: &[&str]) {
    for _ in 0..300 {
        if session.peer_ids().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "{} tracks {:?}, expected {:?}",
        session.local_id(),
        session.peer_ids().await,
        expected
    );
}

async fn wait_connected(session: &VoiceSession, remote_id: &str) -> Role {
    let manager = session.manager();
    let (role, mut state) = {
        let guard = manager.lock().await;
        let peer = guard.peer(remote_id).expect("peer tracked");
        (peer.role(), peer.subscribe())
    };
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == NegotiationState::Connected),
    )
    .await
    .expect("negotiation completes")
    .expect("actor alive");
    role
}

async fn wait_for_count(router: &Router, expected: usize) {
    for _ in 0..300 {
        if router.peer_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("router holds {} peers, expected {}", router.peer_count(), expected);
}

/// Test: Three peers form a full mesh
/// Given three sessions joining the same bubble one after another
/// When membership settles
/// Then every pair is negotiated with exactly one initiator
#[tokio::test]
async fn test_three_peers_form_full_mesh() {
    let (url, router) = start_test_server().await;

    let a = join(&url, "a", &TestCapture::new()).await;
    wait_for_count(&router, 1).await;
    let b = join(&url, "b", &TestCapture::new()).await;
    wait_for_count(&router, 2).await;
    let c = join(&url, "c", &TestCapture::new()).await;

    wait_for_peers(&a, &["b", "c"]).await;
    wait_for_peers(&b, &["a", "c"]).await;
    wait_for_peers(&c, &["a", "b"]).await;

    for (x, y) in [(&a, &b), (&a, &c), (&b, &c)] {
        let x_role = wait_connected(x, y.local_id()).await;
        let y_role = wait_connected(y, x.local_id()).await;
        assert_ne!(x_role, y_role, "{} / {}", x.local_id(), y.local_id());
        // The greater id initiates
        assert_eq!(y_role, Role::Initiator);
    }

    c.disable().await;
    b.disable().await;
    a.disable().await;
    wait_for_count(&router, 0).await;
}

/// Test: Leaving shrinks the mesh
/// Given "a" and "b" negotiated in one bubble
/// When b disables its session
/// Then a drops its entry for b and the server forgets b
#[tokio::test]
async fn test_disable_removes_peer_from_others() {
    let (url, router) = start_test_server().await;
    let capture_b = TestCapture::new();

    let a = join(&url, "a", &TestCapture::new()).await;
    wait_for_count(&router, 1).await;
    let b = join(&url, "b", &capture_b).await;

    wait_for_peers(&a, &["b"]).await;
    wait_connected(&a, "b").await;

    b.disable().await;

    wait_for_peers(&a, &[]).await;
    wait_for_count(&router, 1).await;
    assert!(capture_b.media.is_stopped());
    assert_eq!(capture_b.acquired.load(Ordering::SeqCst), 1);

    a.disable().await;
}

/// Test: Reconnecting with the same id renegotiates
/// Given "a" and "b" negotiated in one bubble
/// When a second session registers as "a" from a new connection
/// Then b rebuilds its peer for a, both reach Connected again, and the old
/// session leaving afterwards does not evict the new one
#[tokio::test]
async fn test_reconnect_with_same_id_renegotiates() {
    let (url, router) = start_test_server().await;

    let old_a = join(&url, "a", &TestCapture::new()).await;
    wait_for_count(&router, 1).await;
    let b = join(&url, "b", &TestCapture::new()).await;
    wait_connected(&old_a, "b").await;
    wait_connected(&b, "a").await;

    let new_a = join(&url, "a", &TestCapture::new()).await;
    wait_for_peers(&new_a, &["b"]).await;

    // a is the responder, so this needs a fresh offer from b
    assert_eq!(wait_connected(&new_a, "b").await, Role::Responder);
    assert_eq!(wait_connected(&b, "a").await, Role::Initiator);

    old_a.disable().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(router.room_members("r1"), vec!["a", "b"]);
    wait_for_peers(&b, &["a"]).await;

    new_a.disable().await;
    b.disable().await;
    wait_for_count(&router, 0).await;
}

/// Test: Server loss ends the session
/// Given a session in a bubble
/// When the signaling server's router drops the connection
/// Then wait_closed resolves and local media is stopped
#[tokio::test]
async fn test_server_loss_closes_session() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to ephemeral port");
    let addr = listener.local_addr().expect("Failed to get local address");
    let server_task = tokio::spawn(async move {
        // Accept a single connection and hang up after the upgrade
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                let _ = ws.close(None).await;
            }
        }
    });

    let capture = TestCapture::new();
    let session = join(&format!("ws://{}", addr), "a", &capture).await;

    tokio::time::timeout(Duration::from_secs(2), session.wait_closed())
        .await
        .expect("session notices the closed transport");
    assert!(capture.media.is_stopped());

    session.disable().await;
    let _ = server_task.await;
}
