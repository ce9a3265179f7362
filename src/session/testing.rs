//! In-memory stand-ins for the media collaborators

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::error::SessionError;
use super::media::{
    AudioSink, CaptureDevice, LocalMedia, MediaTrack, PeerConnection, PeerConnectionFactory,
    PeerObserver, RemoteAudio, SessionDescription,
};

/// Shared record of calls made on fake connections
#[derive(Debug, Clone, Default)]
pub struct FakeLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeLog {
    pub fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[derive(Debug)]
pub struct FakeTrack {
    stopped: AtomicBool,
    log: Option<FakeLog>,
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        "fake-audio"
    }

    fn kind(&self) -> &str {
        "audio"
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            if let Some(log) = &self.log {
                log.push("stop");
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn local_media() -> LocalMedia {
    LocalMedia::new(
        "fake-stream",
        vec![Arc::new(FakeTrack {
            stopped: AtomicBool::new(false),
            log: None,
        })],
    )
}

/// Local media whose track records `stop` in `log`
pub fn logged_media(log: &FakeLog) -> LocalMedia {
    LocalMedia::new(
        "fake-stream",
        vec![Arc::new(FakeTrack {
            stopped: AtomicBool::new(false),
            log: Some(log.clone()),
        })],
    )
}

/// Peer connection that records every call and fails the listed operations
pub struct FakeConnection {
    log: FakeLog,
    failing: Vec<&'static str>,
}

impl FakeConnection {
    pub fn new(log: &FakeLog) -> Self {
        Self {
            log: log.clone(),
            failing: Vec::new(),
        }
    }

    pub fn failing(mut self, op: &'static str) -> Self {
        self.failing.push(op);
        self
    }

    fn call(&self, op: &'static str, detail: Option<&Value>) -> Result<(), SessionError> {
        match detail.and_then(|d| d.get("type")).and_then(Value::as_str) {
            Some(kind) => self.log.push(format!("{}:{}", op, kind)),
            None => self.log.push(op),
        }
        if self.failing.contains(&op) {
            return Err(SessionError::Negotiation(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn attach_local_media(&self, _media: &LocalMedia) -> Result<(), SessionError> {
        self.call("attach", None)
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        self.call("create_offer", None)?;
        Ok(json!({"type": "offer", "sdp": "fake-offer"}))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        self.call("create_answer", None)?;
        Ok(json!({"type": "answer", "sdp": "fake-answer"}))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        self.call("set_local", Some(&desc))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        self.call("set_remote", Some(&desc))
    }

    async fn add_ice_candidate(&self, _candidate: Value) -> Result<(), SessionError> {
        self.call("add_ice", None)
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.call("close", None)
    }
}

/// Factory handing out [`FakeConnection`]s; every call is logged as `create:<id>`
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub log: FakeLog,
    pub observers: Arc<Mutex<Vec<PeerObserver>>>,
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        remote_id: &str,
        observer: PeerObserver,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        self.log.push(format!("create:{}", remote_id));
        self.observers.lock().push(observer);
        Ok(Box::new(FakeConnection::new(&self.log)))
    }
}

pub struct FakeCapture {
    pub deny: bool,
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn acquire(&self) -> Result<LocalMedia, SessionError> {
        if self.deny {
            return Err(SessionError::PermissionDenied("denied by test".to_string()));
        }
        Ok(local_media())
    }
}

pub struct NullSink;

impl AudioSink for NullSink {
    fn attach(&self, _remote_id: &str, _audio: Box<dyn RemoteAudio>) {}
}
