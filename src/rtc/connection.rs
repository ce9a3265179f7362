//! Peer connections backed by the `webrtc` crate

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::config::RtcConfig;
use super::track::{RtpRemoteAudio, WebRtcAudioTrack};
use crate::session::{
    IceCandidate, LocalMedia, PeerConnection, PeerConnectionFactory, PeerObserver,
    SessionDescription, SessionError,
};

fn rtc_error(context: &str, e: webrtc::Error) -> SessionError {
    SessionError::Connection(format!("{}: {}", context, e))
}

/// Builds a fresh webrtc stack per remote peer
#[derive(Debug, Clone, Default)]
pub struct WebRtcFactory {
    config: RtcConfig,
}

impl WebRtcFactory {
    pub fn new(config: RtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        remote_id: &str,
        observer: PeerObserver,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        let connection = WebRtcPeerConnection::new(&self.config, observer).await?;
        debug!("Created peer connection for {}", remote_id);
        Ok(Box::new(connection))
    }
}

/// One `RTCPeerConnection` toward a remote peer
pub struct WebRtcPeerConnection {
    remote_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcPeerConnection {
    pub async fn new(config: &RtcConfig, observer: PeerObserver) -> Result<Self, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| rtc_error("Codec registration failed", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| rtc_error("Interceptor registration failed", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(config.to_rtc_configuration())
                .await
                .map_err(|e| rtc_error("Peer connection creation failed", e))?,
        );

        let remote_id = observer.remote_id().to_string();

        let state_id = remote_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let id = state_id.clone();
                Box::pin(async move {
                    info!("Peer connection state for {}: {}", id, s);
                })
            },
        ));

        let ice_observer = observer.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let observer = ice_observer.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                match serde_json::to_value(&init) {
                    Ok(value) => observer.on_ice_candidate(value),
                    Err(e) => debug!("Unencodable local candidate: {}", e),
                }
            })
        }));

        let track_observer = observer;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let observer = track_observer.clone();
                Box::pin(async move {
                    observer.on_remote_audio(Box::new(RtpRemoteAudio::new(track)));
                })
            },
        ));

        Ok(Self {
            remote_id,
            peer_connection,
        })
    }

    async fn attach_track(&self, track: &WebRtcAudioTrack) -> Result<(), SessionError> {
        let local: Arc<dyn TrackLocal + Send + Sync> = track.local_track();
        let rtp_sender = self
            .peer_connection
            .add_track(local)
            .await
            .map_err(|e| rtc_error("Adding track failed", e))?;

        // RTCP must be drained for the interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn attach_local_media(&self, media: &LocalMedia) -> Result<(), SessionError> {
        for track in media.tracks() {
            let Some(audio) = track.as_any().downcast_ref::<WebRtcAudioTrack>() else {
                return Err(SessionError::Connection(format!(
                    "Unsupported local track {}",
                    track.id()
                )));
            };
            self.attach_track(audio).await?;
        }
        debug!(
            "Attached stream {} to connection with {}",
            media.stream_id(),
            self.remote_id
        );
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| rtc_error("Offer creation failed", e))?;
        Ok(description_to_value(&offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| rtc_error("Answer creation failed", e))?;
        Ok(description_to_value(&answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        let desc = value_to_description(&desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| rtc_error("Setting local description failed", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        let desc = value_to_description(&desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| rtc_error("Setting remote description failed", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|e| SessionError::Negotiation(format!("Invalid ICE candidate: {}", e)))?;
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| rtc_error("Adding ICE candidate failed", e))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| rtc_error("Close failed", e))
    }
}

/// `{type, sdp}` as produced by browsers' `RTCSessionDescription`
fn description_to_value(desc: &RTCSessionDescription) -> Value {
    json!({
        "type": desc.sdp_type.to_string(),
        "sdp": desc.sdp,
    })
}

fn value_to_description(value: &Value) -> Result<RTCSessionDescription, SessionError> {
    let sdp = value
        .get("sdp")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::Negotiation("Description without sdp".to_string()))?
        .to_string();

    let result = match value.get("type").and_then(Value::as_str) {
        Some("offer") => RTCSessionDescription::offer(sdp),
        Some("answer") => RTCSessionDescription::answer(sdp),
        Some("pranswer") => RTCSessionDescription::pranswer(sdp),
        other => {
            return Err(SessionError::Negotiation(format!(
                "Unsupported description type {:?}",
                other
            )))
        }
    };
    result.map_err(|e| SessionError::Negotiation(format!("Invalid sdp: {}", e)))
}
