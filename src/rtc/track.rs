//! Audio tracks bridging the session traits to webrtc

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::session::{MediaTrack, RemoteAudio};

/// G.711 clock rate
pub const PCMU_CLOCK_RATE: u32 = 8000;

/// Local audio track fed with µ-law frames
pub struct WebRtcAudioTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    stopped: Arc<AtomicBool>,
}

impl WebRtcAudioTrack {
    pub fn new(track_id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_CLOCK_RATE,
                channels: 1,
                ..Default::default()
            },
            track_id.to_owned(),
            stream_id.to_owned(),
        ));

        Self {
            id: track_id.to_string(),
            track,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Underlying webrtc track, shared by every peer connection it is added to
    pub fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Flag observed by the producer; set once the track is stopped
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// Write one encoded frame. Frames after `stop` are discarded.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) {
        if self.is_stopped() {
            return;
        }
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        if let Err(e) = self.track.write_sample(&sample).await {
            debug!("Dropping audio frame on {}: {}", self.id, e);
        }
    }
}

impl MediaTrack for WebRtcAudioTrack {
    fn id(&self) -> &str {
        &self.id
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

impl fmt::Debug for WebRtcAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcAudioTrack")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Incoming track from a remote peer
pub struct RtpRemoteAudio {
    track: Arc<TrackRemote>,
}

impl RtpRemoteAudio {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl RemoteAudio for RtpRemoteAudio {
    fn track_id(&self) -> String {
        self.track.id()
    }

    async fn next_frame(&self) -> Option<Bytes> {
        match self.track.read_rtp().await {
            Ok((packet, _)) => Some(packet.payload),
            Err(e) => {
                debug!("Remote track {} ended: {}", self.track.id(), e);
                None
            }
        }
    }
}
