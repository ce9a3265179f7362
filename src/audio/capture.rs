//! Microphone capture feeding the outgoing voice track
//!
//! The cpal stream is not `Send`, so it lives on its own thread for the
//! lifetime of the track. Raw callbacks are forwarded as mono f32 chunks to a
//! tokio task that resamples, frames and encodes them into the shared
//! [`WebRtcAudioTrack`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::codec::{
    downmix, AudioCodec, PcmuCodec, Resampler, PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE,
};
use super::device::find_input_device;
use super::error::AudioError;
use crate::rtc::WebRtcAudioTrack;
use crate::session::{CaptureDevice, LocalMedia, MediaTrack, SessionError};

/// Duration of one encoded frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Poll interval of the capture thread's stop check
const STOP_POLL: Duration = Duration::from_millis(50);

/// Default microphone as a [`CaptureDevice`]
#[derive(Debug, Clone, Default)]
pub struct MicrophoneCapture {
    device_name: Option<String>,
}

impl MicrophoneCapture {
    /// Capture from the named input device, or the default one
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl CaptureDevice for MicrophoneCapture {
    async fn acquire(&self) -> Result<LocalMedia, SessionError> {
        let stream_id = format!("bubblevoice-{}", uuid::Uuid::new_v4());
        let track = Arc::new(WebRtcAudioTrack::new("audio", &stream_id));

        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let device_name = self.device_name.clone();
        let stop = track.stop_flag();

        thread::Builder::new()
            .name("bubblevoice-capture".to_string())
            .spawn(move || capture_thread(device_name, samples_tx, ready_tx, stop))
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| AudioError::StreamError("Capture thread exited".to_string()))??;

        tokio::spawn(pump(samples_rx, FrameEncoder::new(sample_rate), track.clone()));

        let local: Arc<dyn MediaTrack> = track;
        Ok(LocalMedia::new(stream_id, vec![local]))
    }
}

/// Opens the device, reports the capture rate, then keeps the stream alive
/// until the track is stopped
fn capture_thread(
    device_name: Option<String>,
    samples: mpsc::UnboundedSender<Vec<f32>>,
    ready: oneshot::Sender<Result<u32, AudioError>>,
    stop: Arc<AtomicBool>,
) {
    let (stream, sample_rate) = match open_stream(device_name.as_deref(), samples) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(sample_rate)).is_err() {
        return;
    }

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(STOP_POLL);
    }

    drop(stream);
    info!("Microphone capture stopped");
}

fn open_stream(
    device_name: Option<&str>,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(Stream, u32), AudioError> {
    let device = find_input_device(device_name)?;
    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;

    info!(
        "Capturing from {} at {} Hz, {} channel(s), {:?}",
        device.name().unwrap_or_default(),
        sample_rate,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, samples)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, samples)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, samples)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, samples)?,
        other => {
            return Err(AudioError::UnsupportedConfig(format!(
                "Sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let raw: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
                let _ = samples.send(downmix(&raw, channels));
            },
            |err: cpal::StreamError| error!("Capture stream error: {:?}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

async fn pump(
    mut samples: mpsc::UnboundedReceiver<Vec<f32>>,
    mut encoder: FrameEncoder,
    track: Arc<WebRtcAudioTrack>,
) {
    let mut frames = 0u64;
    while let Some(chunk) = samples.recv().await {
        if track.is_stopped() {
            break;
        }
        for frame in encoder.push(&chunk) {
            track.write_frame(Bytes::from(frame), FRAME_DURATION).await;
            frames += 1;
        }
    }
    debug!("Capture pump finished after {} frames", frames);
}

/// Turns mono chunks at the capture rate into 20 ms PCMU frames
pub struct FrameEncoder {
    resampler: Resampler,
    codec: PcmuCodec,
    pending: Vec<f32>,
}

impl FrameEncoder {
    pub fn new(input_rate: u32) -> Self {
        Self {
            resampler: Resampler::new(input_rate, PCMU_SAMPLE_RATE),
            codec: PcmuCodec::new(),
            pending: Vec::with_capacity(PCMU_FRAME_SAMPLES * 2),
        }
    }

    /// Feed a chunk; returns every frame completed by it
    pub fn push(&mut self, mono: &[f32]) -> Vec<Vec<u8>> {
        self.resampler.process(mono, &mut self.pending);

        let mut frames = Vec::new();
        while self.pending.len() >= PCMU_FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..PCMU_FRAME_SAMPLES).collect();
            match self.codec.encode(&frame) {
                Ok(encoded) => frames.push(encoded),
                Err(e) => warn!("Dropping frame: {}", e),
            }
        }
        frames
    }

    /// Resampled samples waiting for a full frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
