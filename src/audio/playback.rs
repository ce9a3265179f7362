//! Speaker playback of incoming voice tracks
//!
//! Every remote track is decoded from PCMU, resampled to the output device
//! rate and queued in its own ring buffer. The cpal output callback mixes all
//! queues into the device buffer. Like capture, the output stream is not
//! `Send` and lives on a dedicated thread until the sink is stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::codec::{AudioCodec, PcmuCodec, Resampler, PCMU_SAMPLE_RATE};
use super::device::find_output_device;
use super::error::AudioError;
use crate::session::{AudioSink, RemoteAudio};

/// Audio buffered per remote peer before new samples are dropped
const QUEUE_DURATION: Duration = Duration::from_millis(200);

/// Poll interval of the playback thread's stop check
const STOP_POLL: Duration = Duration::from_millis(50);

/// Turns PCMU payloads into mono samples at the output rate
pub struct FrameDecoder {
    codec: PcmuCodec,
    resampler: Resampler,
}

impl FrameDecoder {
    pub fn new(output_rate: u32) -> Self {
        Self {
            codec: PcmuCodec::new(),
            resampler: Resampler::new(PCMU_SAMPLE_RATE, output_rate),
        }
    }

    pub fn decode(&mut self, payload: &[u8]) -> Vec<f32> {
        let mut output = Vec::new();
        match self.codec.decode(payload) {
            Ok(samples) => self.resampler.process(&samples, &mut output),
            Err(e) => warn!("Dropping undecodable frame: {}", e),
        }
        output
    }
}

/// Per-peer queues summed into one output signal
#[derive(Default)]
pub struct Mixer {
    sources: Vec<(u64, HeapCons<f32>)>,
}

impl Mixer {
    fn add(&mut self, key: u64, source: HeapCons<f32>) {
        self.sources.push((key, source));
    }

    fn remove(&mut self, key: u64) {
        self.sources.retain(|(k, _)| *k != key);
    }

    /// Number of remote tracks currently mixed
    pub fn sources(&self) -> usize {
        self.sources.len()
    }

    /// Fill interleaved `out` with the mixed mono signal on every channel.
    /// Sources with nothing queued contribute silence.
    pub fn mix_into(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let mut sum = 0.0f32;
            for (_, source) in self.sources.iter_mut() {
                sum += source.try_pop().unwrap_or(0.0);
            }
            frame.fill(sum.clamp(-1.0, 1.0));
        }
    }
}

/// [`AudioSink`] that plays every remote peer through the speakers
#[derive(Clone)]
pub struct PlaybackSink {
    mixer: Arc<Mutex<Mixer>>,
    output_rate: u32,
    next_source: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

impl PlaybackSink {
    /// Open the named output device, or the default one, and start playing
    pub async fn start(device_name: Option<String>) -> Result<Self, AudioError> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mixer = mixer.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("bubblevoice-playback".to_string())
                .spawn(move || playback_thread(device_name, mixer, ready_tx, stop))
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
        }

        let output_rate = ready_rx
            .await
            .map_err(|_| AudioError::StreamError("Playback thread exited".to_string()))??;

        Ok(Self {
            mixer,
            output_rate,
            next_source: Arc::new(AtomicU64::new(1)),
            stop,
        })
    }

    /// A sink with no output device; audio is pulled with [`PlaybackSink::mix_into`]
    pub fn detached(output_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::default())),
            output_rate,
            next_source: Arc::new(AtomicU64::new(1)),
            stop: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Remote tracks currently playing
    pub fn active_sources(&self) -> usize {
        self.mixer.lock().sources()
    }

    pub fn mix_into(&self, out: &mut [f32], channels: usize) {
        self.mixer.lock().mix_into(out, channels);
    }

    /// Release the output device. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl AudioSink for PlaybackSink {
    fn attach(&self, remote_id: &str, audio: Box<dyn RemoteAudio>) {
        let key = self.next_source.fetch_add(1, Ordering::Relaxed);
        let capacity =
            (self.output_rate as u128 * QUEUE_DURATION.as_millis() / 1000).max(1) as usize;
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();
        self.mixer.lock().add(key, consumer);

        let mixer = self.mixer.clone();
        let mut decoder = FrameDecoder::new(self.output_rate);
        let remote_id = remote_id.to_string();

        tokio::spawn(async move {
            let track_id = audio.track_id();
            info!("Playing audio track {} from {}", track_id, remote_id);

            let mut dropped = 0usize;
            while let Some(frame) = audio.next_frame().await {
                let samples = decoder.decode(&frame);
                let queued = producer.push_slice(&samples);
                dropped += samples.len() - queued;
            }

            mixer.lock().remove(key);
            info!(
                "Audio track {} from {} ended ({} samples dropped on overrun)",
                track_id, remote_id, dropped
            );
        });
    }
}

/// Opens the device, reports the output rate, then keeps the stream alive
/// until the sink is stopped
fn playback_thread(
    device_name: Option<String>,
    mixer: Arc<Mutex<Mixer>>,
    ready: oneshot::Sender<Result<u32, AudioError>>,
    stop: Arc<AtomicBool>,
) {
    let (stream, sample_rate) = match open_stream(device_name.as_deref(), mixer) {
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
    info!("Speaker playback stopped");
}

fn open_stream(
    device_name: Option<&str>,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<(Stream, u32), AudioError> {
    let device = find_output_device(device_name)?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;

    info!(
        "Playing on {} at {} Hz, {} channel(s), {:?}",
        device.name().unwrap_or_default(),
        sample_rate,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &config, mixer)?,
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
    mixer: Arc<Mutex<Mixer>>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mixed: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mixed.resize(data.len(), 0.0);
                // Never block the audio callback; a contended mixer plays silence
                match mixer.try_lock() {
                    Some(mut mixer) => mixer.mix_into(&mut mixed, channels),
                    None => mixed.fill(0.0),
                }
                for (out, sample) in data.iter_mut().zip(mixed.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            |err: cpal::StreamError| error!("Playback stream error: {:?}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
