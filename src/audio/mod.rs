//! Local audio
//!
//! Microphone capture into the outgoing PCMU track, the codec it uses, and
//! the sinks for incoming tracks: speaker playback and a packet counter.

mod capture;
mod codec;
mod device;
mod error;
mod playback;
mod sink;

pub use capture::{FrameEncoder, MicrophoneCapture, FRAME_DURATION};
pub use codec::{
    downmix, linear_to_ulaw, ulaw_to_linear, AudioCodec, CodecError, PcmuCodec, Resampler,
    PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE,
};
pub use device::{find_input_device, find_output_device, list_input_devices, AudioDevice};
pub use error::AudioError;
pub use playback::{FrameDecoder, Mixer, PlaybackSink};
pub use sink::{PacketCountingSink, ReceiveStats};
