//! Receive-only sink for incoming audio
//!
//! Drains every remote track and keeps per-peer receive counters without
//! touching an output device.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::session::{AudioSink, RemoteAudio};

/// Packets between periodic receive logs (5 s of 20 ms frames)
const LOG_INTERVAL_PACKETS: u64 = 250;

/// Receive statistics for one remote peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub packets: u64,
    pub bytes: u64,
    /// Tracks that have ended
    pub ended_tracks: u32,
}

/// [`AudioSink`] that counts what it receives
#[derive(Clone, Default)]
pub struct PacketCountingSink {
    stats: Arc<Mutex<HashMap<String, ReceiveStats>>>,
}

impl PacketCountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, remote_id: &str) -> Option<ReceiveStats> {
        self.stats.lock().get(remote_id).copied()
    }
}

impl AudioSink for PacketCountingSink {
    fn attach(&self, remote_id: &str, audio: Box<dyn RemoteAudio>) {
        let stats = self.stats.clone();
        let remote_id = remote_id.to_string();
        stats.lock().entry(remote_id.clone()).or_default();

        tokio::spawn(async move {
            let track_id = audio.track_id();
            info!("Receiving audio track {} from {}", track_id, remote_id);

            while let Some(frame) = audio.next_frame().await {
                let mut guard = stats.lock();
                let entry = guard.entry(remote_id.clone()).or_default();
                entry.packets += 1;
                entry.bytes += frame.len() as u64;
                if entry.packets % LOG_INTERVAL_PACKETS == 0 {
                    debug!(
                        "{}: {} packets, {} bytes received",
                        remote_id, entry.packets, entry.bytes
                    );
                }
            }

            let mut guard = stats.lock();
            let entry = guard.entry(remote_id.clone()).or_default();
            entry.ended_tracks += 1;
            info!(
                "Audio track {} from {} ended after {} packets",
                track_id, remote_id, entry.packets
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    struct ScriptedAudio {
        frames: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl RemoteAudio for ScriptedAudio {
        fn track_id(&self) -> String {
            "scripted".to_string()
        }

        async fn next_frame(&self) -> Option<Bytes> {
            self.frames.lock().pop()
        }
    }

    #[tokio::test]
    async fn test_counts_packets_until_track_ends() {
        let sink = PacketCountingSink::new();
        let audio = ScriptedAudio {
            frames: Mutex::new(vec![Bytes::from_static(&[0xFF; 160]); 3]),
        };

        sink.attach("peer", Box::new(audio));

        for _ in 0..100 {
            if sink.stats("peer").map(|s| s.ended_tracks) == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            sink.stats("peer"),
            Some(ReceiveStats {
                packets: 3,
                bytes: 480,
                ended_tracks: 1,
            })
        );
        assert_eq!(sink.stats("other"), None);
    }
}
