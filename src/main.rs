//! bubblevoice - Mesh voice chat for rooms

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bubblevoice::audio::{list_input_devices, MicrophoneCapture, PacketCountingSink, PlaybackSink};
use bubblevoice::rtc::{RtcConfig, WebRtcFactory};
use bubblevoice::session::{AudioSink, SessionConfig, VoiceSession};

#[derive(Parser)]
#[command(name = "bubblevoice")]
#[command(about = "Mesh voice chat for rooms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio devices
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },

    /// Join a bubble via a signaling server
    Join {
        /// Signaling server URL (e.g., ws://localhost:8080)
        #[arg(short, long, env = "BUBBLEVOICE_SERVER")]
        server: String,

        /// Bubble to join
        #[arg(short, long)]
        room: String,

        /// Peer id announced to the bubble (random if omitted)
        #[arg(long)]
        id: Option<String>,

        /// STUN server URL, may be repeated
        #[arg(long = "stun", env = "BUBBLEVOICE_STUN", value_delimiter = ',')]
        stun: Vec<String>,

        /// Input device name (use 'devices list' to see available devices)
        #[arg(long)]
        input_device: Option<String>,

        /// Output device name (default output device if omitted)
        #[arg(long)]
        output_device: Option<String>,

        /// Do not play incoming audio; only count received packets
        #[arg(long)]
        no_playback: bool,
    },
}

#[derive(Subcommand)]
enum DevicesAction {
    /// List input devices
    List,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))
}

fn list_devices() {
    println!("Input devices:");
    match list_input_devices() {
        Ok(devices) => {
            for device in devices {
                let default_marker = if device.is_default { " (default)" } else { "" };
                println!("  - {}{}", device.name, default_marker);
                if !device.supported_sample_rates.is_empty() {
                    println!("      rates: {:?}", device.supported_sample_rates);
                }
            }
        }
        Err(e) => {
            println!("  Error: {}", e);
        }
    }
}

struct JoinOptions {
    server: String,
    room: String,
    id: Option<String>,
    stun: Vec<String>,
    input_device: Option<String>,
    output_device: Option<String>,
    no_playback: bool,
}

/// Speaker playback unless disabled or no output device can be opened
async fn open_sink(
    output_device: Option<String>,
    no_playback: bool,
) -> (Arc<dyn AudioSink>, Option<PlaybackSink>) {
    if no_playback {
        return (Arc::new(PacketCountingSink::new()), None);
    }
    match PlaybackSink::start(output_device).await {
        Ok(playback) => (Arc::new(playback.clone()), Some(playback)),
        Err(e) => {
            warn!("Playback unavailable, counting packets only: {}", e);
            (Arc::new(PacketCountingSink::new()), None)
        }
    }
}

async fn run_join(options: JoinOptions) -> Result<()> {
    let config = SessionConfig {
        server_url: options.server,
        local_id: options
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        room_id: options.room,
    };
    let factory = Arc::new(WebRtcFactory::new(RtcConfig::with_stun_servers(
        &options.stun,
    )));
    let (sink, playback) = open_sink(options.output_device, options.no_playback).await;
    let capture = MicrophoneCapture::new(options.input_device);

    let room_id = config.room_id.clone();
    let session = match VoiceSession::start(config, &capture, factory, sink).await {
        Ok(session) => session,
        Err(e) => {
            if let Some(playback) = &playback {
                playback.stop();
            }
            return Err(e.into());
        }
    };

    println!("Joined bubble {} as {}", room_id, session.local_id());
    println!("Press Ctrl+C to leave");

    let mut status = tokio::time::interval(Duration::from_secs(5));
    let mut last_peers: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Leaving bubble");
                break;
            }
            _ = session.wait_closed() => {
                warn!("Signaling connection lost");
                break;
            }
            _ = status.tick() => {
                let peers = session.peer_ids().await;
                if peers != last_peers {
                    if peers.is_empty() {
                        println!("Alone in bubble {}", room_id);
                    } else {
                        println!("Peers in bubble {}: {}", room_id, peers.join(", "));
                    }
                    last_peers = peers;
                }
            }
        }
    }

    session.disable().await;
    if let Some(playback) = playback {
        playback.stop();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Devices { action } => match action {
            DevicesAction::List => list_devices(),
        },
        Commands::Join {
            server,
            room,
            id,
            stun,
            input_device,
            output_device,
            no_playback,
        } => {
            run_join(JoinOptions {
                server,
                room,
                id,
                stun,
                input_device,
                output_device,
                no_playback,
            })
            .await?;
        }
    }

    Ok(())
}
