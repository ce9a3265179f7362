//! WebRTC transport configuration

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// One STUN/TURN server entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServerConfig {
    /// Server without credentials (plain STUN)
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            ..Default::default()
        }
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServerConfig>,
}

impl RtcConfig {
    /// Configuration using the given STUN urls, or the default server if empty
    pub fn with_stun_servers(urls: &[String]) -> Self {
        if urls.is_empty() {
            return Self::default();
        }
        Self {
            ice_servers: urls.iter().map(|u| IceServerConfig::stun(u)).collect(),
        }
    }

    pub(crate) fn to_rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
        }
    }
}
