use std::sync::Arc;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:9898/";
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "msgChannel";

#[derive(Debug, Clone)]
pub struct Options {
    /// Address of the signalling server.
    pub server_url: String,
    /// STUN/TURN server urls used by every peer connection.
    pub ice_servers: Vec<String>,
    pub ice_candidate_pool_size: u8,
    /// Label of the data channel opened by the initiating side.
    pub data_channel_label: Arc<str>,
    /// Whether offers ask the remote side for an audio stream.
    pub receive_audio: bool,
    /// How long a single peer negotiation may take before it's abandoned. `None` waits forever.
    pub negotiation_timeout: Option<Duration>,
}

impl Options {
    pub fn with_server(url: &str) -> Self {
        Options {
            server_url: url.to_owned(),
            ..Options::default()
        }
    }

    pub fn with_ice_servers(mut self, urls: &[&str]) -> Self {
        self.ice_servers = urls.iter().map(|&url| url.to_owned()).collect();
        self
    }

    pub fn with_data_channel_label(mut self, label: &str) -> Self {
        self.data_channel_label = Arc::from(label);
        self
    }

    pub fn with_receive_audio(mut self, receive_audio: bool) -> Self {
        self.receive_audio = receive_audio;
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ice_candidate_pool_size: self.ice_candidate_pool_size,
            ..Default::default()
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            ice_servers: vec![
                "stun:stun1.l.google.com:19302".to_owned(),
                "stun:stun2.l.google.com:19302".to_owned(),
            ],
            ice_candidate_pool_size: 10,
            data_channel_label: Arc::from(DEFAULT_DATA_CHANNEL_LABEL),
            receive_audio: true,
            negotiation_timeout: Some(Duration::from_secs(30)),
        }
    }
}
