use crate::peer_id::PeerId;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// There's no negotiation registered for a given peer. Returned when the caller addresses a
    /// peer it never connected to.
    #[error("no negotiation exists for peer {0}")]
    PeerNotFound(PeerId),
    #[error("signalling connection is not open")]
    NotConnected,
    #[error("remote description has not been set yet")]
    NoRemoteDescription,
    #[error("data channel is not open")]
    DataChannelNotOpen,
    #[error("malformed payload: {0}")]
    Codec(Arc<serde_json::Error>),
    #[error("websocket failure: {0}")]
    WebSocket(Arc<tungstenite::Error>),
    #[error(transparent)]
    WebRtc(Arc<webrtc::Error>),
    #[error("transport session task failed: {0}")]
    Task(Arc<JoinError>),
}

impl Error {
    pub fn channel_closed() -> Self {
        Error::DataChannelNotOpen
    }

    /// Transient errors are expected to happen while negotiation is still in progress, ie. ICE
    /// candidates arriving before the remote description. They don't break the negotiation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NoRemoteDescription)
    }
}

impl From<webrtc::Error> for Error {
    fn from(value: webrtc::Error) -> Self {
        Error::WebRtc(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Codec(Arc::new(value))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(value: tungstenite::Error) -> Self {
        Error::WebSocket(Arc::new(value))
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::Task(Arc::new(value))
    }
}
