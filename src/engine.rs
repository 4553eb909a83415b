use crate::error::Error;
use crate::message::{Candidate, SessionDescription};
use crate::peer_id::PeerId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// ICE connectivity state reported by the transport engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }
}

/// Notifications emitted by a transport engine session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionStateChanged(IceConnectionState),
    /// Local ICE candidate has been gathered and should be relayed to the remote peer.
    LocalCandidate(Candidate),
    DataReceived(String),
    DataChannelOpened,
    DataChannelClosed,
}

/// Sink for [EngineEvent]s. All events of a single engine session end up in one ordered queue.
#[derive(Clone)]
pub struct EngineEvents(Arc<dyn Fn(EngineEvent) -> bool + Send + Sync>);

impl EngineEvents {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(EngineEvent) -> bool + Send + Sync + 'static,
    {
        EngineEvents(Arc::new(f))
    }

    pub fn from_sender(sender: UnboundedSender<EngineEvent>) -> Self {
        EngineEvents::new(move |e| sender.send(e).is_ok())
    }

    /// Emits an event. Returns `false` if nobody is listening anymore.
    pub fn emit(&self, event: EngineEvent) -> bool {
        (self.0)(event)
    }
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EngineEvents")
    }
}

/// Single real-time transport session with one remote peer.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, Error>;

    async fn create_answer(&self) -> Result<SessionDescription, Error>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), Error>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), Error>;

    async fn has_local_description(&self) -> bool;

    async fn has_remote_description(&self) -> bool;

    /// Adds remote ICE candidate. Fails with [Error::NoRemoteDescription] when called before the
    /// remote description has been applied.
    async fn add_ice_candidate(&self, candidate: Candidate) -> Result<(), Error>;

    fn ice_connection_state(&self) -> IceConnectionState;

    /// Adds a receive-only audio transceiver, so that offers created afterwards ask the remote
    /// side for audio.
    async fn receive_audio(&self) -> Result<(), Error>;

    /// Opens a data channel from the local side. Remote side will be notified about it.
    async fn create_data_channel(&self, label: &str) -> Result<(), Error>;

    fn is_data_channel_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Creates [TransportEngine] sessions, one per remote peer.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        peer: &PeerId,
        events: EngineEvents,
    ) -> Result<Arc<dyn TransportEngine>, Error>;
}
