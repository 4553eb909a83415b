use crate::peer_id::PeerId;
use serde::{Deserialize, Serialize};

/// Session description produced and consumed by the transport engine. Signalling layer treats it
/// as an opaque JSON value and passes it through unmodified.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub serde_json::Value);

/// ICE candidate produced and consumed by the transport engine. Just like [SessionDescription]
/// it's never interpreted by the signalling layer.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(pub serde_json::Value);

/// Messages exchanged with the signalling server. Every message is a JSON object tagged with an
/// `event` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignallingMessage {
    /// Signalling server accepted our connection and assigned us an identity.
    Connected {
        #[serde(rename = "uuid")]
        id: PeerId,
    },
    Closed,
    PeerAdded {
        #[serde(rename = "uuid")]
        id: PeerId,
        #[serde(default)]
        name: String,
    },
    PeerRemoved {
        #[serde(rename = "uuid")]
        id: PeerId,
        #[serde(default)]
        name: String,
    },
    SetPeerInfo {
        #[serde(rename = "uuid")]
        id: PeerId,
        name: String,
    },
    #[serde(rename = "rtc_offer")]
    Offer {
        #[serde(rename = "fromPeerUUID")]
        from: PeerId,
        #[serde(rename = "toPeerUUID")]
        to: PeerId,
        description: SessionDescription,
    },
    #[serde(rename = "rtc_answer")]
    Answer {
        #[serde(rename = "fromPeerUUID")]
        from: PeerId,
        #[serde(rename = "toPeerUUID")]
        to: PeerId,
        description: SessionDescription,
    },
    #[serde(rename = "new_ice_candidate")]
    IceCandidate {
        #[serde(rename = "fromPeerUUID")]
        from: PeerId,
        #[serde(rename = "toPeerUUID")]
        to: PeerId,
        candidate: Candidate,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataChannelStatus {
    Ready,
    NotReady,
}

/// Signals republished by peer negotiations for the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum PeerSignal {
    /// ICE connectivity with a remote peer has been established.
    IceConnected { peer: PeerId },
    #[serde(rename = "DataChannelStatusChange")]
    DataChannelStatus {
        peer: PeerId,
        status: DataChannelStatus,
    },
    #[serde(rename = "ReceivedDataMessage")]
    ReceivedMessage { peer: PeerId, text: String },
}

impl PeerSignal {
    pub fn peer(&self) -> &PeerId {
        match self {
            PeerSignal::IceConnected { peer } => peer,
            PeerSignal::DataChannelStatus { peer, .. } => peer,
            PeerSignal::ReceivedMessage { peer, .. } => peer,
        }
    }
}

/// Item of the application-facing event stream: either a roster/lifecycle message coming from
/// the signalling server or a signal republished by one of the peer negotiations.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    Signalling(SignallingMessage),
    Peer(PeerSignal),
}

impl From<SignallingMessage> for RouterEvent {
    fn from(value: SignallingMessage) -> Self {
        RouterEvent::Signalling(value)
    }
}

impl From<PeerSignal> for RouterEvent {
    fn from(value: PeerSignal) -> Self {
        RouterEvent::Peer(value)
    }
}
