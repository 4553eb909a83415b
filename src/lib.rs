//! `peer-signalling` negotiates direct peer-to-peer WebRTC sessions with any number of remote
//! peers, coordinated through a single connection to a signalling server:
//! - [SignallingRouter] owns the signalling connection and routes offers, answers and ICE
//!   candidates to a negotiation task per remote peer.
//! - Every negotiation drives its own [TransportEngine] session (webrtc-rs [PeerConnection] by
//!   default) and processes its inputs strictly in order.
//! - Roster changes and per-peer signals ([PeerSignal]) are republished on a single event stream
//!   which replays the latest event to late subscribers.
//!
//! Signalling server speaks JSON messages tagged with an `event` field, see [SignallingMessage].
//!
//! # Examples
//!
//! ```rust,no_run
//! use peer_signalling::{Error, Options, PeerId, PeerSignal, RouterEvent, SignallingMessage, SignallingRouter};
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let router = SignallingRouter::with_websocket(Options::default());
//!     let mut events = router.events();
//!     router.start().await?;
//!
//!     while let Some(event) = events.next().await {
//!         match event {
//!             RouterEvent::Signalling(SignallingMessage::Connected { .. }) => {
//!                 router.set_local_name("alice")?;
//!             }
//!             RouterEvent::Signalling(SignallingMessage::PeerAdded { id, .. }) => {
//!                 // negotiate a session with every peer that shows up
//!                 router.connect_to(id);
//!             }
//!             RouterEvent::Peer(PeerSignal::IceConnected { peer }) => {
//!                 router.send_message(&peer, "hello")?;
//!             }
//!             RouterEvent::Peer(PeerSignal::ReceivedMessage { peer, text }) => {
//!                 println!("{}: {}", peer, text);
//!             }
//!             RouterEvent::Signalling(SignallingMessage::Closed) => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod connection;
mod data_channel;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod negotiator;
pub mod options;
pub mod peer_connection;
pub mod peer_id;
mod peer_table;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connector, SignallingConnection, WebSocketConnector};
pub use engine::{EngineEvent, EngineEvents, EngineFactory, IceConnectionState, TransportEngine};
pub use error::Error;
pub use events::EventStream;
pub use message::{
    Candidate, DataChannelStatus, PeerSignal, RouterEvent, SessionDescription, SignallingMessage,
};
pub use negotiator::{NegotiationState, Role};
pub use options::Options;
pub use peer_connection::{PeerConnection, WebRtcEngineFactory};
pub use peer_id::PeerId;
pub use router::SignallingRouter;
