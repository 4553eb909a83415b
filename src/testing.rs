//! In-memory signalling server and scripted transport engine used by the tests.

use crate::connection::{Connector, SignallingConnection};
use crate::engine::{EngineEvent, EngineEvents, EngineFactory, IceConnectionState, TransportEngine};
use crate::error::Error;
use crate::events::EventStream;
use crate::message::{Candidate, PeerSignal, RouterEvent, SessionDescription, SignallingMessage};
use crate::peer_id::PeerId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

pub const WAIT: Duration = Duration::from_secs(2);

/// Server side of an in-memory signalling connection.
pub struct MemoryServer {
    connection: SignallingConnection,
}

impl MemoryServer {
    pub fn push(&self, message: &SignallingMessage) {
        self.push_raw(&serde_json::to_string(message).unwrap());
    }

    pub fn push_raw(&self, frame: &str) {
        self.connection.outgoing.send(frame.to_owned()).unwrap();
    }

    /// Next message sent by the client.
    pub async fn next_message(&mut self) -> SignallingMessage {
        let frame = tokio::time::timeout(WAIT, self.connection.incoming.recv())
            .await
            .expect("timed out waiting for a signalling message")
            .expect("signalling connection closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Asserts that the client hasn't sent anything within `within`.
    pub async fn assert_silent(&mut self, within: Duration) {
        tokio::time::sleep(within).await;
        match self.connection.incoming.try_recv() {
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            Ok(frame) => panic!("unexpected signalling message: {}", frame),
        }
    }

    /// Simulates the server dropping the connection.
    pub fn hang_up(self) {}
}

pub struct MemoryConnector {
    pending: Mutex<Option<SignallingConnection>>,
    pub connects: AtomicUsize,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<SignallingConnection, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().take().ok_or(Error::NotConnected)
    }
}

pub fn memory_connector() -> (Arc<MemoryConnector>, MemoryServer) {
    let (client, server) = SignallingConnection::pair();
    let connector = Arc::new(MemoryConnector {
        pending: Mutex::new(Some(client)),
        connects: AtomicUsize::new(0),
    });
    (connector, MemoryServer { connection: server })
}

/// State of a scripted transport session.
#[derive(Default)]
pub struct MockState {
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub remote_applied: AtomicUsize,
    pub candidates: Mutex<Vec<Candidate>>,
    pub ice: Mutex<IceConnectionState>,
    pub channel_label: Mutex<Option<String>>,
    pub receive_audio: AtomicBool,
    /// When set, `create_offer` never completes.
    pub stall_offers: AtomicBool,
    pub channel_open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockSession {
    pub events: EngineEvents,
    pub state: Arc<MockState>,
}

impl MockSession {
    /// Simulates ICE connectivity being established.
    pub fn connect(&self) {
        *self.state.ice.lock() = IceConnectionState::Connected;
        self.events.emit(EngineEvent::ConnectionStateChanged(
            IceConnectionState::Connected,
        ));
    }

    pub fn open_channel(&self) {
        self.state.channel_open.store(true, Ordering::SeqCst);
        self.events.emit(EngineEvent::DataChannelOpened);
    }
}

struct MockEngine {
    state: Arc<MockState>,
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, Error> {
        if self.state.stall_offers.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(SessionDescription(json!({ "type": "offer", "sdp": "mock-offer" })))
    }

    async fn create_answer(&self) -> Result<SessionDescription, Error> {
        if self.state.remote.lock().is_none() {
            return Err(Error::NoRemoteDescription);
        }
        Ok(SessionDescription(json!({ "type": "answer", "sdp": "mock-answer" })))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), Error> {
        *self.state.local.lock() = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), Error> {
        self.state.remote_applied.fetch_add(1, Ordering::SeqCst);
        *self.state.remote.lock() = Some(description);
        Ok(())
    }

    async fn has_local_description(&self) -> bool {
        self.state.local.lock().is_some()
    }

    async fn has_remote_description(&self) -> bool {
        self.state.remote.lock().is_some()
    }

    async fn add_ice_candidate(&self, candidate: Candidate) -> Result<(), Error> {
        if self.state.remote.lock().is_none() {
            return Err(Error::NoRemoteDescription);
        }
        self.state.candidates.lock().push(candidate);
        Ok(())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        *self.state.ice.lock()
    }

    async fn receive_audio(&self) -> Result<(), Error> {
        self.state.receive_audio.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), Error> {
        *self.state.channel_label.lock() = Some(label.to_owned());
        Ok(())
    }

    fn is_data_channel_open(&self) -> bool {
        self.state.channel_open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.state.sent.lock().push(text.to_owned());
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// [EngineFactory] producing scripted sessions which tests can drive by hand.
#[derive(Default)]
pub struct MockEngines {
    sessions: Mutex<Vec<(PeerId, MockSession)>>,
    /// Sessions created while set never complete their offers.
    pub stall_offers: AtomicBool,
}

impl MockEngines {
    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn sessions_for(&self, peer: &PeerId) -> usize {
        self.sessions.lock().iter().filter(|(p, _)| p == peer).count()
    }

    pub fn session(&self, peer: &PeerId) -> MockSession {
        self.sessions
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == peer)
            .map(|(_, s)| s.clone())
            .expect("no transport session created for peer")
    }
}

#[async_trait]
impl EngineFactory for MockEngines {
    async fn create(
        &self,
        peer: &PeerId,
        events: EngineEvents,
    ) -> Result<Arc<dyn TransportEngine>, Error> {
        let state = Arc::new(MockState::default());
        state
            .stall_offers
            .store(self.stall_offers.load(Ordering::SeqCst), Ordering::SeqCst);
        let session = MockSession {
            events,
            state: state.clone(),
        };
        self.sessions.lock().push((peer.clone(), session));
        Ok(Arc::new(MockEngine { state }))
    }
}

/// Waits for the next peer signal, skipping signalling messages.
pub async fn next_signal(events: &mut EventStream<RouterEvent>) -> PeerSignal {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(RouterEvent::Peer(signal)) => return signal,
                Some(RouterEvent::Signalling(_)) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a peer signal")
}

/// Polls `f` until it holds.
pub async fn eventually(f: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time")
}
