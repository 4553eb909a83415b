use crate::connection::{Connector, WebSocketConnector};
use crate::engine::EngineFactory;
use crate::error::Error;
use crate::events::{EventStream, ReplayChannel};
use crate::message::{RouterEvent, SessionDescription, SignallingMessage};
use crate::negotiator::{Input, NegotiationState, PeerNegotiator, Role};
use crate::options::Options;
use crate::peer_connection::WebRtcEngineFactory;
use crate::peer_id::PeerId;
use crate::peer_table::PeerTable;
use arc_swap::ArcSwapOption;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Single entry and exit point of the signalling connection.
///
/// Router owns the connection to the signalling server and a table of peer negotiations keyed
/// by [PeerId]. Inbound signalling messages are dispatched to the negotiation of the peer they
/// come from (an inbound offer starts a new one). Roster messages and signals republished by
/// negotiations end up on a single event stream, see [SignallingRouter::events].
#[derive(Clone)]
pub struct SignallingRouter {
    inner: Arc<RouterInner>,
}

pub(crate) struct RouterInner {
    options: Options,
    connector: Arc<dyn Connector>,
    engines: Arc<dyn EngineFactory>,
    local_id: ArcSwapOption<PeerId>,
    outgoing: ArcSwapOption<UnboundedSender<String>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Runtime negotiation tasks are spawned on, so that commands can be issued from threads
    /// outside of it.
    runtime: ArcSwapOption<Handle>,
    peers: PeerTable,
    events: ReplayChannel<RouterEvent>,
    generation: AtomicU64,
}

impl SignallingRouter {
    pub fn new(
        options: Options,
        connector: Arc<dyn Connector>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        SignallingRouter {
            inner: Arc::new(RouterInner {
                options,
                connector,
                engines,
                local_id: ArcSwapOption::empty(),
                outgoing: ArcSwapOption::empty(),
                reader: Mutex::new(None),
                runtime: ArcSwapOption::new(Handle::try_current().ok().map(Arc::new)),
                peers: PeerTable::default(),
                events: ReplayChannel::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a router which connects to `options.server_url` over WebSocket and negotiates
    /// webrtc-rs peer connections.
    pub fn with_websocket(options: Options) -> Self {
        let connector = Arc::new(WebSocketConnector::new(&options.server_url));
        let engines = Arc::new(WebRtcEngineFactory::new(&options));
        SignallingRouter::new(options, connector, engines)
    }

    /// Opens the signalling connection. Calling it again while the connection is open does
    /// nothing.
    pub async fn start(&self) -> Result<(), Error> {
        let mut reader = self.inner.reader.lock().await;
        if let Some(handle) = &*reader {
            if !handle.is_finished() {
                debug!("signalling connection already open");
                return Ok(());
            }
        }
        self.inner.runtime.store(Some(Arc::new(Handle::current())));
        let connection = self.inner.connector.connect().await?;
        info!("signalling connection open");
        self.inner
            .outgoing
            .store(Some(Arc::new(connection.outgoing)));
        let router = Arc::downgrade(&self.inner);
        *reader = Some(tokio::spawn(read_loop(router, connection.incoming)));
        Ok(())
    }

    /// Closes the signalling connection. Peer negotiations are left intact.
    pub async fn close(&self) {
        info!("closing signalling connection of {:?}", self.local_id());
        self.inner.outgoing.store(None);
        let handle = self.inner.reader.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            if handle.await.is_err() {
                // reader has been stopped before it noticed the connection going down
                self.inner.on_closed();
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outgoing.load().is_some()
    }

    /// Identity assigned by the signalling server, if it has been assigned already.
    pub fn local_id(&self) -> Option<PeerId> {
        self.inner.local_id()
    }

    /// Subscribes to the event stream. Subscriber immediately receives the most recently
    /// published event (if any) followed by all events published afterwards.
    pub fn events(&self) -> EventStream<RouterEvent> {
        self.inner.events.subscribe()
    }

    /// Announces our display name to the other peers. Does nothing until the local identity has
    /// been assigned.
    pub fn set_local_name(&self, name: &str) -> Result<(), Error> {
        match self.local_id() {
            Some(id) => self.inner.send(&SignallingMessage::SetPeerInfo {
                id,
                name: name.to_owned(),
            }),
            None => {
                debug!("local identity not assigned yet, name '{}' not sent", name);
                Ok(())
            }
        }
    }

    /// Starts negotiating a session with `peer`, with the local side sending the offer. Does
    /// nothing if the local identity is not assigned yet or if `peer` already has a negotiation.
    ///
    /// Returns `true` if a new negotiation has been started.
    pub fn connect_to(&self, peer: PeerId) -> bool {
        let Some(local) = self.local_id() else {
            warn!("cannot connect to {}: local identity not assigned", peer);
            return false;
        };
        if peer == local {
            debug!("refusing to connect to ourselves");
            return false;
        }
        let Some(runtime) = self.inner.runtime.load_full() else {
            warn!("cannot connect to {}: router has not been started", peer);
            return false;
        };
        let inserted = self.inner.peers.insert_with(peer.clone(), |peer| {
            self.inner.spawn_negotiator(
                &runtime,
                Role::Initiator,
                local,
                peer.clone(),
                Input::Begin,
            )
        });
        if inserted {
            info!("connecting to {}", peer);
        } else {
            debug!("already connected to {}", peer);
        }
        inserted
    }

    /// Sends a text message to `peer` over the data channel. Message is dropped if the data
    /// channel is not open yet.
    ///
    /// Fails with [Error::PeerNotFound] if there's no negotiation with `peer`.
    pub fn send_message(&self, peer: &PeerId, text: &str) -> Result<(), Error> {
        let queued = self
            .inner
            .peers
            .with(peer, |n| n.enqueue(Input::SendText(text.to_owned())));
        match queued {
            Some(true) => Ok(()),
            _ => Err(Error::PeerNotFound(peer.clone())),
        }
    }

    /// Removes the negotiation with `peer`, closing its transport session. Returns `false` if
    /// there was none.
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        match self.inner.peers.remove(peer) {
            Some(negotiator) => {
                info!("disconnecting {:?}", negotiator);
                true
            }
            None => false,
        }
    }

    /// Peers with an active negotiation.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.peers.peers()
    }

    pub fn negotiation_state(&self, peer: &PeerId) -> Option<NegotiationState> {
        self.inner.peers.with(peer, |n| n.state())
    }

    pub fn role(&self, peer: &PeerId) -> Option<Role> {
        self.inner.peers.with(peer, |n| n.role())
    }
}

impl std::fmt::Debug for SignallingRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignallingRouter")
            .field("local_id", &self.local_id())
            .field("connected", &self.is_connected())
            .field("peers", &self.inner.peers.len())
            .finish()
    }
}

impl RouterInner {
    pub(crate) fn local_id(&self) -> Option<PeerId> {
        self.local_id.load_full().map(|id| (*id).clone())
    }

    /// Serializes and sends a message to the signalling server.
    pub(crate) fn send(&self, message: &SignallingMessage) -> Result<(), Error> {
        let outgoing = self.outgoing.load();
        let Some(outgoing) = &*outgoing else {
            return Err(Error::NotConnected);
        };
        let frame = serde_json::to_string(message)?;
        outgoing.send(frame).map_err(|_| Error::NotConnected)
    }

    pub(crate) fn publish(&self, event: RouterEvent) {
        self.events.publish(event);
    }

    /// Drops the negotiation with `peer` if it still belongs to `generation`.
    pub(crate) fn forget(&self, peer: &PeerId, generation: u64) {
        if self.peers.remove_generation(peer, generation).is_some() {
            info!("negotiation with {} removed", peer);
        }
    }

    fn spawn_negotiator(
        self: &Arc<Self>,
        runtime: &Handle,
        role: Role,
        local: PeerId,
        peer: PeerId,
        first: Input,
    ) -> PeerNegotiator {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        PeerNegotiator::spawn(
            runtime,
            generation,
            role,
            local,
            peer,
            first,
            Arc::downgrade(self),
            self.engines.clone(),
            &self.options,
        )
    }

    fn dispatch(self: &Arc<Self>, message: SignallingMessage) {
        match message {
            SignallingMessage::Connected { ref id } => {
                info!("signalling server assigned identity {}", id);
                self.local_id.store(Some(Arc::new(id.clone())));
                self.publish(message.into());
            }
            SignallingMessage::PeerAdded { .. }
            | SignallingMessage::PeerRemoved { .. }
            | SignallingMessage::SetPeerInfo { .. }
            | SignallingMessage::Closed => self.publish(message.into()),
            SignallingMessage::Offer {
                from, description, ..
            } => self.accept_offer(from, description),
            SignallingMessage::Answer {
                from, description, ..
            } => self.forward(&from, Input::Answer(description)),
            SignallingMessage::IceCandidate {
                from, candidate, ..
            } => self.forward(&from, Input::Candidate(candidate)),
        }
    }

    fn accept_offer(self: &Arc<Self>, from: PeerId, description: SessionDescription) {
        let Some(local) = self.local_id() else {
            warn!("dropping offer from {}: local identity not assigned", from);
            return;
        };
        if from == local {
            debug!("dropping offer sent by ourselves");
            return;
        }
        let Some(runtime) = self.runtime.load_full() else {
            warn!("dropping offer from {}: router has not been started", from);
            return;
        };
        let inserted = self.peers.insert_with(from.clone(), |peer| {
            self.spawn_negotiator(
                &runtime,
                Role::Responder,
                local,
                peer.clone(),
                Input::Offer(description),
            )
        });
        if inserted {
            info!("accepting offer from {}", from);
        } else {
            debug!("dropping offer from {}: negotiation already exists", from);
        }
    }

    fn forward(&self, from: &PeerId, input: Input) {
        match self.peers.with(from, |n| n.enqueue(input)) {
            Some(true) => {}
            Some(false) => debug!("negotiation with {} is gone, message dropped", from),
            None => warn!("peer connection not found for {}, message dropped", from),
        }
    }

    fn on_closed(&self) {
        info!("signalling connection closed");
        self.local_id.store(None);
        self.outgoing.store(None);
        self.publish(SignallingMessage::Closed.into());
    }
}

async fn read_loop(router: Weak<RouterInner>, mut incoming: UnboundedReceiver<String>) {
    while let Some(frame) = incoming.recv().await {
        let Some(router) = router.upgrade() else {
            return;
        };
        match serde_json::from_str::<SignallingMessage>(&frame) {
            Ok(message) => {
                debug!("received {:?}", message);
                router.dispatch(message);
            }
            Err(e) => warn!("unexpected frame from signalling server ({}): {}", e, frame),
        }
    }
    if let Some(router) = router.upgrade() {
        router.on_closed();
    }
}
