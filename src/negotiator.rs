use crate::engine::{EngineEvent, EngineEvents, EngineFactory, IceConnectionState, TransportEngine};
use crate::error::Error;
use crate::message::{Candidate, DataChannelStatus, PeerSignal, SessionDescription, SignallingMessage};
use crate::options::Options;
use crate::peer_id::PeerId;
use crate::router::RouterInner;
use arc_swap::ArcSwap;
use log::{debug, info, trace, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// State of a single peer negotiation.
///
/// Initiator goes through `Idle -> Offering -> AwaitingAnswer -> Negotiated`, responder through
/// `Idle -> Answering -> Negotiated`. There's no terminal state: negotiation lives as long as its
/// entry in the peer table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Offering,
    AwaitingAnswer,
    Answering,
    Negotiated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Local side creates the offer.
    Initiator,
    /// Remote side has sent us an offer.
    Responder,
}

/// Everything a negotiation reacts to. Signalling messages, engine notifications and local send
/// requests share one queue, so they are processed strictly one after another.
#[derive(Debug)]
pub(crate) enum Input {
    Begin,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(Candidate),
    SendText(String),
    Engine(EngineEvent),
}

/// Handle to a negotiation task with one remote peer. Dropping the handle cancels the task and
/// closes its transport engine session.
pub(crate) struct PeerNegotiator {
    generation: u64,
    role: Role,
    inputs: UnboundedSender<Input>,
    state: Arc<ArcSwap<NegotiationState>>,
    cancel: CancellationToken,
}

impl PeerNegotiator {
    /// Spawns the negotiation task on `runtime`. `first` is the input processed before anything
    /// else: `Begin` for initiators, the received offer for responders.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        runtime: &Handle,
        generation: u64,
        role: Role,
        local: PeerId,
        peer: PeerId,
        first: Input,
        router: Weak<RouterInner>,
        engines: Arc<dyn EngineFactory>,
        options: &Options,
    ) -> Self {
        let (inputs, receiver) = unbounded_channel();
        let state = Arc::new(ArcSwap::from_pointee(NegotiationState::Idle));
        let cancel = CancellationToken::new();
        let _ = inputs.send(first);

        let negotiation = Negotiation {
            generation,
            role,
            local,
            peer,
            router,
            engines,
            engine: None,
            label: options.data_channel_label.clone(),
            receive_audio: options.receive_audio,
            inputs: inputs.clone(),
            state: state.clone(),
            ice_connected: false,
        };
        runtime.spawn(negotiation.run(receiver, cancel.clone(), options.negotiation_timeout));

        PeerNegotiator {
            generation,
            role,
            inputs,
            state,
            cancel,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        **self.state.load()
    }

    /// Queues an input. Returns `false` if the negotiation task is already gone.
    pub fn enqueue(&self, input: Input) -> bool {
        !self.cancel.is_cancelled() && self.inputs.send(input).is_ok()
    }
}

impl Drop for PeerNegotiator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PeerNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNegotiator")
            .field("generation", &self.generation)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

/// Negotiation task state, owned exclusively by the spawned task.
struct Negotiation {
    generation: u64,
    role: Role,
    local: PeerId,
    peer: PeerId,
    /// Back-reference used to send signalling messages and publish signals.
    router: Weak<RouterInner>,
    engines: Arc<dyn EngineFactory>,
    engine: Option<Arc<dyn TransportEngine>>,
    label: Arc<str>,
    receive_audio: bool,
    inputs: UnboundedSender<Input>,
    state: Arc<ArcSwap<NegotiationState>>,
    ice_connected: bool,
}

/// Reason the negotiation task stopped.
#[derive(Debug)]
enum Stop {
    Cancelled,
    Expired,
    Closed,
}

impl Negotiation {
    async fn run(
        mut self,
        mut inputs: UnboundedReceiver<Input>,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let stop = loop {
            let negotiated = self.state() == NegotiationState::Negotiated;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Stop::Cancelled),
                _ = expired(deadline), if !negotiated => Err(Stop::Expired),
                input = inputs.recv() => input.ok_or(Stop::Closed),
            };
            let input = match next {
                Ok(input) => input,
                Err(stop) => break stop,
            };
            // engine operations may stall, they must not outlive cancellation or the deadline
            let handled = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Stop::Cancelled),
                result = self.handle(input) => Ok(result),
                _ = expired(deadline), if !negotiated => Err(Stop::Expired),
            };
            match handled {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_transient() => {
                    debug!("negotiation with {}: {}", self.peer, e);
                }
                Ok(Err(e)) => warn!("negotiation with {} failed: {}", self.peer, e),
                Err(stop) => break stop,
            }
        };

        match stop {
            Stop::Expired => {
                warn!(
                    "negotiation with {} timed out in state {:?}",
                    self.peer,
                    self.state()
                );
                if let Some(router) = self.router.upgrade() {
                    router.forget(&self.peer, self.generation);
                }
            }
            Stop::Cancelled | Stop::Closed => {
                debug!("negotiation with {} stopped: {:?}", self.peer, stop);
            }
        }

        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close().await {
                debug!("failed to close transport session with {}: {}", self.peer, e);
            }
        }
    }

    async fn handle(&mut self, input: Input) -> Result<(), Error> {
        trace!("negotiation with {} received {:?}", self.peer, input);
        match input {
            Input::Begin => self.begin().await,
            Input::Offer(description) => self.on_offer(description).await,
            Input::Answer(description) => self.on_answer(description).await,
            Input::Candidate(candidate) => self.on_candidate(candidate).await,
            Input::SendText(text) => self.send_text(text).await,
            Input::Engine(event) => {
                self.on_engine_event(event);
                Ok(())
            }
        }
    }

    async fn begin(&mut self) -> Result<(), Error> {
        if self.role != Role::Initiator || self.state() != NegotiationState::Idle {
            debug!("negotiation with {} already started", self.peer);
            return Ok(());
        }
        self.set_state(NegotiationState::Offering);
        let engine = self.engine().await?;
        if self.receive_audio {
            engine.receive_audio().await?;
        }
        engine.create_data_channel(&self.label).await?;
        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;
        self.set_state(NegotiationState::AwaitingAnswer);
        self.send(SignallingMessage::Offer {
            from: self.local.clone(),
            to: self.peer.clone(),
            description: offer,
        });
        Ok(())
    }

    async fn on_offer(&mut self, description: SessionDescription) -> Result<(), Error> {
        if self.role != Role::Responder || self.state() != NegotiationState::Idle {
            debug!("ignoring duplicate offer from {}", self.peer);
            return Ok(());
        }
        let engine = self.engine().await?;
        if engine.has_remote_description().await {
            debug!("ignoring offer from {}: remote description already set", self.peer);
            return Ok(());
        }
        self.set_state(NegotiationState::Answering);
        engine.set_remote_description(description).await?;
        if engine.has_local_description().await {
            debug!("local description for {} already set", self.peer);
            return Ok(());
        }
        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;
        self.set_state(NegotiationState::Negotiated);
        self.send(SignallingMessage::Answer {
            from: self.local.clone(),
            to: self.peer.clone(),
            description: answer,
        });
        Ok(())
    }

    async fn on_answer(&mut self, description: SessionDescription) -> Result<(), Error> {
        if self.state() != NegotiationState::AwaitingAnswer {
            debug!(
                "ignoring answer from {} in state {:?}",
                self.peer,
                self.state()
            );
            return Ok(());
        }
        let Some(engine) = self.engine.clone() else {
            return Ok(());
        };
        if engine.has_remote_description().await {
            debug!("ignoring answer from {}: remote description already set", self.peer);
            return Ok(());
        }
        engine.set_remote_description(description).await?;
        self.set_state(NegotiationState::Negotiated);
        Ok(())
    }

    async fn on_candidate(&mut self, candidate: Candidate) -> Result<(), Error> {
        let Some(engine) = self.engine.clone() else {
            debug!("dropping ICE candidate from {}: no transport session", self.peer);
            return Ok(());
        };
        if engine.ice_connection_state().is_connected() {
            debug!("ICE connection with {} already established", self.peer);
            self.publish(PeerSignal::IceConnected {
                peer: self.peer.clone(),
            });
            return Ok(());
        }
        engine.add_ice_candidate(candidate).await?;
        self.publish(PeerSignal::DataChannelStatus {
            peer: self.peer.clone(),
            status: DataChannelStatus::Ready,
        });
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        match &self.engine {
            Some(engine) if engine.is_data_channel_open() => engine.send_text(&text).await,
            _ => {
                debug!("data channel with {} not open, message dropped", self.peer);
                Ok(())
            }
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ConnectionStateChanged(state) if state.is_connected() => {
                self.set_state(NegotiationState::Negotiated);
                if self.ice_connected {
                    return;
                }
                self.ice_connected = true;
                info!("ICE connection with {} established", self.peer);
                self.publish(PeerSignal::IceConnected {
                    peer: self.peer.clone(),
                });
                self.publish(PeerSignal::DataChannelStatus {
                    peer: self.peer.clone(),
                    status: DataChannelStatus::Ready,
                });
            }
            EngineEvent::ConnectionStateChanged(state) => {
                if matches!(
                    state,
                    IceConnectionState::Disconnected
                        | IceConnectionState::Failed
                        | IceConnectionState::Closed
                ) {
                    info!("ICE connection with {} is {:?}", self.peer, state);
                }
                self.ice_connected = false;
            }
            EngineEvent::LocalCandidate(candidate) => {
                self.send(SignallingMessage::IceCandidate {
                    from: self.local.clone(),
                    to: self.peer.clone(),
                    candidate,
                });
            }
            EngineEvent::DataReceived(text) => {
                self.publish(PeerSignal::ReceivedMessage {
                    peer: self.peer.clone(),
                    text,
                });
            }
            EngineEvent::DataChannelOpened => {
                debug!("data channel with {} open", self.peer);
            }
            EngineEvent::DataChannelClosed => {
                self.publish(PeerSignal::DataChannelStatus {
                    peer: self.peer.clone(),
                    status: DataChannelStatus::NotReady,
                });
            }
        }
    }

    /// Returns the transport engine session, creating it on first use.
    async fn engine(&mut self) -> Result<Arc<dyn TransportEngine>, Error> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        let inputs = self.inputs.clone();
        let events = EngineEvents::new(move |e| inputs.send(Input::Engine(e)).is_ok());
        let engine = self.engines.create(&self.peer, events).await?;
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    fn state(&self) -> NegotiationState {
        **self.state.load()
    }

    fn set_state(&self, state: NegotiationState) {
        let old = self.state.swap(Arc::new(state));
        if *old != state {
            trace!("negotiation with {}: {:?} -> {:?}", self.peer, old, state);
        }
    }

    fn send(&self, message: SignallingMessage) {
        match self.router.upgrade() {
            Some(router) => {
                if let Err(e) = router.send(&message) {
                    warn!("failed to send signalling message to {}: {}", self.peer, e);
                }
            }
            None => debug!("router is gone, dropping message for {}", self.peer),
        }
    }

    fn publish(&self, signal: PeerSignal) {
        if let Some(router) = self.router.upgrade() {
            router.publish(signal.into());
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
