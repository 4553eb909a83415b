use crate::data_channel::DataChannelSlot;
use crate::engine::{EngineEvent, EngineEvents, EngineFactory, IceConnectionState, TransportEngine};
use crate::error::Error;
use crate::message::{Candidate, SessionDescription};
use crate::options::Options;
use crate::peer_id::PeerId;
use async_trait::async_trait;
use log::{debug, trace, warn};
use std::fmt::Formatter;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

/// [TransportEngine] backed by a webrtc-rs peer connection.
pub struct PeerConnection {
    pc: Arc<RTCPeerConnection>,
    data_channel: DataChannelSlot,
    events: EngineEvents,
}

impl PeerConnection {
    /// Starts a new instance of [PeerConnection]. All of its notifications are delivered to
    /// `events`.
    pub async fn start(rtc_config: RTCConfiguration, events: EngineEvents) -> Result<Self, Error> {
        // Create a MediaEngine object to configure the supported codec
        let mut media_engine = MediaEngine::default();

        // Register default codecs
        media_engine.register_default_codecs()?;

        // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
        // Every peer connection needs its own registry.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);
        let data_channel = DataChannelSlot::default();

        {
            let events = events.clone();
            peer_connection.on_ice_connection_state_change(Box::new(move |s| {
                debug!("ICE connection state changed: {}", s);
                events.emit(EngineEvent::ConnectionStateChanged(s.into()));
                Box::pin(async move {})
            }));
        }
        peer_connection.on_peer_connection_state_change(Box::new(move |s| {
            if s == RTCPeerConnectionState::Failed {
                warn!("peer connection failed");
            } else {
                trace!("peer connection state changed: {}", s);
            }
            Box::pin(async move {})
        }));
        {
            let events = events.clone();
            peer_connection.on_ice_candidate(Box::new(move |candidate| {
                if let Some(candidate) = candidate {
                    match candidate.to_json().map(|init| serde_json::to_value(init)) {
                        Ok(Ok(value)) => {
                            events.emit(EngineEvent::LocalCandidate(Candidate(value)));
                        }
                        Ok(Err(e)) => warn!("failed to serialize local ICE candidate: {}", e),
                        Err(e) => warn!("failed to convert local ICE candidate: {}", e),
                    }
                } else {
                    // ICE gathering complete
                    trace!("ICE gathering complete");
                }
                Box::pin(async move {})
            }));
        }
        {
            let events = events.clone();
            let slot = data_channel.clone();
            peer_connection.on_data_channel(Box::new(move |dc| {
                debug!("remote peer opened data channel '{}'", dc.label());
                slot.attach(dc, events.clone());
                Box::pin(async move {})
            }));
        }

        Ok(PeerConnection {
            pc: peer_connection,
            data_channel,
            events,
        })
    }
}

#[async_trait]
impl TransportEngine for PeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, Error> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription(serde_json::to_value(offer)?))
    }

    async fn create_answer(&self) -> Result<SessionDescription, Error> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription(serde_json::to_value(answer)?))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), Error> {
        let sdp: RTCSessionDescription = serde_json::from_value(description.0)?;
        self.pc.set_local_description(sdp).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), Error> {
        let sdp: RTCSessionDescription = serde_json::from_value(description.0)?;
        self.pc.set_remote_description(sdp).await?;
        Ok(())
    }

    async fn has_local_description(&self) -> bool {
        self.pc.current_local_description().await.is_some()
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: Candidate) -> Result<(), Error> {
        if self.pc.remote_description().await.is_none() {
            return Err(Error::NoRemoteDescription);
        }
        let candidate: RTCIceCandidateInit = serde_json::from_value(candidate.0)?;
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.pc.ice_connection_state().into()
    }

    async fn receive_audio(&self) -> Result<(), Error> {
        let pc = self.pc.clone();
        detached(move || async move {
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: Vec::new(),
            };
            pc.add_transceiver_from_kind(RTPCodecType::Audio, Some(init))
                .await?;
            Ok(())
        })
        .await
    }

    async fn create_data_channel(&self, label: &str) -> Result<(), Error> {
        let dc = self.pc.create_data_channel(label, None).await?;
        self.data_channel.attach(dc, self.events.clone());
        Ok(())
    }

    fn is_data_channel_open(&self) -> bool {
        self.data_channel.is_open()
    }

    async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.data_channel.send_text(text).await
    }

    async fn close(&self) -> Result<(), Error> {
        let pc = self.pc.clone();
        let data_channel = self.data_channel.clone();
        detached(move || async move {
            data_channel.close().await?;
            pc.close().await?;
            Ok(())
        })
        .await
    }
}

/// Runs a webrtc-rs operation whose future is not `Send` (it holds std mutex guards across
/// awaits) on a blocking thread, driven by the current runtime.
async fn detached<F, Fut, T>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Error>>,
    T: Send + 'static,
{
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || handle.block_on(f())).await?
}

impl AsRef<RTCPeerConnection> for PeerConnection {
    fn as_ref(&self) -> &RTCPeerConnection {
        &self.pc
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("ice_connection_state", &self.pc.ice_connection_state())
            .field("data_channel", &self.data_channel)
            .finish()
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(value: RTCIceConnectionState) -> Self {
        match value {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => {
                IceConnectionState::New
            }
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
        }
    }
}

/// Creates webrtc-rs [PeerConnection]s configured from [Options].
#[derive(Clone)]
pub struct WebRtcEngineFactory {
    rtc_config: RTCConfiguration,
}

impl WebRtcEngineFactory {
    pub fn new(options: &Options) -> Self {
        WebRtcEngineFactory {
            rtc_config: options.rtc_configuration(),
        }
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(
        &self,
        peer: &PeerId,
        events: EngineEvents,
    ) -> Result<Arc<dyn TransportEngine>, Error> {
        debug!("starting peer connection for {}", peer);
        let pc = PeerConnection::start(self.rtc_config.clone(), events).await?;
        Ok(Arc::new(pc))
    }
}

#[cfg(test)]
mod test {
    use crate::engine::{EngineEvent, EngineEvents, TransportEngine};
    use crate::error::Error;
    use crate::peer_connection::PeerConnection;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio::task::JoinHandle;
    use webrtc::peer_connection::configuration::RTCConfiguration;

    /// Relays local candidates of one side into the other one, everything else is forwarded to
    /// `rest`.
    fn exchange(
        mut from: UnboundedReceiver<EngineEvent>,
        to: Arc<PeerConnection>,
        rest: UnboundedSender<EngineEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = from.recv().await {
                match event {
                    EngineEvent::LocalCandidate(candidate) => {
                        if let Err(e) = to.add_ice_candidate(candidate).await {
                            log::warn!("candidate rejected: {}", e);
                        }
                    }
                    other => {
                        let _ = rest.send(other);
                    }
                }
            }
        })
    }

    async fn wait_for(
        events: &mut UnboundedReceiver<EngineEvent>,
        f: impl Fn(&EngineEvent) -> bool,
    ) -> EngineEvent {
        loop {
            let event = events.recv().await.unwrap();
            if f(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_transient() -> Result<(), Error> {
        let (tx, _rx) = unbounded_channel();
        let pc = PeerConnection::start(RTCConfiguration::default(), EngineEvents::from_sender(tx))
            .await?;
        let candidate = crate::message::Candidate(serde_json::json!({
            "candidate": "candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host"
        }));
        let err = pc.add_ice_candidate(candidate).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!pc.has_remote_description().await);
        assert!(!pc.is_data_channel_open());
        pc.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn offer_asks_for_audio() -> Result<(), Error> {
        let (tx, _rx) = unbounded_channel();
        let pc = PeerConnection::start(RTCConfiguration::default(), EngineEvents::from_sender(tx))
            .await?;
        pc.receive_audio().await?;
        pc.create_data_channel("dc").await?;
        let offer = pc.create_offer().await?;
        let sdp = offer.0["sdp"].as_str().unwrap_or_default();
        assert!(sdp.contains("m=audio"), "offer without audio section: {}", sdp);
        assert!(sdp.contains("a=recvonly"), "audio is not receive-only: {}", sdp);
        pc.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn connection_negotiation() -> Result<(), Error> {
        let (tx1, rx1) = unbounded_channel();
        let (tx2, rx2) = unbounded_channel();
        let p1 = Arc::new(
            PeerConnection::start(RTCConfiguration::default(), EngineEvents::from_sender(tx1))
                .await?,
        );
        let p2 = Arc::new(
            PeerConnection::start(RTCConfiguration::default(), EngineEvents::from_sender(tx2))
                .await?,
        );

        p1.receive_audio().await?;
        p1.create_data_channel("dc").await?;
        let offer = p1.create_offer().await?;
        p1.set_local_description(offer.clone()).await?;
        p2.set_remote_description(offer).await?;
        let answer = p2.create_answer().await?;
        p2.set_local_description(answer.clone()).await?;
        p1.set_remote_description(answer).await?;

        let (rest1_tx, mut rest1) = unbounded_channel();
        let (rest2_tx, mut rest2) = unbounded_channel();
        let _ = exchange(rx1, p2.clone(), rest1_tx);
        let _ = exchange(rx2, p1.clone(), rest2_tx);

        tokio::time::timeout(Duration::from_secs(30), async {
            wait_for(&mut rest1, |e| matches!(e, EngineEvent::DataChannelOpened)).await;
            wait_for(&mut rest2, |e| matches!(e, EngineEvent::DataChannelOpened)).await;
        })
        .await
        .expect("data channels should open");

        assert!(p1.ice_connection_state().is_connected() || p2.is_data_channel_open());
        p1.send_text("hello").await?;
        let received = tokio::time::timeout(
            Duration::from_secs(10),
            wait_for(&mut rest2, |e| matches!(e, EngineEvent::DataReceived(_))),
        )
        .await
        .expect("message should arrive");
        assert_eq!(received, EngineEvent::DataReceived("hello".into()));

        p1.close().await?;
        p2.close().await?;
        Ok(())
    }
}
