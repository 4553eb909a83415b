use crate::engine::{EngineEvent, EngineEvents};
use crate::error::Error;
use arc_swap::ArcSwapOption;
use log::{debug, warn};
use std::sync::Arc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// Holds the single message data channel of a peer connection. The channel is either created
/// locally by the initiator or adopted once the remote side announces it.
#[repr(transparent)]
#[derive(Clone, Default)]
pub(crate) struct DataChannelSlot(Arc<ArcSwapOption<RTCDataChannel>>);

impl DataChannelSlot {
    /// Wires the data channel callbacks into `events` and stores it as the current channel.
    pub fn attach(&self, dc: Arc<RTCDataChannel>, events: EngineEvents) {
        let label = dc.label().to_owned();
        {
            let events = events.clone();
            let label = label.clone();
            dc.on_open(Box::new(move || {
                debug!("data channel '{}' open", label);
                events.emit(EngineEvent::DataChannelOpened);
                Box::pin(async move {})
            }));
        }
        {
            let events = events.clone();
            let label = label.clone();
            dc.on_close(Box::new(move || {
                debug!("data channel '{}' closed", label);
                events.emit(EngineEvent::DataChannelClosed);
                Box::pin(async move {})
            }));
        }
        {
            let label = label.clone();
            dc.on_error(Box::new(move |e| {
                warn!("data channel '{}' failure: {}", label, e);
                Box::pin(async move {})
            }));
        }
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            events.emit(EngineEvent::DataReceived(text));
            Box::pin(async move {})
        }));
        if let Some(old) = self.0.swap(Some(dc)) {
            debug!("replacing data channel '{}'", old.label());
        }
    }

    pub fn is_open(&self) -> bool {
        match &*self.0.load() {
            Some(dc) => dc.ready_state() == RTCDataChannelState::Open,
            None => false,
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        let dc = self.0.load_full().ok_or_else(Error::channel_closed)?;
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(Error::channel_closed());
        }
        dc.send_text(text.to_owned()).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        if let Some(dc) = self.0.swap(None) {
            dc.close().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.0.load() {
            Some(dc) => f
                .debug_struct("DataChannel")
                .field("label", &dc.label())
                .field("state", &dc.ready_state())
                .finish(),
            None => f.write_str("DataChannel(none)"),
        }
    }
}
