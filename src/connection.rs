use crate::error::Error;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Open connection to a signalling server, exposed as a pair of text frame pipes.
///
/// Dropping `outgoing` asks the connection to close. Once the connection is gone, `incoming`
/// returns `None`.
#[derive(Debug)]
pub struct SignallingConnection {
    pub outgoing: UnboundedSender<String>,
    pub incoming: UnboundedReceiver<String>,
}

impl SignallingConnection {
    /// Creates a connection together with its remote counterpart: frames sent over one side are
    /// received by the other one.
    pub fn pair() -> (SignallingConnection, SignallingConnection) {
        let (a_tx, a_rx) = unbounded_channel();
        let (b_tx, b_rx) = unbounded_channel();
        (
            SignallingConnection {
                outgoing: a_tx,
                incoming: b_rx,
            },
            SignallingConnection {
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }
}

/// Establishes connections to the signalling server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<SignallingConnection, Error>;
}

/// [Connector] talking to the signalling server over WebSocket, one JSON message per text frame.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: &str) -> Self {
        WebSocketConnector {
            url: url.to_owned(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<SignallingConnection, Error> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!("websocket connected to {}", self.url);
        let (mut write, mut read) = ws.split();
        let (outgoing, mut outgoing_rx) = unbounded_channel::<String>();
        let (incoming_tx, incoming) = unbounded_channel::<String>();
        let url = self.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outgoing_rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                warn!("failed to send frame to {}: {}", url, e);
                                break;
                            }
                        }
                        None => {
                            let _ = write.close().await;
                            break;
                        }
                    },
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if incoming_tx.send(text).is_err() {
                                let _ = write.close().await;
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("websocket {} failure: {}", url, e);
                            break;
                        }
                    }
                }
            }
            debug!("websocket connection to {} closed", url);
        });

        Ok(SignallingConnection { outgoing, incoming })
    }
}
