//! Websocket transport abstraction.
//!
//! The monitor only ever sees a pair of text-frame channels, so tests can
//! drive it with an in-memory session instead of a live socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Result, XplinkError};

/// An open websocket session, reduced to text frames in both directions.
/// The session is over when `inbound` yields `None`.
pub struct TransportSession {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl TransportSession {
    /// Build a detached session pair: the returned handles feed and drain
    /// the session from the far side.
    pub fn pair() -> (Self, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (Self { outbound: out_tx, inbound: in_rx }, in_tx, out_rx)
    }
}

/// Something that can open a websocket session to a given URL.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<TransportSession>;
}

/// The real thing: tungstenite over TCP.
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<TransportSession> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| XplinkError::transport_with_source("websocket handshake", Box::new(e)))?;
        debug!("websocket open to {url}");

        let (mut sink, mut stream) = socket.split();
        let (session, in_tx, mut out_rx) = TransportSession::pair();

        // writer pump: serialized frames out of the session onto the socket
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!("websocket send failed: {err}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader pump: text frames off the socket into the session
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("websocket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("websocket receive failed: {err}");
                        break;
                    }
                }
            }
            // dropping in_tx ends the session for the consumer
        });

        Ok(session)
    }
}
