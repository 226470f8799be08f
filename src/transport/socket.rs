//! Socket connectors
//!
//! A [`Connector`] turns a URL into a pair of channels: frames pushed into
//! `outbound` are written to the socket, frames read from it arrive on
//! `inbound`. The inbound channel closing means the socket is gone.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::wire::WireMessage;
use crate::Result;

/// Frames buffered towards the socket writer
pub const OUTBOUND_CAPACITY: usize = 64;

/// Frames buffered from the socket reader
pub const INBOUND_CAPACITY: usize = 64;

/// Handle for writing frames to an open socket
pub type SocketSender = mpsc::Sender<WireMessage>;

/// Socket lifecycle as seen by the event loop
#[derive(Debug)]
pub enum SocketEvent {
    /// Connection established
    Opened(SocketSender),
    /// Frame received
    Message(WireMessage),
    /// Connection failed or ended
    Closed(String),
}

/// An open socket
#[derive(Debug)]
pub struct SocketLink {
    /// Frames to write; dropping every sender closes the socket
    pub outbound: SocketSender,
    /// Frames read; ends when the socket closes
    pub inbound: mpsc::Receiver<WireMessage>,
}

/// Opens sockets to the voice relay
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(&self, url: &Url) -> Result<SocketLink>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<SocketLink> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(url = %url, "websocket connected");

        let (mut writer, mut reader) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<WireMessage>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel::<WireMessage>(INBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match frame {
                    WireMessage::Binary(bytes) => Message::Binary(bytes.into()),
                    WireMessage::Text(text) => Message::Text(text.into()),
                };
                if let Err(e) = writer.send(message).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    return;
                }
            }
            // every sender dropped: close politely
            let _ = writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                let frame = match message {
                    Ok(Message::Binary(bytes)) => WireMessage::Binary(bytes.to_vec()),
                    Ok(Message::Text(text)) => WireMessage::Text(text.as_str().to_owned()),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(frame = ?frame, "websocket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read failed");
                        break;
                    }
                };
                if inbound_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok(SocketLink { outbound, inbound })
    }
}
