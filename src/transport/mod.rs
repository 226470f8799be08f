//! Voice stream transport
//!
//! [`VoiceTransport`] keeps one logical connection to the relay. While the
//! connection is desired, every close schedules exactly one reconnect after
//! a fixed delay. Audio sent while the socket is down is dropped.

mod socket;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use url::Url;

pub use socket::{
    Connector, INBOUND_CAPACITY, OUTBOUND_CAPACITY, SocketEvent, SocketLink, SocketSender,
    TungsteniteConnector,
};
pub use wire::{
    ACTIVATE_COMMAND, CLOSE_COMMAND, ControlPayload, Role, TRANSCRIPT_HINT_PREFIX, WireMessage,
    decode_audio,
};

use crate::events::{Emitter, VoiceEvent};
use crate::voice::AudioFrame;
use crate::{Error, Result};

/// Default delay before reconnecting after a close
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Build the stream endpoint from the server base URL
///
/// `https` maps to `wss` and `http` to `ws`.
///
/// # Errors
///
/// Returns error if the scheme is not HTTP(S)/WS(S) or the path is invalid
pub fn stream_url(base: &Url, path: &str) -> Result<Url> {
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::Config(format!("unsupported server scheme: {other}")));
        }
    };

    let mut url = base.join(path)?;
    url.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use {scheme} for {base}")))?;
    Ok(url)
}

/// Whether the connection is wanted and how many attempts it took
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionLifecycle {
    /// The feature wants the connection up
    pub desired: bool,
    /// Attempts since the last successful open
    pub attempts: u32,
    /// Id of the current attempt; events from older attempts are stale
    pub epoch: u64,
}

/// What the controller needs to act on
#[derive(Debug, PartialEq)]
pub enum TransportEvent {
    /// The socket opened
    Opened,
    /// Audio from the server
    Audio(AudioFrame),
    /// Control text from the server
    Control(ControlPayload),
    /// The socket closed or failed to open
    Closed {
        /// Why
        reason: String,
        /// A reconnect was scheduled
        reconnecting: bool,
    },
}

#[derive(Debug)]
enum Link {
    Idle,
    Connecting,
    Open(SocketSender),
}

#[derive(Debug)]
struct ReconnectTimer {
    handle: AbortHandle,
    deadline: Instant,
    epoch: u64,
}

/// Exclusive owner of the relay socket
pub struct VoiceTransport {
    url: Url,
    connector: Arc<dyn Connector>,
    emitter: Emitter,
    reconnect_delay: Duration,
    lifecycle: ConnectionLifecycle,
    link: Link,
    io: Option<AbortHandle>,
    reconnect: Option<ReconnectTimer>,
}

impl VoiceTransport {
    /// Create a disconnected transport
    #[must_use]
    pub fn new(
        url: Url,
        connector: Arc<dyn Connector>,
        emitter: Emitter,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            url,
            connector,
            emitter,
            reconnect_delay,
            lifecycle: ConnectionLifecycle::default(),
            link: Link::Idle,
            io: None,
            reconnect: None,
        }
    }

    /// Mark the connection desired and start connecting
    ///
    /// Completion arrives later as a socket event.
    pub fn connect(&mut self) {
        self.lifecycle.desired = true;
        if matches!(self.link, Link::Idle) {
            self.cancel_reconnect();
            self.start_attempt();
        }
    }

    /// Send captured audio; dropped unless the socket is open
    #[allow(clippy::needless_pass_by_value)]
    pub fn send(&mut self, frame: AudioFrame) -> bool {
        self.send_frame(WireMessage::audio(&frame))
    }

    /// Send a recognized-speech hint
    pub fn send_transcript_hint(&mut self, text: &str) -> bool {
        self.send_control(&ControlPayload::TranscriptHint(text.to_string()))
    }

    /// Send a control payload as text
    pub fn send_control(&mut self, payload: &ControlPayload) -> bool {
        match WireMessage::control(payload) {
            Ok(message) => self.send_frame(message),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode control payload");
                false
            }
        }
    }

    /// Handle a socket event from attempt `epoch`
    pub fn handle(&mut self, epoch: u64, event: SocketEvent) -> Option<TransportEvent> {
        if epoch != self.lifecycle.epoch {
            tracing::debug!(epoch, current = self.lifecycle.epoch, "ignoring stale socket event");
            return None;
        }

        match event {
            SocketEvent::Opened(sender) => {
                if !self.lifecycle.desired {
                    return None;
                }
                tracing::info!(
                    url = %self.url,
                    attempts = self.lifecycle.attempts,
                    "voice stream connected"
                );
                self.lifecycle.attempts = 0;
                self.link = Link::Open(sender);
                Some(TransportEvent::Opened)
            }
            SocketEvent::Message(WireMessage::Binary(bytes)) => {
                Some(TransportEvent::Audio(decode_audio(&bytes)))
            }
            SocketEvent::Message(WireMessage::Text(text)) => match ControlPayload::parse(&text) {
                Ok(payload) => Some(TransportEvent::Control(payload)),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping server message");
                    None
                }
            },
            SocketEvent::Closed(reason) => {
                self.link = Link::Idle;
                self.io = None;
                let reconnecting = self.lifecycle.desired;
                if reconnecting {
                    tracing::warn!(
                        reason = %reason,
                        delay = ?self.reconnect_delay,
                        "voice stream closed, reconnecting"
                    );
                    self.schedule_reconnect();
                } else {
                    tracing::debug!(reason = %reason, "voice stream closed");
                }
                Some(TransportEvent::Closed {
                    reason,
                    reconnecting,
                })
            }
        }
    }

    /// Reconnect delay for attempt `epoch` elapsed
    ///
    /// Returns whether a new attempt started.
    pub fn on_reconnect_due(&mut self, epoch: u64) -> bool {
        let due = self
            .reconnect
            .as_ref()
            .is_some_and(|timer| timer.epoch == epoch);
        if !due {
            return false;
        }
        self.reconnect = None;

        if !self.lifecycle.desired || !matches!(self.link, Link::Idle) {
            return false;
        }
        self.start_attempt();
        true
    }

    /// Close for good: no reconnect, socket closed
    pub fn shutdown(&mut self) {
        self.lifecycle.desired = false;
        self.cancel_reconnect();

        if let Link::Open(sender) = &self.link {
            if let Ok(text) = ControlPayload::Close.encode() {
                let _ = sender.try_send(WireMessage::Text(text));
            }
        }
        // dropping the sender lets the writer flush and close the socket
        self.link = Link::Idle;
        if let Some(io) = self.io.take() {
            io.abort();
        }
        // events already queued for this attempt become stale
        self.lifecycle.epoch += 1;
    }

    /// Socket is open
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.link, Link::Open(_))
    }

    /// Connection is wanted
    #[must_use]
    pub const fn is_desired(&self) -> bool {
        self.lifecycle.desired
    }

    /// Current lifecycle record
    #[must_use]
    pub const fn lifecycle(&self) -> ConnectionLifecycle {
        self.lifecycle
    }

    /// When the pending reconnect fires, if one is scheduled
    #[must_use]
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect.as_ref().map(|timer| timer.deadline)
    }

    /// Endpoint this transport connects to
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    fn send_frame(&self, message: WireMessage) -> bool {
        let Link::Open(sender) = &self.link else {
            tracing::trace!("not connected, dropping outbound frame");
            return false;
        };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "socket busy, dropping outbound frame");
                false
            }
        }
    }

    fn start_attempt(&mut self) {
        if let Some(io) = self.io.take() {
            io.abort();
        }
        self.lifecycle.epoch += 1;
        self.lifecycle.attempts += 1;
        self.link = Link::Connecting;

        let epoch = self.lifecycle.epoch;
        tracing::debug!(
            url = %self.url,
            epoch,
            attempt = self.lifecycle.attempts,
            "connecting voice stream"
        );

        let task = tokio::spawn(drive(
            Arc::clone(&self.connector),
            self.url.clone(),
            self.emitter.clone(),
            epoch,
        ));
        self.io = Some(task.abort_handle());
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            return;
        }
        let epoch = self.lifecycle.epoch;
        let delay = self.reconnect_delay;
        let emitter = self.emitter.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            emitter.send(VoiceEvent::ReconnectDue { epoch }).await;
        });
        self.reconnect = Some(ReconnectTimer {
            handle: task.abort_handle(),
            deadline: Instant::now() + delay,
            epoch,
        });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.handle.abort();
            tracing::debug!("pending reconnect cancelled");
        }
    }
}

impl Drop for VoiceTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Connect, then relay the socket into the event loop until it closes
async fn drive(connector: Arc<dyn Connector>, url: Url, emitter: Emitter, epoch: u64) {
    let socket = |event| VoiceEvent::Socket { epoch, event };

    let SocketLink { outbound, mut inbound } = match connector.connect(&url).await {
        Ok(link) => link,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "voice stream connect failed");
            emitter.send(socket(SocketEvent::Closed(e.to_string()))).await;
            return;
        }
    };

    if !emitter.send(socket(SocketEvent::Opened(outbound))).await {
        return;
    }

    while let Some(frame) = inbound.recv().await {
        if !emitter.send(socket(SocketEvent::Message(frame))).await {
            return;
        }
    }

    emitter
        .send(socket(SocketEvent::Closed("connection closed".to_string())))
        .await;
}
