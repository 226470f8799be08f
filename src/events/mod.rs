//! Event loop plumbing
//!
//! Capture callbacks, socket readers, timers and recognizers all post into
//! one bounded channel drained by the controller. Each event carries the id
//! of the session that produced it so late events from a torn-down session
//! are discarded instead of touching its successor.

use tokio::sync::mpsc;

use crate::transport::SocketEvent;
use crate::voice::{RawBlock, RecognitionEvent};

/// Capacity of the controller's event queue
pub const EVENT_QUEUE_CAPACITY: usize = 512;

/// Something that happened on one of the event sources
#[derive(Debug)]
pub enum VoiceEvent {
    /// Raw block from the microphone at the device rate
    Capture(RawBlock),
    /// Microphone stream reported an error
    CaptureError(String),
    /// Socket lifecycle or message for connection `epoch`
    Socket {
        /// Connection attempt that produced the event
        epoch: u64,
        /// What happened
        event: SocketEvent,
    },
    /// Reconnect backoff for connection `epoch` elapsed
    ReconnectDue {
        /// Connection attempt whose close scheduled the timer
        epoch: u64,
    },
    /// Recognizer output
    Recognition(RecognitionEvent),
    /// Recognizer restart delay elapsed
    RecognitionRestartDue,
    /// Playback item `seq` finished
    PlaybackFinished {
        /// Queue sequence number of the finished item
        seq: u64,
    },
}

/// An event tagged with its session
#[derive(Debug)]
pub struct Envelope {
    /// Session that produced the event
    pub session: u64,
    /// The event itself
    pub event: VoiceEvent,
}

/// Create the controller's event queue
#[must_use]
pub fn channel() -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}

/// Posts events for one session
#[derive(Debug, Clone)]
pub struct Emitter {
    session: u64,
    tx: mpsc::Sender<Envelope>,
}

impl Emitter {
    /// Create an emitter bound to `session`
    #[must_use]
    pub const fn new(session: u64, tx: mpsc::Sender<Envelope>) -> Self {
        Self { session, tx }
    }

    /// Session this emitter tags events with
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Post without waiting
    ///
    /// Safe to call from audio threads. Returns `false` if the queue is full
    /// or the controller is gone; the event is dropped in that case.
    pub fn emit(&self, event: VoiceEvent) -> bool {
        match self.tx.try_send(Envelope {
            session: self.session,
            event,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    session = self.session,
                    event = ?envelope.event,
                    "event queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Post, waiting for queue space
    ///
    /// Returns `false` once the controller is gone.
    pub async fn send(&self, event: VoiceEvent) -> bool {
        self.tx
            .send(Envelope {
                session: self.session,
                event,
            })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_carry_session() {
        let (tx, mut rx) = channel();
        let emitter = Emitter::new(7, tx);
        assert!(emitter.emit(VoiceEvent::RecognitionRestartDue));
        assert!(emitter.send(VoiceEvent::PlaybackFinished { seq: 3 }).await);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.session, 7);
        assert!(matches!(first.event, VoiceEvent::RecognitionRestartDue));

        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, VoiceEvent::PlaybackFinished { seq: 3 }));
    }

    #[tokio::test]
    async fn emit_reports_closed_queue() {
        let (tx, rx) = channel();
        drop(rx);
        let emitter = Emitter::new(1, tx);
        assert!(!emitter.emit(VoiceEvent::RecognitionRestartDue));
        assert!(!emitter.send(VoiceEvent::RecognitionRestartDue).await);
    }

    #[test]
    fn emit_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let emitter = Emitter::new(1, tx);
        assert!(emitter.emit(VoiceEvent::RecognitionRestartDue));
        assert!(!emitter.emit(VoiceEvent::RecognitionRestartDue));
    }
}
