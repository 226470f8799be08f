//! Local speech recognition fallback
//!
//! An optional recognizer runs beside the audio path and turns what it hears
//! into transcript hints. It is a convenience channel: when the capability is
//! missing or fails fatally the audio path carries on without it.

use std::time::Duration;

use tokio::task::AbortHandle;

use crate::error::RecognitionError;
use crate::events::{Emitter, VoiceEvent};

/// Default pause before a recognizer restarts after a transient failure
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Output of a running recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Interim or final text
    Result {
        /// Recognized text
        text: String,
        /// Whether the recognizer considers the utterance complete
        is_final: bool,
    },
    /// Recognition failed
    Error(RecognitionError),
    /// Recognizer stopped on its own
    Ended,
}

/// Where a recognizer reports results
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    emitter: Emitter,
}

impl RecognitionSink {
    /// Report into the given session's event queue
    #[must_use]
    pub const fn new(emitter: Emitter) -> Self {
        Self { emitter }
    }

    /// Report recognized text
    pub fn result(&self, text: impl Into<String>, is_final: bool) -> bool {
        self.emitter.emit(VoiceEvent::Recognition(RecognitionEvent::Result {
            text: text.into(),
            is_final,
        }))
    }

    /// Report a failure
    pub fn error(&self, error: RecognitionError) -> bool {
        self.emitter
            .emit(VoiceEvent::Recognition(RecognitionEvent::Error(error)))
    }

    /// Report that the recognizer stopped
    pub fn ended(&self) -> bool {
        self.emitter
            .emit(VoiceEvent::Recognition(RecognitionEvent::Ended))
    }
}

/// A speech recognition capability
pub trait SpeechRecognizer {
    /// Begin recognizing; results go to `sink`
    ///
    /// # Errors
    ///
    /// Returns error if recognition cannot start
    fn start(&mut self, sink: RecognitionSink) -> Result<(), RecognitionError>;

    /// Stop recognizing; idempotent
    fn stop(&mut self);

    /// Offer captured 24 kHz audio
    ///
    /// Recognizers with their own audio source ignore this.
    fn feed(&mut self, _samples: &[f32]) {}
}

/// Recognizer used when the host has no recognition capability
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecognizer;

impl SpeechRecognizer for NullRecognizer {
    fn start(&mut self, _sink: RecognitionSink) -> Result<(), RecognitionError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Drives a [`SpeechRecognizer`] for one session
///
/// Transient failures restart the recognizer after a fixed delay while
/// armed. A fatal failure disables it until the session ends.
pub struct LocalRecognitionFallback {
    recognizer: Box<dyn SpeechRecognizer>,
    emitter: Emitter,
    restart_delay: Duration,
    armed: bool,
    running: bool,
    disabled: bool,
    restart: Option<AbortHandle>,
}

impl LocalRecognitionFallback {
    /// Wrap a recognizer; nothing starts until [`arm`](Self::arm)
    #[must_use]
    pub fn new(
        recognizer: Box<dyn SpeechRecognizer>,
        emitter: Emitter,
        restart_delay: Duration,
    ) -> Self {
        Self {
            recognizer,
            emitter,
            restart_delay,
            armed: false,
            running: false,
            disabled: false,
            restart: None,
        }
    }

    /// Start recognizing
    pub fn arm(&mut self) {
        if self.disabled || self.armed {
            return;
        }
        self.armed = true;
        self.start();
    }

    /// Stop recognizing and cancel any pending restart
    pub fn disarm(&mut self) {
        self.armed = false;
        self.cancel_restart();
        if self.running {
            self.recognizer.stop();
            self.running = false;
        }
    }

    /// Pass captured audio to the recognizer
    pub fn feed(&mut self, samples: &[f32]) {
        if self.armed && self.running {
            self.recognizer.feed(samples);
        }
    }

    /// Handle recognizer output
    ///
    /// Returns the text to forward as a transcript hint, if any.
    pub fn handle(&mut self, event: RecognitionEvent) -> Option<String> {
        match event {
            RecognitionEvent::Result { text, is_final } => {
                if !self.armed {
                    return None;
                }
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                tracing::debug!(text, is_final, "recognized speech");
                Some(text.to_string())
            }
            RecognitionEvent::Error(error) => {
                self.running = false;
                self.fail(&error);
                None
            }
            RecognitionEvent::Ended => {
                self.running = false;
                if self.armed && !self.disabled {
                    self.schedule_restart();
                }
                None
            }
        }
    }

    /// Restart delay elapsed
    pub fn on_restart_due(&mut self) {
        self.restart = None;
        if self.armed && !self.disabled && !self.running {
            tracing::debug!("restarting recognizer");
            self.start();
        }
    }

    /// Whether hints are currently being produced
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the recognizer is running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether a fatal error switched recognition off for this session
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether a restart is scheduled
    #[must_use]
    pub const fn restart_pending(&self) -> bool {
        self.restart.is_some()
    }

    fn start(&mut self) {
        match self.recognizer.start(RecognitionSink::new(self.emitter.clone())) {
            Ok(()) => self.running = true,
            Err(error) => self.fail(&error),
        }
    }

    fn fail(&mut self, error: &RecognitionError) {
        if error.is_transient() {
            tracing::debug!(error = %error, "recognizer failed, restarting");
            if self.armed {
                self.schedule_restart();
            }
        } else {
            tracing::warn!(error = %error, "recognition unavailable for this session");
            self.disabled = true;
            self.armed = false;
            self.cancel_restart();
            if self.running {
                self.recognizer.stop();
                self.running = false;
            }
        }
    }

    fn schedule_restart(&mut self) {
        if self.restart.is_some() {
            return;
        }
        let emitter = self.emitter.clone();
        let delay = self.restart_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            emitter.send(VoiceEvent::RecognitionRestartDue).await;
        });
        self.restart = Some(task.abort_handle());
    }

    fn cancel_restart(&mut self) {
        if let Some(handle) = self.restart.take() {
            handle.abort();
        }
    }
}

impl Drop for LocalRecognitionFallback {
    fn drop(&mut self) {
        self.disarm();
    }
}
