//! Voice controller
//!
//! Owns one [`VoiceSession`] per enabled lifetime and drives it from a single
//! event queue. Capture, playback, transport, turn state and recognition are
//! created together on `enable()` and torn down together on `disable()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use url::Url;

use crate::config::Config;
use crate::events::{self, Emitter, Envelope, VoiceEvent};
use crate::status::VoiceStatus;
use crate::transport::{Connector, ControlPayload, Role, TransportEvent, VoiceTransport};
use crate::voice::{
    AudioCapture, AudioOutput, CaptureSink, LocalRecognitionFallback, Microphone,
    MicrophoneConstraints, PlaybackQueue, SpeechRecognizer, TurnState, TurnStateMachine,
};
use crate::Result;

/// Host capabilities a session is built from
pub trait VoicePlatform {
    /// A fresh, unopened microphone
    fn microphone(&self) -> Box<dyn Microphone>;

    /// An output device ready to play protocol-rate audio
    ///
    /// # Errors
    ///
    /// Returns error if no output device is usable
    fn speaker(&self) -> Result<Box<dyn AudioOutput>>;

    /// The recognition capability, or a null recognizer when absent
    fn recognizer(&self) -> Box<dyn SpeechRecognizer>;

    /// Socket connector for the relay
    fn connector(&self) -> Arc<dyn Connector>;
}

/// Settings the controller needs from the wider configuration
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Voice stream endpoint
    pub stream_url: Url,
    /// Requested microphone processing
    pub constraints: MicrophoneConstraints,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Pause before the recognizer restarts
    pub recognition_restart_delay: Duration,
}

impl ControllerSettings {
    /// Derive settings from the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if the stream URL cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            stream_url: config.stream_url()?,
            constraints: config.voice.constraints(),
            reconnect_delay: config.voice.reconnect_delay,
            recognition_restart_delay: config.recognition.restart_delay,
        })
    }
}

/// One line of conversation transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    /// Who spoke
    pub role: Role,
    /// What was said
    pub text: String,
}

/// Observable controller state for UI binding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceSnapshot {
    /// Current turn state
    pub state: TurnState,
    /// Socket is open
    pub connected: bool,
    /// Most recent transcript line
    pub last_transcript: Option<TranscriptLine>,
    /// Why voice could not start, when it could not
    pub degraded: Option<String>,
}

/// Requests from the rest of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Turn voice on
    Enable,
    /// Turn voice off
    Disable,
    /// Manual wake trigger
    Activate,
    /// Turn voice off and stop the loop
    Shutdown,
}

/// Everything that lives for one enabled lifetime
struct VoiceSession {
    id: u64,
    capture: AudioCapture,
    transport: VoiceTransport,
    playback: PlaybackQueue,
    turn: TurnStateMachine,
    recognition: LocalRecognitionFallback,
}

impl VoiceSession {
    fn apply(&mut self, event: TransportEvent, last_transcript: &mut Option<TranscriptLine>) {
        match event {
            TransportEvent::Opened => {
                self.turn.on_connected();
                self.capture.arm();
            }
            TransportEvent::Audio(frame) => {
                self.playback.enqueue(frame);
            }
            TransportEvent::Control(ControlPayload::State { state }) => {
                self.turn.apply_backend_state(&state);
            }
            TransportEvent::Control(ControlPayload::Transcript { role, text }) => {
                tracing::info!(role = %role, text = %text, "transcript");
                *last_transcript = Some(TranscriptLine { role, text });
            }
            TransportEvent::Control(other) => {
                tracing::debug!(payload = ?other, "ignoring client-only payload from server");
            }
            TransportEvent::Closed { .. } => {
                self.capture.disarm();
                self.turn.on_disconnected();
            }
        }
    }
}

enum Input {
    Command(Option<VoiceCommand>),
    Event(Envelope),
}

/// The voice feature's single point of control
pub struct VoiceController {
    platform: Box<dyn VoicePlatform>,
    settings: ControllerSettings,
    events_tx: mpsc::Sender<Envelope>,
    events_rx: mpsc::Receiver<Envelope>,
    finished_tx: mpsc::UnboundedSender<Envelope>,
    finished_rx: mpsc::UnboundedReceiver<Envelope>,
    session: Option<VoiceSession>,
    next_session: u64,
    last_transcript: Option<TranscriptLine>,
    degraded: Option<String>,
    snapshot: watch::Sender<VoiceSnapshot>,
}

impl VoiceController {
    /// Create a disabled controller
    #[must_use]
    pub fn new(platform: Box<dyn VoicePlatform>, settings: ControllerSettings) -> Self {
        let (events_tx, events_rx) = events::channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(VoiceSnapshot::default());
        Self {
            platform,
            settings,
            events_tx,
            events_rx,
            finished_tx,
            finished_rx,
            session: None,
            next_session: 1,
            last_transcript: None,
            degraded: None,
            snapshot,
        }
    }

    /// Turn voice on; no-op when already on
    ///
    /// Opens the microphone and speaker, starts connecting and arms the
    /// recognition fallback. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or speaker cannot be opened. The
    /// controller stays disabled and reports the reason in its snapshot.
    pub fn enable(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let id = self.next_session;
        self.next_session += 1;
        let emitter = Emitter::new(id, self.events_tx.clone());

        let mut capture = AudioCapture::new(self.platform.microphone(), self.settings.constraints);
        if let Err(e) = capture.open(CaptureSink::new(emitter.clone())) {
            return Err(self.degrade(e.into()));
        }

        let output = match self.platform.speaker() {
            Ok(output) => output,
            Err(e) => return Err(self.degrade(e)),
        };
        // completions bypass the bounded queue: a lost one would stall playback
        let finished = self.finished_tx.clone();
        let playback = PlaybackQueue::new(output, move |seq| {
            let _ = finished.send(Envelope {
                session: id,
                event: VoiceEvent::PlaybackFinished { seq },
            });
        });

        let mut transport = VoiceTransport::new(
            self.settings.stream_url.clone(),
            self.platform.connector(),
            emitter.clone(),
            self.settings.reconnect_delay,
        );
        transport.connect();

        let mut recognition = LocalRecognitionFallback::new(
            self.platform.recognizer(),
            emitter,
            self.settings.recognition_restart_delay,
        );
        recognition.arm();

        tracing::info!(session = id, url = %self.settings.stream_url, "voice enabled");
        self.degraded = None;
        self.session = Some(VoiceSession {
            id,
            capture,
            transport,
            playback,
            turn: TurnStateMachine::new(),
            recognition,
        });
        self.publish();
        Ok(())
    }

    /// Enable only if the server reports the feature switched on
    ///
    /// # Errors
    ///
    /// Returns error if enabling fails
    pub fn enable_if_available(&mut self, status: &VoiceStatus) -> Result<bool> {
        if !status.enabled {
            tracing::info!("voice disabled on the server, not enabling");
            return Ok(false);
        }
        self.enable()?;
        Ok(true)
    }

    /// Turn voice off; safe at any point and idempotent
    ///
    /// Cancels any pending reconnect and closes the socket. Audio already
    /// handed to the speaker finishes playing.
    pub fn disable(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.transport.shutdown();
        session.capture.disarm();
        session.capture.close();
        session.recognition.disarm();
        session.turn.disable();
        drop(session);

        tracing::info!("voice disabled");
        self.publish();
    }

    /// Local wake trigger
    ///
    /// Moves `listening -> active` and tells the server. Returns whether the
    /// activation took effect.
    pub fn activate(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.turn.activate().is_none() {
            return false;
        }
        session.transport.send_control(&ControlPayload::Activate);
        self.publish();
        true
    }

    /// Wait for and handle the next event
    pub async fn step(&mut self) {
        let envelope = tokio::select! {
            biased;
            Some(envelope) = self.finished_rx.recv() => envelope,
            Some(envelope) = self.events_rx.recv() => envelope,
            else => return,
        };
        self.dispatch(envelope);
    }

    /// Handle one queued event without waiting
    ///
    /// Returns whether an event was handled.
    pub fn try_step(&mut self) -> bool {
        let next = self
            .finished_rx
            .try_recv()
            .or_else(|_| self.events_rx.try_recv());
        match next {
            Ok(envelope) => {
                self.dispatch(envelope);
                true
            }
            Err(_) => false,
        }
    }

    /// Drive the controller from commands until shutdown
    ///
    /// Voice is always disabled before this returns.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<VoiceCommand>) {
        loop {
            let input = tokio::select! {
                command = commands.recv() => Input::Command(command),
                Some(envelope) = self.finished_rx.recv() => Input::Event(envelope),
                Some(envelope) = self.events_rx.recv() => Input::Event(envelope),
            };

            match input {
                Input::Event(envelope) => self.dispatch(envelope),
                Input::Command(Some(VoiceCommand::Enable)) => {
                    if let Err(e) = self.enable() {
                        tracing::warn!(error = %e, "voice unavailable");
                    }
                }
                Input::Command(Some(VoiceCommand::Disable)) => self.disable(),
                Input::Command(Some(VoiceCommand::Activate)) => {
                    self.activate();
                }
                Input::Command(Some(VoiceCommand::Shutdown) | None) => break,
            }
        }
        self.disable();
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VoiceSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current observable state
    #[must_use]
    pub fn snapshot(&self) -> VoiceSnapshot {
        VoiceSnapshot {
            state: self.turn_state(),
            connected: self.is_connected(),
            last_transcript: self.last_transcript.clone(),
            degraded: self.degraded.clone(),
        }
    }

    /// Current turn state; `disabled` while voice is off
    #[must_use]
    pub fn turn_state(&self) -> TurnState {
        self.session
            .as_ref()
            .map_or(TurnState::Disabled, |s| s.turn.state())
    }

    /// Most recent transcript line
    #[must_use]
    pub const fn last_transcript(&self) -> Option<&TranscriptLine> {
        self.last_transcript.as_ref()
    }

    /// Socket is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.transport.is_open())
    }

    /// Voice is on
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.session.is_some()
    }

    /// Captured audio is being forwarded
    #[must_use]
    pub fn capture_armed(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.capture.is_armed())
    }

    /// Recognition fallback is producing hints
    #[must_use]
    pub fn recognition_armed(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.recognition.is_armed())
    }

    /// When the pending reconnect fires, if one is scheduled
    #[must_use]
    pub fn reconnect_deadline(&self) -> Option<tokio::time::Instant> {
        self.session
            .as_ref()
            .and_then(|s| s.transport.reconnect_deadline())
    }

    /// Why voice could not start, if it could not
    #[must_use]
    pub fn degraded(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.id == envelope.session)
        else {
            tracing::trace!(session = envelope.session, "dropping event from ended session");
            return;
        };

        match envelope.event {
            VoiceEvent::Capture(block) => {
                if let Some(frame) = session.capture.process(block) {
                    session.recognition.feed(frame.samples());
                    session.transport.send(frame);
                }
            }
            VoiceEvent::CaptureError(message) => {
                tracing::warn!(error = %message, "microphone stream error");
            }
            VoiceEvent::Socket { epoch, event } => {
                if let Some(event) = session.transport.handle(epoch, event) {
                    session.apply(event, &mut self.last_transcript);
                }
            }
            VoiceEvent::ReconnectDue { epoch } => {
                session.transport.on_reconnect_due(epoch);
            }
            VoiceEvent::Recognition(event) => {
                if let Some(hint) = session.recognition.handle(event) {
                    session.transport.send_transcript_hint(&hint);
                }
            }
            VoiceEvent::RecognitionRestartDue => session.recognition.on_restart_due(),
            VoiceEvent::PlaybackFinished { seq } => session.playback.on_finished(seq),
        }

        self.publish();
    }

    fn degrade(&mut self, error: crate::Error) -> crate::Error {
        tracing::warn!(error = %error, "voice unavailable");
        self.degraded = Some(error.to_string());
        self.publish();
        error
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        self.disable();
    }
}
