//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, speaker, socket and recognizer so
//! controller behavior can be driven without audio hardware or a server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use compita_voice::controller::{ControllerSettings, VoiceController, VoicePlatform};
use compita_voice::error::{MicError, RecognitionError};
use compita_voice::transport::{Connector, SocketLink, WireMessage};
use compita_voice::voice::{
    AudioOutput, CaptureSink, MicInfo, Microphone, MicrophoneConstraints, PlaybackDone,
    RecognitionSink, SpeechRecognizer,
};
use compita_voice::{Error, Result};
use tokio::sync::mpsc;
use url::Url;

/// Reconnect delay used by the controller under test
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Controller settings pointing at a fake local relay
#[must_use]
pub fn settings() -> ControllerSettings {
    ControllerSettings {
        stream_url: Url::parse("ws://localhost:8042/api/compita/stream").unwrap(),
        constraints: MicrophoneConstraints::default(),
        reconnect_delay: RECONNECT_DELAY,
        recognition_restart_delay: Duration::from_secs(1),
    }
}

/// Let spawned tasks run and handle everything they queued
pub async fn settle(controller: &mut VoiceController) {
    for _ in 0..16 {
        tokio::task::yield_now().await;
        while controller.try_step() {}
    }
}

#[derive(Default)]
struct MicState {
    opened: usize,
    closed: usize,
    sink: Option<CaptureSink>,
    fail: Option<MicError>,
}

/// Microphone whose blocks are pushed by the test
#[derive(Clone, Default)]
pub struct MockMic {
    state: Arc<Mutex<MicState>>,
}

impl MockMic {
    /// A microphone that refuses to open
    #[must_use]
    pub fn failing(error: MicError) -> Self {
        let mic = Self::default();
        mic.state.lock().unwrap().fail = Some(error);
        mic
    }

    /// Deliver one device-rate block, as the audio thread would
    pub fn push(&self, samples: Vec<f32>, sample_rate: u32) -> bool {
        let sink = self.state.lock().unwrap().sink.clone();
        sink.is_some_and(|sink| sink.deliver(samples, sample_rate))
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Device currently held
    pub fn is_held(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }
}

impl Microphone for MockMic {
    fn open(
        &mut self,
        _constraints: &MicrophoneConstraints,
        sink: CaptureSink,
    ) -> std::result::Result<MicInfo, MicError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail.clone() {
            return Err(error);
        }
        state.opened += 1;
        state.sink = Some(sink);
        Ok(MicInfo {
            device: "mock".to_string(),
            sample_rate: 48_000,
            channels: 1,
        })
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.closed += 1;
        state.sink = None;
    }
}

#[derive(Default)]
struct SpeakerState {
    played: Vec<usize>,
    playing: Vec<PlaybackDone>,
}

/// Speaker that records what it was asked to play
///
/// Items stay "playing" until the test finishes them.
#[derive(Clone, Default)]
pub struct MockSpeaker {
    state: Arc<Mutex<SpeakerState>>,
}

impl MockSpeaker {
    /// Sample counts of every item started so far
    pub fn played(&self) -> Vec<usize> {
        self.state.lock().unwrap().played.clone()
    }

    /// Number of items playing at once
    pub fn playing(&self) -> usize {
        self.state.lock().unwrap().playing.len()
    }

    /// Finish the oldest playing item
    pub fn finish_one(&self) -> bool {
        let token = {
            let mut state = self.state.lock().unwrap();
            if state.playing.is_empty() {
                return false;
            }
            state.playing.remove(0)
        };
        token.finish();
        true
    }
}

impl AudioOutput for MockSpeaker {
    fn play(&mut self, samples: Vec<f32>, done: PlaybackDone) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.played.push(samples.len());
        state.playing.push(done);
        Ok(())
    }
}

/// Server side of one accepted mock connection
pub struct ServerEnd {
    /// Frames the client sent
    pub from_client: mpsc::Receiver<WireMessage>,
    /// Frames to deliver to the client; drop to close the socket
    pub to_client: mpsc::Sender<WireMessage>,
}

impl ServerEnd {
    /// Send a text frame to the client
    pub async fn text(&self, text: &str) {
        self.to_client
            .send(WireMessage::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Send a binary frame to the client
    pub async fn binary(&self, bytes: Vec<u8>) {
        self.to_client.send(WireMessage::Binary(bytes)).await.unwrap();
    }

    /// Next frame the client sent, if any is queued
    pub fn try_next(&mut self) -> Option<WireMessage> {
        self.from_client.try_recv().ok()
    }
}

/// Connector that accepts in-memory connections
#[derive(Default)]
pub struct MockConnector {
    attempts: AtomicUsize,
    refuse: AtomicBool,
    servers: Mutex<Vec<ServerEnd>>,
}

impl MockConnector {
    /// Connection attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make further attempts fail
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Take the most recently accepted connection
    pub fn accept(&self) -> ServerEnd {
        self.servers
            .lock()
            .unwrap()
            .pop()
            .expect("no connection accepted")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &Url) -> Result<SocketLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (outbound, from_client) = mpsc::channel(64);
        let (to_client, inbound) = mpsc::channel(64);
        self.servers.lock().unwrap().push(ServerEnd {
            from_client,
            to_client,
        });
        Ok(SocketLink { outbound, inbound })
    }
}

#[derive(Default)]
struct RecognizerState {
    starts: usize,
    stops: usize,
    fed: usize,
    sink: Option<RecognitionSink>,
    fail: Option<RecognitionError>,
}

/// Recognizer whose results are injected by the test
#[derive(Clone, Default)]
pub struct MockRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

impl MockRecognizer {
    /// A recognizer that fails to start
    #[must_use]
    pub fn failing(error: RecognitionError) -> Self {
        let recognizer = Self::default();
        recognizer.state.lock().unwrap().fail = Some(error);
        recognizer
    }

    /// Sink of the running recognizer
    pub fn sink(&self) -> Option<RecognitionSink> {
        self.state.lock().unwrap().sink.clone()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    /// Samples offered by the capture path
    pub fn fed(&self) -> usize {
        self.state.lock().unwrap().fed
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(&mut self, sink: RecognitionSink) -> std::result::Result<(), RecognitionError> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        if let Some(error) = state.fail.clone() {
            return Err(error);
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.sink = None;
    }

    fn feed(&mut self, samples: &[f32]) {
        self.state.lock().unwrap().fed += samples.len();
    }
}

/// A platform assembled from mocks, with handles kept for inspection
#[derive(Clone, Default)]
pub struct MockPlatform {
    pub mic: MockMic,
    pub speaker: MockSpeaker,
    pub connector: Arc<MockConnector>,
    pub recognizer: MockRecognizer,
    pub speaker_fails: bool,
}

impl MockPlatform {
    /// Controller driving this platform
    #[must_use]
    pub fn controller(&self) -> VoiceController {
        VoiceController::new(Box::new(self.clone()), settings())
    }
}

impl VoicePlatform for MockPlatform {
    fn microphone(&self) -> Box<dyn Microphone> {
        Box::new(self.mic.clone())
    }

    fn speaker(&self) -> Result<Box<dyn AudioOutput>> {
        if self.speaker_fails {
            return Err(Error::Audio("no output device".to_string()));
        }
        Ok(Box::new(self.speaker.clone()))
    }

    fn recognizer(&self) -> Box<dyn SpeechRecognizer> {
        Box::new(self.recognizer.clone())
    }

    fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector) as Arc<dyn Connector>
    }
}

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, sample_rate: u32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}
