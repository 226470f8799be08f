//! Compita Voice - real-time voice bridge for the Compita assistant
//!
//! This library streams microphone audio to the Compita server over a
//! persistent WebSocket and plays back the speech it returns:
//! - Capture with sample-rate conversion to 24 kHz PCM16
//! - Ordered, non-overlapping playback
//! - Turn-state tracking driven by server events
//! - Optional local recognition that sends transcript hints
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   blocks    ┌─────────────────────┐   PCM16    ┌──────────┐
//! │  Microphone  ├────────────►│                     ├───────────►│          │
//! └──────────────┘             │   VoiceController   │            │  Relay   │
//! ┌──────────────┐   frames    │  (one event loop)   │  PCM16 /   │  server  │
//! │   Speaker    │◄────────────┤                     │◄───────────┤          │
//! └──────────────┘             └──────────▲──────────┘   JSON     └──────────┘
//!                                         │ hints
//!                              ┌──────────┴──────────┐
//!                              │ Recognition fallback│
//!                              └─────────────────────┘
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod platform;
pub mod status;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use controller::{
    ControllerSettings, TranscriptLine, VoiceCommand, VoiceController, VoicePlatform,
    VoiceSnapshot,
};
pub use error::{Error, MicError, RecognitionError, Result};
pub use platform::NativePlatform;
pub use status::{StatusClient, VoiceStatus};
pub use transport::{TransportEvent, VoiceTransport};
pub use voice::{AudioFrame, TurnState};
