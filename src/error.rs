//! Error types for the Compita voice bridge

use thiserror::Error;

/// Result type alias for voice bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone could not be acquired
    #[error("microphone error: {0}")]
    Mic(#[from] MicError),

    /// Socket-level failure (recovered through reconnect, never fatal)
    #[error("transport error: {0}")]
    Transport(String),

    /// Local speech recognition failure
    #[error("recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Text frame from the server that is neither a hint nor valid JSON
    #[error("malformed server message: {0}")]
    MalformedMessage(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

/// Reasons the microphone could not be opened
///
/// Both are user-visible and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MicError {
    /// The user or OS refused microphone access
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input hardware
    #[error("no input device available: {0}")]
    DeviceUnavailable(String),
}

/// Errors reported by a speech recognizer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// Recognizer heard nothing before its timeout
    #[error("no speech detected")]
    NoSpeech,

    /// Recognition was interrupted
    #[error("recognition aborted")]
    Aborted,

    /// Recognition service unreachable or returned a server error
    #[error("recognition network error: {0}")]
    Network(String),

    /// Recognition service refused the request
    #[error("recognition not allowed: {0}")]
    NotAllowed(String),

    /// Capability missing on this host
    #[error("recognition unsupported: {0}")]
    Unsupported(String),
}

impl RecognitionError {
    /// Whether the recognizer should restart itself after this error
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::Aborted | Self::Network(_))
    }
}
