//! Wire framing for the voice stream socket
//!
//! Binary frames carry PCM16 little-endian mono audio at 24 kHz in both
//! directions. Text frames carry either a plain-text command or hint, or a
//! JSON control event from the server.

use serde::{Deserialize, Serialize};

use crate::voice::AudioFrame;
use crate::voice::pcm::{decode_pcm16, encode_pcm16};
use crate::{Error, Result};

/// Prefix that marks a text frame as a recognized-speech hint
pub const TRANSCRIPT_HINT_PREFIX: &str = "transcript:";

/// Text frame asking the server to start a turn
pub const ACTIVATE_COMMAND: &str = "activate";

/// Text frame announcing a graceful client shutdown
pub const CLOSE_COMMAND: &str = "close";

/// One socket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// PCM16 little-endian samples
    Binary(Vec<u8>),
    /// Control text
    Text(String),
}

impl WireMessage {
    /// Frame captured audio for sending
    #[must_use]
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::Binary(encode_pcm16(frame.samples()))
    }

    /// Frame a control payload for sending
    ///
    /// # Errors
    ///
    /// Returns error if JSON serialization fails
    pub fn control(payload: &ControlPayload) -> Result<Self> {
        payload.encode().map(Self::Text)
    }
}

/// Speaker of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant
    User,
    /// The assistant
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// Decoded text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPayload {
    /// A line of conversation transcript
    Transcript {
        /// Who spoke
        role: Role,
        /// What was said
        text: String,
    },
    /// Turn state announced by the server; the value is not validated here
    State {
        /// Raw state name
        state: String,
    },
    /// Locally recognized utterance
    TranscriptHint(String),
    /// Manual turn activation
    Activate,
    /// Graceful shutdown notice
    Close,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerEvent {
    Transcript { role: Role, text: String },
    State { state: String },
}

impl ControlPayload {
    /// Parse a received text frame
    ///
    /// Hints and plain commands are recognized before any JSON parsing, so
    /// a `transcript:` string is never treated as JSON.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` if the text is none of the known forms
    pub fn parse(text: &str) -> Result<Self> {
        if let Some(hint) = text.strip_prefix(TRANSCRIPT_HINT_PREFIX) {
            return Ok(Self::TranscriptHint(hint.to_string()));
        }

        match text {
            ACTIVATE_COMMAND => return Ok(Self::Activate),
            CLOSE_COMMAND => return Ok(Self::Close),
            _ => {}
        }

        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent::Transcript { role, text }) => Ok(Self::Transcript { role, text }),
            Ok(ServerEvent::State { state }) => Ok(Self::State { state }),
            Err(e) => Err(Error::MalformedMessage(format!("{e}: {}", preview(text)))),
        }
    }

    /// Text form of the payload
    ///
    /// Hints are lowercased on the way out.
    ///
    /// # Errors
    ///
    /// Returns error if JSON serialization fails
    pub fn encode(&self) -> Result<String> {
        let text = match self {
            Self::TranscriptHint(hint) => {
                format!("{TRANSCRIPT_HINT_PREFIX}{}", hint.to_lowercase())
            }
            Self::Activate => ACTIVATE_COMMAND.to_string(),
            Self::Close => CLOSE_COMMAND.to_string(),
            Self::Transcript { role, text } => serde_json::to_string(&ServerEvent::Transcript {
                role: *role,
                text: text.clone(),
            })?,
            Self::State { state } => serde_json::to_string(&ServerEvent::State {
                state: state.clone(),
            })?,
        };
        Ok(text)
    }
}

/// Decode a received binary frame
#[must_use]
pub fn decode_audio(bytes: &[u8]) -> AudioFrame {
    AudioFrame::new(decode_pcm16(bytes))
}

fn preview(text: &str) -> String {
    const MAX: usize = 64;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_events() {
        assert_eq!(
            ControlPayload::parse(r#"{"type":"state","state":"active"}"#).unwrap(),
            ControlPayload::State {
                state: "active".to_string()
            }
        );
        assert_eq!(
            ControlPayload::parse(r#"{"type":"transcript","role":"assistant","text":"Hola"}"#)
                .unwrap(),
            ControlPayload::Transcript {
                role: Role::Assistant,
                text: "Hola".to_string()
            }
        );
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let payload =
            ControlPayload::parse(r#"{"type":"state","state":"processing","ts":12}"#).unwrap();
        assert!(matches!(payload, ControlPayload::State { state } if state == "processing"));
    }

    #[test]
    fn hint_is_never_parsed_as_json() {
        let payload = ControlPayload::parse(r#"transcript:{"type":"state","state":"active"}"#)
            .unwrap();
        assert!(matches!(payload, ControlPayload::TranscriptHint(_)));
    }

    #[test]
    fn plain_commands() {
        assert_eq!(ControlPayload::parse("activate").unwrap(), ControlPayload::Activate);
        assert_eq!(ControlPayload::parse("close").unwrap(), ControlPayload::Close);
    }

    #[test]
    fn malformed_text_is_an_error() {
        for text in [
            "",
            "hello",
            "{",
            r#"{"type":"dance"}"#,
            r#"{"type":"transcript","role":"robot","text":"x"}"#,
        ] {
            assert!(
                matches!(ControlPayload::parse(text), Err(Error::MalformedMessage(_))),
                "{text:?} should be malformed"
            );
        }
    }

    #[test]
    fn hint_is_lowercased_with_prefix() {
        let text = ControlPayload::TranscriptHint("Oye Compita".to_string())
            .encode()
            .unwrap();
        assert_eq!(text, "transcript:oye compita");
    }

    #[test]
    fn audio_frames_are_pcm16() {
        let frame = AudioFrame::new(vec![0.0; 2400]);
        let WireMessage::Binary(bytes) = WireMessage::audio(&frame) else {
            panic!("audio must be binary");
        };
        assert_eq!(bytes.len(), 4800);
        assert_eq!(decode_audio(&bytes).len(), 2400);
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), 67);
        assert_eq!(preview("short"), "short");
    }
}
