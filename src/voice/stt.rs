//! Speech-to-text (STT) over cloud APIs
//!
//! [`CloudRecognizer`] is the native stand-in for a platform recognizer: it
//! segments captured audio into utterances and transcribes each one with
//! `OpenAI` Whisper or Deepgram.

use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::task::JoinSet;

use super::frame::PROTOCOL_SAMPLE_RATE;
use super::pcm::encode_sample;
use super::recognition::{RecognitionSink, SpeechRecognizer};
use super::segmenter::UtteranceSegmenter;
use crate::error::RecognitionError;
use crate::{Error, Result};

/// Response from `OpenAI` Whisper transcription API
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    /// `OpenAI` Whisper
    #[default]
    Whisper,
    /// Deepgram
    Deepgram,
}

impl SttProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Deepgram => "nova-2",
        }
    }
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown recognition provider: {other}"))),
        }
    }
}

/// Transcribes speech to text
#[derive(Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a transcriber for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(provider: SttProvider, api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "{provider:?} API key required for recognition"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Provider in use
    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns `NotAllowed` if the service rejects the key, `Network` for
    /// any other failure
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
    ) -> std::result::Result<String, RecognitionError> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    async fn transcribe_whisper(
        &self,
        audio: Vec<u8>,
    ) -> std::result::Result<String, RecognitionError> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(network)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(network)?;

        let response = check_status(response, "Whisper").await?;
        let result: WhisperResponse = response.json().await.map_err(network)?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    async fn transcribe_deepgram(
        &self,
        audio: Vec<u8>,
    ) -> std::result::Result<String, RecognitionError> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(network)?;

        let response = check_status(response, "Deepgram").await?;
        let result: DeepgramResponse = response.json().await.map_err(network)?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

fn network(e: impl std::fmt::Display) -> RecognitionError {
    RecognitionError::Network(e.to_string())
}

async fn check_status(
    response: reqwest::Response,
    provider: &str,
) -> std::result::Result<reqwest::Response, RecognitionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = %status, body = %body, provider, "transcription API error");
    Err(classify_status(status, format!("{provider} API error {status}")))
}

/// Map a failed HTTP status to a recognition error
#[must_use]
pub fn classify_status(status: reqwest::StatusCode, message: String) -> RecognitionError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            RecognitionError::NotAllowed(message)
        }
        _ => RecognitionError::Network(message),
    }
}

/// Encode mono samples as a 16-bit WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(encode_sample(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Recognizer that segments captured audio and transcribes it in the cloud
///
/// Must be started inside a tokio runtime; each utterance is transcribed on
/// its own task and reported as a final result.
pub struct CloudRecognizer {
    stt: SpeechToText,
    segmenter: UtteranceSegmenter,
    sink: Option<RecognitionSink>,
    inflight: JoinSet<()>,
}

impl CloudRecognizer {
    /// Wrap a transcriber
    #[must_use]
    pub fn new(stt: SpeechToText) -> Self {
        Self {
            stt,
            segmenter: UtteranceSegmenter::new(),
            sink: None,
            inflight: JoinSet::new(),
        }
    }

    fn transcribe(&mut self, utterance: Vec<f32>, sink: RecognitionSink) {
        let wav = match samples_to_wav(&utterance, PROTOCOL_SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return;
            }
        };

        let stt = self.stt.clone();
        self.inflight.spawn(async move {
            match stt.transcribe(wav).await {
                Ok(text) if text.trim().is_empty() => {
                    sink.error(RecognitionError::NoSpeech);
                }
                Ok(text) => {
                    sink.result(text, true);
                }
                Err(e) => {
                    sink.error(e);
                }
            }
        });
    }
}

impl SpeechRecognizer for CloudRecognizer {
    fn start(&mut self, sink: RecognitionSink) -> std::result::Result<(), RecognitionError> {
        tracing::debug!(provider = ?self.stt.provider(), "cloud recognizer started");
        self.segmenter.reset();
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink = None;
        self.segmenter.reset();
        self.inflight.abort_all();
    }

    fn feed(&mut self, samples: &[f32]) {
        // reap finished transcriptions
        while self.inflight.try_join_next().is_some() {}

        let Some(sink) = self.sink.clone() else {
            return;
        };
        if let Some(utterance) = self.segmenter.push(samples) {
            self.transcribe(utterance, sink);
        }
    }
}

impl Drop for CloudRecognizer {
    fn drop(&mut self) {
        self.inflight.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing() {
        assert_eq!("whisper".parse::<SttProvider>().unwrap(), SttProvider::Whisper);
        assert_eq!("Deepgram".parse::<SttProvider>().unwrap(), SttProvider::Deepgram);
        assert!("watson".parse::<SttProvider>().is_err());
    }

    #[test]
    fn empty_key_is_rejected() {
        let result = SpeechToText::new(
            SttProvider::Whisper,
            SecretString::from(String::new()),
            "whisper-1".to_string(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn auth_failures_are_not_allowed() {
        let err = classify_status(reqwest::StatusCode::UNAUTHORIZED, "nope".to_string());
        assert!(!err.is_transient());

        let err = classify_status(reqwest::StatusCode::BAD_GATEWAY, "later".to_string());
        assert!(err.is_transient());
    }

    #[test]
    fn wav_header_and_length() {
        let wav = samples_to_wav(&[0.0; 240], PROTOCOL_SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus two bytes per sample
        assert_eq!(wav.len(), 44 + 480);
    }
}
