//! Native host platform: cpal audio, tungstenite sockets, cloud recognition

use std::sync::Arc;

use crate::config::Config;
use crate::controller::VoicePlatform;
use crate::transport::{Connector, TungsteniteConnector};
use crate::voice::{
    AudioOutput, CloudRecognizer, CpalMicrophone, CpalSpeaker, Microphone, NullRecognizer,
    SpeechRecognizer, SpeechToText,
};
use crate::Result;

/// Platform backed by the local audio devices
pub struct NativePlatform {
    stt: Option<SpeechToText>,
    connector: Arc<TungsteniteConnector>,
}

impl NativePlatform {
    /// Build the platform from configuration
    ///
    /// Recognition is available only when enabled and a key for the
    /// configured provider is present.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let stt = config.recognition_key().and_then(|key| {
            SpeechToText::new(
                config.recognition.provider,
                key.clone(),
                config.recognition.model.clone(),
            )
            .inspect_err(|e| tracing::warn!(error = %e, "recognition unavailable"))
            .ok()
        });

        match &stt {
            Some(stt) => tracing::info!(
                provider = ?stt.provider(),
                model = %config.recognition.model,
                "local recognition available"
            ),
            None if config.recognition.enabled => {
                tracing::info!(
                    provider = ?config.recognition.provider,
                    "no API key, local recognition disabled"
                );
            }
            None => tracing::debug!("local recognition off"),
        }

        Self {
            stt,
            connector: Arc::new(TungsteniteConnector),
        }
    }

    /// Whether a recognizer will be provided
    #[must_use]
    pub const fn has_recognition(&self) -> bool {
        self.stt.is_some()
    }
}

impl VoicePlatform for NativePlatform {
    fn microphone(&self) -> Box<dyn Microphone> {
        Box::new(CpalMicrophone::new())
    }

    fn speaker(&self) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalSpeaker::new()?))
    }

    fn recognizer(&self) -> Box<dyn SpeechRecognizer> {
        match &self.stt {
            Some(stt) => Box::new(CloudRecognizer::new(stt.clone())),
            None => Box::new(NullRecognizer),
        }
    }

    fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector) as Arc<dyn Connector>
    }
}
