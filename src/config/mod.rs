//! Configuration management for the Compita voice bridge
//!
//! Values resolve as environment > config file > default.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::transport::{self, DEFAULT_RECONNECT_DELAY};
use crate::voice::{DEFAULT_BLOCK_SIZE, DEFAULT_RESTART_DELAY, MicrophoneConstraints, SttProvider};
use crate::{Error, Result};

/// Default server base URL
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8042";

/// Default path of the voice stream socket
pub const DEFAULT_STREAM_PATH: &str = "/api/compita/stream";

/// Default path of the status endpoint
pub const DEFAULT_STATUS_PATH: &str = "/api/compita/status";

/// Voice bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Compita server
    pub server_url: Url,

    /// Path of the voice stream socket
    pub stream_path: String,

    /// Path of the companion status endpoint
    pub status_path: String,

    /// Voice pipeline configuration
    pub voice: VoiceConfig,

    /// Local recognition configuration
    pub recognition: RecognitionConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Whether voice is enabled locally
    pub enabled: bool,
    /// Capture block size in frames
    pub block_size: usize,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Request echo cancellation
    pub echo_cancellation: bool,
    /// Request noise suppression
    pub noise_suppression: bool,
}

impl VoiceConfig {
    /// Microphone constraints derived from this configuration
    #[must_use]
    pub const fn constraints(&self) -> MicrophoneConstraints {
        MicrophoneConstraints {
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            block_size: self.block_size,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_size: DEFAULT_BLOCK_SIZE,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Local recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Run the recognition fallback when a key is available
    pub enabled: bool,
    /// Transcription provider
    pub provider: SttProvider,
    /// Provider model
    pub model: String,
    /// Pause before restarting after a transient failure
    pub restart_delay: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        let provider = SttProvider::default();
        Self {
            enabled: false,
            provider,
            model: provider.default_model().to_string(),
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub deepgram: Option<SecretString>,
}

impl ApiKeys {
    /// Key for a transcription provider
    #[must_use]
    pub const fn for_provider(&self, provider: SttProvider) -> Option<&SecretString> {
        match provider {
            SttProvider::Whisper => self.openai.as_ref(),
            SttProvider::Deepgram => self.deepgram.as_ref(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn resolve(
        fc: file::CompitaConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let flag = |key: &str| env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let number = |key: &str| -> Result<Option<u64>> {
            env(key)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|e| Error::Config(format!("{key}: {e}")))
                })
                .transpose()
        };

        let server_url = env("COMPITA_SERVER_URL")
            .or(fc.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server_url = Url::parse(&server_url)
            .map_err(|e| Error::Config(format!("invalid server url {server_url}: {e}")))?;

        let stream_path = env("COMPITA_STREAM_PATH")
            .or(fc.stream_path)
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());
        let status_path = env("COMPITA_STATUS_PATH")
            .or(fc.status_path)
            .unwrap_or_else(|| DEFAULT_STATUS_PATH.to_string());

        let defaults = VoiceConfig::default();
        let block_size = number("COMPITA_BLOCK_SIZE")?
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
            .or(fc.voice.block_size)
            .unwrap_or(defaults.block_size);
        if block_size == 0 {
            return Err(Error::Config("block size must be positive".to_string()));
        }

        let voice = VoiceConfig {
            enabled: flag("COMPITA_VOICE_ENABLED")
                .or(fc.voice.enabled)
                .unwrap_or(defaults.enabled),
            block_size,
            reconnect_delay: number("COMPITA_RECONNECT_DELAY_MS")?
                .or(fc.voice.reconnect_delay_ms)
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            echo_cancellation: flag("COMPITA_ECHO_CANCELLATION")
                .or(fc.voice.echo_cancellation)
                .unwrap_or(defaults.echo_cancellation),
            noise_suppression: flag("COMPITA_NOISE_SUPPRESSION")
                .or(fc.voice.noise_suppression)
                .unwrap_or(defaults.noise_suppression),
        };

        let provider = match env("COMPITA_RECOGNITION_PROVIDER").or(fc.recognition.provider) {
            Some(name) => name.parse::<SttProvider>()?,
            None => SttProvider::default(),
        };
        let recognition = RecognitionConfig {
            enabled: flag("COMPITA_RECOGNITION_ENABLED")
                .or(fc.recognition.enabled)
                .unwrap_or(false),
            provider,
            model: env("COMPITA_RECOGNITION_MODEL")
                .or(fc.recognition.model)
                .unwrap_or_else(|| provider.default_model().to_string()),
            restart_delay: number("COMPITA_RECOGNITION_RESTART_DELAY_MS")?
                .or(fc.recognition.restart_delay_ms)
                .map_or(DEFAULT_RESTART_DELAY, Duration::from_millis),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        Ok(Self {
            server_url,
            stream_path,
            status_path,
            voice,
            recognition,
            api_keys,
        })
    }

    /// Voice stream endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the server URL cannot carry a WebSocket scheme
    pub fn stream_url(&self) -> Result<Url> {
        transport::stream_url(&self.server_url, &self.stream_path)
    }

    /// Companion status endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the status path is not a valid URL path
    pub fn status_url(&self) -> Result<Url> {
        Ok(self.server_url.join(&self.status_path)?)
    }

    /// Key for the configured recognition provider, if recognition should run
    #[must_use]
    pub fn recognition_key(&self) -> Option<&SecretString> {
        if self.recognition.enabled {
            self.api_keys.for_provider(self.recognition.provider)
        } else {
            None
        }
    }
}
