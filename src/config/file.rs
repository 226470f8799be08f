//! TOML configuration file loading
//!
//! Supports `~/.config/compita/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CompitaConfigFile {
    /// Base URL of the Compita server (e.g. `http://localhost:8042`)
    pub server_url: Option<String>,

    /// Path of the voice stream socket
    pub stream_path: Option<String>,

    /// Path of the companion status endpoint
    pub status_path: Option<String>,

    /// Voice pipeline configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Local recognition configuration
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Voice pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable the voice feature
    pub enabled: Option<bool>,

    /// Capture block size in frames
    pub block_size: Option<usize>,

    /// Delay before reconnecting after a close
    pub reconnect_delay_ms: Option<u64>,

    /// Request echo cancellation from the input device
    pub echo_cancellation: Option<bool>,

    /// Request noise suppression from the input device
    pub noise_suppression: Option<bool>,
}

/// Local recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Run the recognition fallback
    pub enabled: Option<bool>,

    /// `whisper` or `deepgram`
    pub provider: Option<String>,

    /// Provider model identifier
    pub model: Option<String>,

    /// Pause before restarting after a transient failure
    pub restart_delay_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `CompitaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CompitaConfigFile {
    let Some(path) = config_file_path() else {
        return CompitaConfigFile::default();
    };

    if !path.exists() {
        return CompitaConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            CompitaConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<CompitaConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/compita/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("compita").join("config.toml"))
}
