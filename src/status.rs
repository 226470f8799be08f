//! Companion status endpoint
//!
//! The server reports whether the voice feature is switched on. The
//! controller consults it before enabling.

use serde::Deserialize;
use url::Url;

use crate::Result;

/// Voice feature status reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VoiceStatus {
    /// Voice feature switched on in the server settings
    pub enabled: bool,
    /// A server-side voice loop is running
    pub running: bool,
    /// The server has a key for its voice model
    pub has_api_key: bool,
    /// Where voice runs: `browser`, `robot` or `legacy`
    pub voice_mode: Option<String>,
    /// The server can route voice through attached robot hardware
    pub robot_voice_available: bool,
}

impl VoiceStatus {
    /// Whether a client should stream voice itself
    ///
    /// A server already running voice in another mode does not need a
    /// client stream; a missing mode means client streaming.
    #[must_use]
    pub fn client_mode(&self) -> bool {
        self.voice_mode.as_deref().is_none_or(|mode| mode == "browser")
    }
}

/// Fetches [`VoiceStatus`] over HTTP
#[derive(Debug, Clone)]
pub struct StatusClient {
    client: reqwest::Client,
    url: Url,
}

impl StatusClient {
    /// Create a client for the given status URL
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Status endpoint URL
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch the current status
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body is not valid JSON
    pub async fn fetch(&self) -> Result<VoiceStatus> {
        tracing::debug!(url = %self.url, "fetching voice status");

        let status = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<VoiceStatus>()
            .await?;

        tracing::debug!(
            enabled = status.enabled,
            running = status.running,
            voice_mode = ?status.voice_mode,
            "voice status"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_unknown_fields() {
        let status: VoiceStatus =
            serde_json::from_str(r#"{"enabled":true,"robot_voice_debug":{"x":1}}"#).unwrap();
        assert!(status.enabled);
        assert!(!status.running);
        assert!(status.voice_mode.is_none());
        assert!(status.client_mode());
    }

    #[test]
    fn robot_mode_is_not_client_mode() {
        let status: VoiceStatus =
            serde_json::from_str(r#"{"enabled":true,"voice_mode":"robot"}"#).unwrap();
        assert!(!status.client_mode());
    }
}
