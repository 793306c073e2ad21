//! Local neural TTS engine reached over HTTP
//!
//! Targets on-host servers exposing the `OpenAI`-compatible
//! `POST /v1/audio/speech` endpoint (Kokoro, Piper and similar wrappers).

use async_trait::async_trait;
use url::Url;

use super::backend::{SynthesisBackend, VoiceParams, clamp_rate};
use super::cloud::SpeechRequest;
use crate::{Error, Result};

/// Default model name sent to the local engine
pub const DEFAULT_LOCAL_MODEL: &str = "kokoro";

/// Default voice sent to the local engine
pub const DEFAULT_LOCAL_VOICE: &str = "af_heart";

const SPEECH_PATH: &str = "v1/audio/speech";

/// Synthesizes speech through a local engine
pub struct LocalEngine {
    client: reqwest::Client,
    endpoint: Option<Url>,
    model: String,
    voice: String,
}

impl LocalEngine {
    /// Create a local engine client
    ///
    /// A missing `base_url` is accepted here and reported by
    /// [`SynthesisBackend::check`] when an article starts.
    ///
    /// # Errors
    ///
    /// Returns error if `base_url` is not a valid http(s) URL
    pub fn new(base_url: Option<&str>, model: String, voice: Option<String>) -> Result<Self> {
        let endpoint = base_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(speech_endpoint)
            .transpose()?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            voice: voice.unwrap_or_else(|| DEFAULT_LOCAL_VOICE.to_string()),
        })
    }

    /// Resolved speech endpoint, if configured
    #[must_use]
    pub const fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }
}

#[async_trait]
impl SynthesisBackend for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Vec<u8>> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable("local engine URL not set".to_string()))?;

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: params.voice.as_deref().unwrap_or(&self.voice),
            speed: clamp_rate(params.rate),
            response_format: Some("wav"),
        };

        let response = self
            .client
            .post(endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("local TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("local TTS returned no audio".to_string()));
        }
        Ok(audio.to_vec())
    }

    fn check(&self) -> Result<()> {
        if self.endpoint.is_none() {
            return Err(Error::BackendUnavailable(
                "local engine selected but BEACON_READER_LOCAL_URL is not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Join the speech path onto a base URL, keeping any path prefix
fn speech_endpoint(base: &str) -> Result<Url> {
    let mut base = Url::parse(base).map_err(|e| Error::Config(format!("local engine URL: {e}")))?;

    if !matches!(base.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "local engine URL must be http(s), got {}",
            base.scheme()
        )));
    }

    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(SPEECH_PATH)
        .map_err(|e| Error::Config(format!("local engine URL: {e}")))
}
