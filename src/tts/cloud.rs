//! Cloud text-to-speech engines (`OpenAI`, ElevenLabs)

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::NotKeyed};
use secrecy::{ExposeSecret, SecretString};

use super::backend::{SynthesisBackend, VoiceParams, clamp_rate};
use crate::{Error, Result};

/// Default `OpenAI` speech model
pub const DEFAULT_OPENAI_MODEL: &str = "tts-1";

/// Default `OpenAI` voice
pub const DEFAULT_OPENAI_VOICE: &str = "alloy";

/// Default ElevenLabs model
pub const DEFAULT_ELEVENLABS_MODEL: &str = "eleven_monolingual_v1";

/// Default ElevenLabs voice id
pub const DEFAULT_ELEVENLABS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_SPEECH_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Cloud provider behind a [`CloudEngine`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Provider {
    OpenAi,
    ElevenLabs,
}

/// `OpenAI`-style speech request, shared with the local engine
#[derive(serde::Serialize)]
pub(crate) struct SpeechRequest<'a> {
    pub model: &'a str,
    pub input: &'a str,
    pub voice: &'a str,
    pub speed: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<&'a str>,
}

/// Synthesizes speech through a cloud API
pub struct CloudEngine {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    model: String,
    provider: Provider,
    limiter: Option<SharedLimiter>,
}

impl CloudEngine {
    /// Create an `OpenAI` engine
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(
        api_key: Option<SecretString>,
        voice: Option<String>,
        model: Option<String>,
    ) -> Result<Self> {
        let api_key = require_key(api_key, "OpenAI")?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice.unwrap_or_else(|| DEFAULT_OPENAI_VOICE.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            provider: Provider::OpenAi,
            limiter: None,
        })
    }

    /// Create an ElevenLabs engine
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(
        api_key: Option<SecretString>,
        voice_id: Option<String>,
        model: Option<String>,
    ) -> Result<Self> {
        let api_key = require_key(api_key, "ElevenLabs")?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id.unwrap_or_else(|| DEFAULT_ELEVENLABS_VOICE.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_ELEVENLABS_MODEL.to_string()),
            provider: Provider::ElevenLabs,
            limiter: None,
        })
    }

    /// Throttle requests to at most `requests_per_minute`
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        self
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str, params: &VoiceParams) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: params.voice.as_deref().unwrap_or(&self.voice),
            speed: clamp_rate(params.rate),
            response_format: None,
        };

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, params: &VoiceParams) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let voice = params.voice.as_deref().unwrap_or(&self.voice);
        let url = format!("{ELEVENLABS_SPEECH_URL}/{voice}");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SynthesisBackend for CloudEngine {
    fn name(&self) -> &str {
        match self.provider {
            Provider::OpenAi => "openai",
            Provider::ElevenLabs => "elevenlabs",
        }
    }

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Vec<u8>> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        tracing::debug!(provider = self.name(), chars = text.chars().count(), "cloud synthesis");

        match self.provider {
            Provider::OpenAi => self.synthesize_openai(text, params).await,
            Provider::ElevenLabs => self.synthesize_elevenlabs(text, params).await,
        }
    }

    // ElevenLabs has no per-request speed knob
    fn supports_rate(&self) -> bool {
        self.provider == Provider::OpenAi
    }

    fn check(&self) -> Result<()> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(Error::BackendUnavailable(format!(
                "{} API key is empty",
                self.name()
            )));
        }
        Ok(())
    }
}

fn require_key(api_key: Option<SecretString>, provider: &str) -> Result<SecretString> {
    api_key
        .filter(|k| !k.expose_secret().trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{provider} API key required for TTS")))
}
