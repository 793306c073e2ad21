//! Synthesis backend abstraction
//!
//! A read-aloud session runs against exactly one [`Backend`]: either the
//! system speech engine, which speaks whole articles itself, or an engine
//! implementing [`SynthesisBackend`], which turns one chunk at a time into
//! audio bytes for the playback stage.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::cloud::CloudEngine;
use super::local::LocalEngine;
use super::system::{CommandSpeech, SystemSpeech};
use crate::config::{CloudProvider, Config};
use crate::{Error, Result};

/// Slowest accepted speech rate multiplier
pub const MIN_RATE: f32 = 0.25;

/// Fastest accepted speech rate multiplier
pub const MAX_RATE: f32 = 4.0;

/// Per-call synthesis parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// Voice override; engines fall back to their configured voice
    pub voice: Option<String>,
    /// Speech rate multiplier (1.0 is normal speed)
    pub rate: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
        }
    }
}

/// Clamp a requested rate into the supported range
#[must_use]
pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_RATE, MAX_RATE)
    } else {
        1.0
    }
}

/// Engine that synthesizes one chunk of text into encoded audio (MP3 or WAV).
///
/// Implementations are shared by all fetch workers of an article, so they
/// must tolerate concurrent calls.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Synthesize `text` into encoded audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if the engine produced no usable audio
    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Vec<u8>>;

    /// Whether [`VoiceParams::rate`] has any effect on this engine
    fn supports_rate(&self) -> bool {
        true
    }

    /// Verify the engine can serve requests before an article starts
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] if the engine is misconfigured
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Which kind of backend a session uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// System speech engine, speaks whole articles
    #[default]
    System,
    /// On-host neural engine over HTTP
    Local,
    /// Cloud speech API
    Cloud,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "local" | "local-engine" => Ok(Self::Local),
            "cloud" | "cloud-engine" => Ok(Self::Cloud),
            other => Err(Error::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// The active synthesis backend of a session
#[derive(Clone)]
pub enum Backend {
    /// System speech engine; bypasses chunking, fetch and the audio sink
    System(Arc<dyn SystemSpeech>),
    /// Chunk-at-a-time engine driven through the fetch and playback stages
    Engine(Arc<dyn SynthesisBackend>),
}

impl Backend {
    /// Build the backend selected by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the selected engine cannot be constructed
    pub fn from_config(config: &Config) -> Result<Self> {
        let kind = config.backend_kind();
        tracing::debug!(backend = %kind, "selecting synthesis backend");

        match kind {
            BackendKind::System => Ok(Self::System(Arc::new(CommandSpeech::new(
                config.system.command.clone(),
            )))),
            BackendKind::Local => {
                let engine = LocalEngine::new(
                    config.local.url.as_deref(),
                    config.local.model.clone(),
                    config.local.voice.clone(),
                )?;
                Ok(Self::Engine(Arc::new(engine)))
            }
            BackendKind::Cloud => {
                let engine = match config.cloud.provider {
                    CloudProvider::OpenAi => CloudEngine::new_openai(
                        config.api_keys.openai.clone(),
                        config.cloud.voice.clone(),
                        config.cloud.model.clone(),
                    )?,
                    CloudProvider::ElevenLabs => CloudEngine::new_elevenlabs(
                        config.api_keys.elevenlabs.clone(),
                        config.cloud.voice.clone(),
                        config.cloud.model.clone(),
                    )?,
                };
                let engine = match config.cloud.requests_per_minute {
                    Some(rpm) => engine.with_rate_limit(rpm),
                    None => engine,
                };
                Ok(Self::Engine(Arc::new(engine)))
            }
        }
    }

    /// Short identifier used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::System(speech) => speech.name(),
            Self::Engine(engine) => engine.name(),
        }
    }

    /// Whether this is the system speech backend
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Whether speech rate changes have any effect
    #[must_use]
    pub fn supports_rate(&self) -> bool {
        match self {
            Self::System(_) => true,
            Self::Engine(engine) => engine.supports_rate(),
        }
    }

    /// Verify the backend can serve an article
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] if it cannot
    pub fn check(&self) -> Result<()> {
        match self {
            Self::System(speech) => speech.check(),
            Self::Engine(engine) => engine.check(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System(speech) => f.debug_tuple("System").field(&speech.name()).finish(),
            Self::Engine(engine) => f.debug_tuple("Engine").field(&engine.name()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("system".parse::<BackendKind>().unwrap(), BackendKind::System);
        assert_eq!(" Local ".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("cloud-engine".parse::<BackendKind>().unwrap(), BackendKind::Cloud);
        assert!("carrier-pigeon".parse::<BackendKind>().is_err());
    }

    #[test]
    fn clamp_rate_bounds() {
        assert!((clamp_rate(0.1) - MIN_RATE).abs() < f32::EPSILON);
        assert!((clamp_rate(9.0) - MAX_RATE).abs() < f32::EPSILON);
        assert!((clamp_rate(1.5) - 1.5).abs() < f32::EPSILON);
        assert!((clamp_rate(f32::NAN) - 1.0).abs() < f32::EPSILON);
    }
}
