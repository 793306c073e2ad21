//! Configuration for the read-aloud pipeline
//!
//! Values resolve in priority order: environment variable, then the TOML
//! overlay from [`file::config_file_path`], then built-in defaults.

pub mod file;

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use self::file::ReaderConfigFile;
use crate::tts::backend::clamp_rate;
use crate::tts::chunking::DEFAULT_LIMIT;
use crate::tts::fetch::DEFAULT_CONCURRENCY;
use crate::tts::local::DEFAULT_LOCAL_MODEL;
use crate::tts::system::DEFAULT_COMMAND;
use crate::tts::BackendKind;
use crate::{Error, Result};

/// Reader configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Preferred backend; see [`Config::backend_kind`] for the effective one
    pub backend: BackendKind,

    /// Speech rate multiplier, clamped to the supported range
    pub speech_rate: f32,

    /// Soft chunk length bound in characters
    pub chunk_limit: usize,

    /// Maximum concurrent synthesis calls (at least 1)
    pub fetch_concurrency: usize,

    /// Cloud engine configuration
    pub cloud: CloudConfig,

    /// Local engine configuration
    pub local: LocalEngineConfig,

    /// System speech configuration
    pub system: SystemSpeechConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Cloud speech provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// `OpenAI` speech API
    #[default]
    OpenAi,
    /// ElevenLabs text-to-speech API
    ElevenLabs,
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::ElevenLabs => write!(f, "elevenlabs"),
        }
    }
}

impl FromStr for CloudProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" | "eleven-labs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown cloud provider: {other}"))),
        }
    }
}

/// Cloud engine configuration
#[derive(Debug, Clone, Default)]
pub struct CloudConfig {
    pub provider: CloudProvider,
    /// Model override (provider default when `None`)
    pub model: Option<String>,
    /// Voice override (provider default when `None`)
    pub voice: Option<String>,
    /// Client-side request budget
    pub requests_per_minute: Option<u32>,
}

/// Local engine configuration
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Base URL; the backend reports itself unavailable without one
    pub url: Option<String>,
    pub model: String,
    pub voice: Option<String>,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: DEFAULT_LOCAL_MODEL.to_string(),
            voice: None,
        }
    }
}

/// System speech configuration
#[derive(Debug, Clone)]
pub struct SystemSpeechConfig {
    pub command: String,
    pub voice: Option<String>,
}

impl Default for SystemSpeechConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            voice: None,
        }
    }
}

/// API keys for cloud engines
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            speech_rate: 1.0,
            chunk_limit: DEFAULT_LIMIT,
            fetch_concurrency: DEFAULT_CONCURRENCY,
            cloud: CloudConfig::default(),
            local: LocalEngineConfig::default(),
            system: SystemSpeechConfig::default(),
            api_keys: ApiKeys::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a backend or provider name is not recognized
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a backend or provider name is not recognized
    pub fn from_sources<F>(fc: ReaderConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let backend = env("BEACON_READER_BACKEND")
            .or(fc.backend)
            .map(|b| b.parse::<BackendKind>())
            .transpose()?
            .unwrap_or_default();

        let provider = env("BEACON_READER_CLOUD_PROVIDER")
            .or(fc.cloud.provider)
            .map(|p| p.parse::<CloudProvider>())
            .transpose()?
            .unwrap_or_default();

        let speech_rate = env("BEACON_READER_RATE")
            .and_then(|r| r.parse().ok())
            .or(fc.reading.speech_rate)
            .map_or(1.0, clamp_rate);

        let chunk_limit = env("BEACON_READER_CHUNK_LIMIT")
            .and_then(|l| l.parse().ok())
            .or(fc.reading.chunk_limit)
            .filter(|&l| l > 0)
            .unwrap_or(DEFAULT_LIMIT);

        let fetch_concurrency = env("BEACON_READER_CONCURRENCY")
            .and_then(|c| c.parse().ok())
            .or(fc.reading.fetch_concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);

        let cloud = CloudConfig {
            provider,
            model: env("BEACON_READER_CLOUD_MODEL").or(fc.cloud.model),
            voice: env("BEACON_READER_CLOUD_VOICE").or(fc.cloud.voice),
            requests_per_minute: env("BEACON_READER_CLOUD_RPM")
                .and_then(|r| r.parse().ok())
                .or(fc.cloud.requests_per_minute)
                .filter(|&r| r > 0),
        };

        let local = LocalEngineConfig {
            url: env("BEACON_READER_LOCAL_URL").or(fc.local.url),
            model: env("BEACON_READER_LOCAL_MODEL")
                .or(fc.local.model)
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
            voice: env("BEACON_READER_LOCAL_VOICE").or(fc.local.voice),
        };

        let system = SystemSpeechConfig {
            command: env("BEACON_READER_SYSTEM_COMMAND")
                .or(fc.system.command)
                .unwrap_or_else(|| DEFAULT_COMMAND.to_string()),
            voice: env("BEACON_READER_SYSTEM_VOICE").or(fc.system.voice),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
        };

        Ok(Self {
            backend,
            speech_rate,
            chunk_limit,
            fetch_concurrency,
            cloud,
            local,
            system,
            api_keys,
        })
    }

    /// Whether the key for the configured cloud provider is present
    #[must_use]
    pub fn has_cloud_credentials(&self) -> bool {
        let key = match self.cloud.provider {
            CloudProvider::OpenAi => self.api_keys.openai.as_ref(),
            CloudProvider::ElevenLabs => self.api_keys.elevenlabs.as_ref(),
        };
        key.is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    /// Effective backend: cloud when preferred and its key is present,
    /// local when preferred, otherwise system speech
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            BackendKind::Cloud if self.has_cloud_credentials() => BackendKind::Cloud,
            BackendKind::Cloud => {
                tracing::warn!(
                    provider = %self.cloud.provider,
                    "cloud backend preferred but no API key configured, using system speech"
                );
                BackendKind::System
            }
            BackendKind::Local => BackendKind::Local,
            BackendKind::System => BackendKind::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(vars: &[(&str, &str)], fc: ReaderConfigFile) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(fc, |key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn defaults_without_sources() {
        let config = resolve(&[], ReaderConfigFile::default());
        assert_eq!(config.backend, BackendKind::System);
        assert_eq!(config.backend_kind(), BackendKind::System);
        assert_eq!(config.chunk_limit, 100);
        assert_eq!(config.fetch_concurrency, 3);
        assert!((config.speech_rate - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.system.command, "espeak-ng");
        assert_eq!(config.local.model, "kokoro");
    }

    #[test]
    fn env_overrides_file() {
        let mut fc = ReaderConfigFile::default();
        fc.backend = Some("system".to_string());
        fc.reading.chunk_limit = Some(50);
        fc.reading.fetch_concurrency = Some(5);

        let config = resolve(
            &[("BEACON_READER_BACKEND", "local"), ("BEACON_READER_CHUNK_LIMIT", "200")],
            fc,
        );
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.chunk_limit, 200);
        assert_eq!(config.fetch_concurrency, 5);
    }

    #[test]
    fn concurrency_and_rate_are_bounded() {
        let config = resolve(
            &[("BEACON_READER_CONCURRENCY", "0"), ("BEACON_READER_RATE", "12")],
            ReaderConfigFile::default(),
        );
        assert_eq!(config.fetch_concurrency, 1);
        assert!((config.speech_rate - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cloud_requires_key() {
        let without_key = resolve(&[("BEACON_READER_BACKEND", "cloud")], ReaderConfigFile::default());
        assert_eq!(without_key.backend_kind(), BackendKind::System);

        let with_key = resolve(
            &[("BEACON_READER_BACKEND", "cloud"), ("OPENAI_API_KEY", "sk-test")],
            ReaderConfigFile::default(),
        );
        assert_eq!(with_key.backend_kind(), BackendKind::Cloud);
    }

    #[test]
    fn key_must_match_provider() {
        let config = resolve(
            &[
                ("BEACON_READER_BACKEND", "cloud"),
                ("BEACON_READER_CLOUD_PROVIDER", "elevenlabs"),
                ("OPENAI_API_KEY", "sk-test"),
            ],
            ReaderConfigFile::default(),
        );
        assert_eq!(config.cloud.provider, CloudProvider::ElevenLabs);
        assert!(!config.has_cloud_credentials());
        assert_eq!(config.backend_kind(), BackendKind::System);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut fc = ReaderConfigFile::default();
        fc.local.url = Some("http://127.0.0.1:8880".to_string());

        let config = resolve(&[("BEACON_READER_LOCAL_URL", "  ")], fc);
        assert_eq!(config.local.url.as_deref(), Some("http://127.0.0.1:8880"));
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let result = Config::from_sources(ReaderConfigFile::default(), |key| {
            (key == "BEACON_READER_BACKEND").then(|| "carrier-pigeon".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
