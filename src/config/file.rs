//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon/reader.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ReaderConfigFile {
    /// Preferred backend ("system", "local" or "cloud")
    #[serde(default)]
    pub backend: Option<String>,

    /// Reading behaviour
    #[serde(default)]
    pub reading: ReadingFileConfig,

    /// Cloud engine settings
    #[serde(default)]
    pub cloud: CloudFileConfig,

    /// Local engine settings
    #[serde(default)]
    pub local: LocalFileConfig,

    /// System speech settings
    #[serde(default)]
    pub system: SystemFileConfig,

    /// API keys for cloud engines
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Chunking, rate and concurrency
#[derive(Debug, Default, Deserialize)]
pub struct ReadingFileConfig {
    /// Speech rate multiplier
    pub speech_rate: Option<f32>,

    /// Soft chunk length bound in characters
    pub chunk_limit: Option<usize>,

    /// Maximum concurrent synthesis calls
    pub fetch_concurrency: Option<usize>,
}

/// Cloud engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct CloudFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub requests_per_minute: Option<u32>,
}

/// Local engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct LocalFileConfig {
    /// Base URL of the engine (e.g. `http://127.0.0.1:8880`)
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// System speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct SystemFileConfig {
    /// espeak-compatible command
    pub command: Option<String>,
    pub voice: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ReaderConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ReaderConfigFile {
    config_file_path().map_or_else(ReaderConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> ReaderConfigFile {
    if !path.exists() {
        return ReaderConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ReaderConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ReaderConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon/reader.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon")
            .join("reader.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_file_from(&dir.path().join("nope.toml"));
        assert!(fc.backend.is_none());
        assert!(fc.reading.chunk_limit.is_none());
    }

    #[test]
    fn parses_partial_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.toml");
        std::fs::write(
            &path,
            r#"
backend = "local"

[reading]
chunk_limit = 240

[local]
url = "http://127.0.0.1:8880"
"#,
        )
        .unwrap();

        let fc = load_config_file_from(&path);
        assert_eq!(fc.backend.as_deref(), Some("local"));
        assert_eq!(fc.reading.chunk_limit, Some(240));
        assert_eq!(fc.local.url.as_deref(), Some("http://127.0.0.1:8880"));
        assert!(fc.cloud.provider.is_none());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.toml");
        std::fs::write(&path, "backend = [not toml").unwrap();

        let fc = load_config_file_from(&path);
        assert!(fc.backend.is_none());
    }
}
