//! Error types for the read-aloud pipeline

use thiserror::Error;

/// Result type alias for reader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the read-aloud pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio decode or output error
    #[error("audio error: {0}")]
    Audio(String),

    /// A playback was started while another one was still active
    #[error("audio sink is already playing")]
    SinkBusy,

    /// Synthesis backend cannot serve requests (missing credentials, binary, ...)
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The controller task has shut down
    #[error("reader has shut down")]
    Closed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
