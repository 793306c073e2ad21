//! System speech engine
//!
//! The system engine owns its own audio output, so it is handed a whole
//! article at once instead of going through the fetch and playback stages.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::backend::{VoiceParams, clamp_rate};
use crate::{Error, Result};

/// Default speech command (any espeak-compatible CLI works)
pub const DEFAULT_COMMAND: &str = "espeak-ng";

/// espeak speaking rate at 1.0x, in words per minute
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

/// Speech engine that plays text directly
#[async_trait]
pub trait SystemSpeech: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Speak `text`, resolving once the utterance has finished.
    ///
    /// Dropping the returned future stops the utterance.
    ///
    /// # Errors
    ///
    /// Returns error if the engine failed to speak
    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<()>;

    /// Languages the engine can speak
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be queried
    async fn available_languages(&self) -> Result<Vec<String>>;

    /// Verify the engine is installed
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] if it is not
    fn check(&self) -> Result<()>;
}

/// Speaks through an espeak-compatible command
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    command: String,
}

impl CommandSpeech {
    /// Create a speaker for `command` (looked up on `PATH`)
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn resolve(&self) -> Result<PathBuf> {
        which::which(&self.command).map_err(|e| {
            Error::BackendUnavailable(format!("speech command {}: {e}", self.command))
        })
    }
}

impl Default for CommandSpeech {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

#[async_trait]
impl SystemSpeech for CommandSpeech {
    fn name(&self) -> &str {
        "system"
    }

    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<()> {
        let program = self.resolve()?;

        let mut command = Command::new(&program);
        command
            .arg("-s")
            .arg(words_per_minute(params.rate).to_string());
        if let Some(voice) = &params.voice {
            command.arg("-v").arg(voice);
        }
        command
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            // Closing stdin lets the engine start speaking
            drop(stdin);
        }

        tracing::debug!(command = %program.display(), chars = text.chars().count(), "system speech started");

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn available_languages(&self) -> Result<Vec<String>> {
        let program = self.resolve()?;
        let output = Command::new(program).arg("--voices").output().await?;

        if !output.status.success() {
            return Err(Error::Tts(format!(
                "{} --voices exited with {}",
                self.command, output.status
            )));
        }

        Ok(parse_voice_languages(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    fn check(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn words_per_minute(rate: f32) -> u32 {
    (BASE_WORDS_PER_MINUTE * clamp_rate(rate)).round() as u32
}

/// Extract the language column from `espeak --voices` output
fn parse_voice_languages(output: &str) -> Vec<String> {
    let mut languages: Vec<String> = output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(ToString::to_string)
        .collect();

    languages.sort();
    languages.dedup();
    languages
}
