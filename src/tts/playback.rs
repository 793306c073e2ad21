//! Ordered playback of synthesized chunks

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::fetch::SynthesisResult;
use crate::Result;

/// Output device that plays one encoded clip at a time.
///
/// Control methods (`pause`, `resume`, `stop`) are synchronous and may be
/// called from any task while a `play` is in progress.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play encoded audio, resolving when it finishes or is stopped
    ///
    /// # Errors
    ///
    /// Returns error if the audio cannot be decoded or output, or
    /// [`crate::Error::SinkBusy`] if another clip is still playing
    async fn play(&self, audio: &[u8]) -> Result<()>;

    /// Hold output without discarding the current clip
    fn pause(&self);

    /// Continue the current clip
    fn resume(&self);

    /// Stop and discard the current clip, returning the sink to idle and
    /// clearing any pause
    fn stop(&self);

    /// Whether a clip is loaded and not paused
    fn is_playing(&self) -> bool;

    /// Whether the current clip is paused
    fn is_paused(&self) -> bool;
}

/// Outcome counts of one playback run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Chunks played to completion
    pub played: usize,
    /// Chunks skipped because synthesis or output failed
    pub skipped: usize,
}

/// Play results in the order they arrive until the stream closes.
///
/// Failed synthesis results and clips the sink rejects are skipped; the sink
/// is reset after a rejected clip so the next one starts clean. A pause in
/// effect before the reset is kept.
pub async fn play_in_order(
    sink: &dyn AudioSink,
    mut results: mpsc::Receiver<SynthesisResult>,
) -> PlaybackReport {
    let mut report = PlaybackReport::default();

    while let Some(result) = results.recv().await {
        let audio = match result.audio {
            Ok(audio) if !audio.is_empty() => audio,
            Ok(_) => {
                tracing::debug!(index = result.index, "empty audio, skipping chunk");
                report.skipped += 1;
                continue;
            }
            Err(_) => {
                report.skipped += 1;
                continue;
            }
        };

        tracing::debug!(index = result.index, bytes = audio.len(), "playing chunk");
        match sink.play(&audio).await {
            Ok(()) => report.played += 1,
            Err(e) => {
                tracing::warn!(index = result.index, error = %e, "sink rejected chunk, skipping");
                let paused = sink.is_paused();
                sink.stop();
                if paused {
                    sink.pause();
                }
                report.skipped += 1;
            }
        }
    }

    report
}
