//! Audio output to the default speaker

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::control::{POLL_INTERVAL, PlaybackControl};
use super::decode::{decode_audio, resample};
use crate::tts::AudioSink;
use crate::{Error, Result};

/// Preferred output rate (matches common TTS output)
const PREFERRED_SAMPLE_RATE: u32 = 24000;

/// No progress for this long while unpaused means the device is gone
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Plays synthesized clips on the default output device
#[derive(Debug, Clone)]
pub struct Speaker {
    config: StreamConfig,
    control: Arc<PlaybackControl>,
}

impl Speaker {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device or usable config is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports_preferred = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PREFERRED_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PREFERRED_SAMPLE_RATE)
            })
        };

        let config = match supports_preferred(1).or_else(|| supports_preferred(2)) {
            Some(supported) => supported
                .with_sample_rate(SampleRate(PREFERRED_SAMPLE_RATE))
                .config(),
            None => device
                .default_output_config()
                .map_err(|e| Error::Audio(format!("no suitable output config: {e}")))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "speaker initialized"
        );

        Ok(Self {
            config,
            control: Arc::new(PlaybackControl::default()),
        })
    }

    /// Output sample rate of the device
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

#[async_trait]
impl AudioSink for Speaker {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        let guard = self.control.acquire().await?;
        let audio = audio.to_vec();
        let config = self.config.clone();
        let control = Arc::clone(&self.control);
        let mut interrupt = self.control.interrupt_on_drop();

        let played = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let decoded = decode_audio(&audio)?;
            if control.is_interrupted() {
                return Ok(());
            }
            let samples = resample(&decoded.samples, decoded.sample_rate, config.sample_rate.0)?;
            play_blocking(&config, &control, samples)
        })
        .await;

        interrupt.disarm();
        played.map_err(|e| Error::Audio(format!("playback thread failed: {e}")))?
    }

    fn pause(&self) {
        self.control.pause();
    }

    fn resume(&self) {
        self.control.resume();
    }

    fn stop(&self) {
        self.control.stop();
    }

    fn is_playing(&self) -> bool {
        self.control.is_playing()
    }

    fn is_paused(&self) -> bool {
        self.control.is_paused()
    }
}

/// Play mono samples on the current thread until done, stopped or stalled
fn play_blocking(
    config: &StreamConfig,
    control: &Arc<PlaybackControl>,
    samples: Vec<f32>,
) -> Result<()> {
    if samples.is_empty() || control.is_interrupted() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let total = samples.len();
    let position = Arc::new(AtomicUsize::new(0));

    let stream = {
        let position = Arc::clone(&position);
        let control = Arc::clone(control);
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if control.is_paused() {
                        data.fill(0.0);
                        return;
                    }

                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio output error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let mut last_position = 0;
    let mut last_progress = Instant::now();

    loop {
        std::thread::sleep(POLL_INTERVAL);

        if control.is_interrupted() {
            tracing::debug!("playback interrupted");
            break;
        }

        let pos = position.load(Ordering::Relaxed);
        if pos >= total {
            // Let the device flush its last buffer
            std::thread::sleep(Duration::from_millis(100));
            tracing::debug!(samples = total, "playback complete");
            break;
        }

        if pos != last_position || control.is_paused() {
            last_position = pos;
            last_progress = Instant::now();
        } else if last_progress.elapsed() > STALL_TIMEOUT {
            return Err(Error::Audio("output device stalled".to_string()));
        }
    }

    drop(stream);
    Ok(())
}
