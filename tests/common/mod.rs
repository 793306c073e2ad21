//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_reader::{
    AudioSink, Backend, Error, PipelineState, ReaderHandle, Result, SynthesisBackend, SystemSpeech,
    VoiceParams,
};

/// Upper bound for any wait in a test (virtual time under `start_paused`)
pub const WAIT: Duration = Duration::from_secs(60);

/// Latency encoded in the text as `slow:<ms>`, or `default`
fn scripted_delay(text: &str, default: u64) -> Duration {
    let ms = text
        .split_whitespace()
        .find_map(|w| w.strip_prefix("slow:"))
        .and_then(|ms| ms.trim_end_matches('.').parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}

/// Decrements a counter when dropped, including on abort
struct Tracked<'a>(&'a AtomicUsize);

impl<'a> Tracked<'a> {
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(counter), now)
    }
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Synthesis engine driven by the chunk text.
///
/// `slow:<ms>` sets the latency (default 10ms), `fail` makes the call
/// fail. The audio returned is the chunk text itself.
#[derive(Default)]
pub struct ScriptedBackend {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
    pub rates: Mutex<Vec<f32>>,
    pub unavailable: AtomicBool,
    pub ignores_rate: bool,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn without_rate() -> Arc<Self> {
        Arc::new(Self {
            ignores_rate: true,
            ..Self::default()
        })
    }

    pub fn unavailable() -> Arc<Self> {
        let backend = Self::default();
        backend.unavailable.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn backend(self: &Arc<Self>) -> Backend {
        Backend::Engine(Arc::clone(self) as Arc<dyn SynthesisBackend>)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_guard, now) = Tracked::enter(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.rates.lock().unwrap().push(params.rate);

        tokio::time::sleep(scripted_delay(text, 10)).await;

        if text.contains("fail") {
            return Err(Error::Tts("scripted failure".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }

    fn supports_rate(&self) -> bool {
        !self.ignores_rate
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("scripted engine offline".to_string()));
        }
        Ok(())
    }
}

/// Audio sink that "plays" each clip for a fixed time and records it.
///
/// Clips whose text starts with `bad` are rejected as undecodable.
pub struct RecordingSink {
    play_time: Duration,
    pub played: Mutex<Vec<String>>,
    pub started: AtomicUsize,
    pub interrupted: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub busy_violations: AtomicUsize,
    active: AtomicBool,
    paused: AtomicBool,
    generation: AtomicUsize,
}

impl RecordingSink {
    pub fn new(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            play_time,
            played: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            busy_violations: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            generation: AtomicUsize::new(0),
        })
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn is_paused_now(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn as_sink(self: &Arc<Self>) -> Arc<dyn AudioSink> {
        Arc::clone(self) as Arc<dyn AudioSink>
    }
}

struct ActiveFlag<'a>(&'a AtomicBool);

impl Drop for ActiveFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, audio: &[u8]) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            self.busy_violations.fetch_add(1, Ordering::SeqCst);
            return Err(Error::SinkBusy);
        }
        let _active = ActiveFlag(&self.active);

        let text = String::from_utf8_lossy(audio).into_owned();
        if text.starts_with("bad") {
            return Err(Error::Audio("undecodable clip".to_string()));
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        let tick = Duration::from_millis(10);
        let mut remaining = self.play_time;

        while !remaining.is_zero() {
            tokio::time::sleep(tick).await;
            if self.generation.load(Ordering::SeqCst) != generation {
                self.interrupted.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            if !self.paused.load(Ordering::SeqCst) {
                remaining = remaining.saturating_sub(tick);
            }
        }

        self.played.lock().unwrap().push(text);
        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// System speech stand-in; `slow:<ms>` sets how long an article takes
#[derive(Default)]
pub struct ScriptedSpeech {
    pub spoken: Mutex<Vec<String>>,
    pub speaking: AtomicUsize,
    pub unavailable: AtomicBool,
}

impl ScriptedSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn backend(self: &Arc<Self>) -> Backend {
        Backend::System(Arc::clone(self) as Arc<dyn SystemSpeech>)
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SystemSpeech for ScriptedSpeech {
    fn name(&self) -> &str {
        "scripted-speech"
    }

    async fn speak(&self, text: &str, _params: &VoiceParams) -> Result<()> {
        let (_guard, _) = Tracked::enter(&self.speaking);
        tokio::time::sleep(scripted_delay(text, 200)).await;
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn available_languages(&self) -> Result<Vec<String>> {
        Ok(vec!["en".to_string(), "fr".to_string()])
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("speech engine missing".to_string()));
        }
        Ok(())
    }
}

/// Wait until the reader reports `state`
pub async fn wait_for_state(handle: &ReaderHandle, state: PipelineState) {
    let mut rx = handle.state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("reader closed");
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
