//! Read-aloud pipeline controller
//!
//! A [`Reader`] is a single task that owns the article queue, the pipeline
//! state and the active backend. Callers talk to it through a cloneable
//! [`ReaderHandle`]: commands go in over a channel, and state, progress and
//! notices come back out over latest-wins `watch` channels.
//!
//! Each article runs as its own task (chunk, fetch, play). Stopping cancels
//! that task, resets the sink and drops the queue; events still in flight
//! from a cancelled run carry a stale run id and are ignored.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::tts::backend::{Backend, BackendKind, VoiceParams, clamp_rate};
use crate::tts::chunking::{DEFAULT_LIMIT, chunk_text};
use crate::tts::fetch::{DEFAULT_CONCURRENCY, FetchStage};
use crate::tts::playback::{AudioSink, play_in_order};
use crate::{Error, Result};

/// Observable pipeline state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing is being read
    #[default]
    Idle,
    /// An article is being read (possibly with more queued)
    Speaking,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Tunables for a reader session
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Soft chunk length bound in characters
    pub chunk_limit: usize,
    /// Maximum concurrent synthesis calls
    pub fetch_concurrency: usize,
    /// Initial speech rate multiplier
    pub rate: f32,
    /// Voice override passed to the backend
    pub voice: Option<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_limit: DEFAULT_LIMIT,
            fetch_concurrency: DEFAULT_CONCURRENCY,
            rate: 1.0,
            voice: None,
        }
    }
}

impl ReaderOptions {
    /// Options from resolved configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let voice = match config.backend_kind() {
            BackendKind::System => config.system.voice.clone(),
            BackendKind::Local | BackendKind::Cloud => None,
        };

        Self {
            chunk_limit: config.chunk_limit,
            fetch_concurrency: config.fetch_concurrency,
            rate: config.speech_rate,
            voice,
        }
    }
}

enum Command {
    Submit(String),
    Stop,
    SetRate(f32),
    PauseOrResume,
    SetBackend(Backend),
    Languages(oneshot::Sender<Result<Vec<String>>>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// A chunk was handed to the engine
#[derive(Debug, Clone, Copy)]
struct Dispatched {
    run: u64,
    index: usize,
    total: usize,
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Handle to a running [`Reader`]
#[derive(Clone)]
pub struct ReaderHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PipelineState>,
    progress: watch::Receiver<String>,
    notice: watch::Receiver<Option<String>>,
    sink: Arc<dyn AudioSink>,
}

impl ReaderHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Queue an article for reading; returns without waiting for speech
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has shut down
    pub fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Submit(text.into()))
    }

    /// Cancel the current article, drop the queue and return to idle
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has shut down
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Change the speech rate for chunks dispatched from now on
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has shut down
    pub fn set_rate(&self, rate: f32) -> Result<()> {
        self.send(Command::SetRate(rate))
    }

    /// Toggle pause on engine backends; no-op for system speech
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has shut down
    pub fn pause_or_resume(&self) -> Result<()> {
        self.send(Command::PauseOrResume)
    }

    /// Switch backend, effective from the next article
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has shut down
    pub fn set_backend(&self, backend: Backend) -> Result<()> {
        self.send(Command::SetBackend(backend))
    }

    /// Languages offered by the active backend
    ///
    /// Engine backends do not enumerate languages and return an empty list.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be queried or the reader has shut down
    pub async fn available_languages(&self) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Languages(tx))?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Wait until every command sent before this call has been applied
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has shut down
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx))?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Stop reading and end the controller task
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the reader has already shut down
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// State observable
    #[must_use]
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Progress observable (`"3/7"`, `"3/7 (2)"` with queued articles, or empty)
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<String> {
        self.progress.clone()
    }

    /// Last user-visible notice, such as an unavailable backend
    #[must_use]
    pub fn notice(&self) -> watch::Receiver<Option<String>> {
        self.notice.clone()
    }

    /// Whether an article is being read
    #[must_use]
    pub fn is_reading(&self) -> bool {
        *self.state.borrow() == PipelineState::Speaking
    }

    /// Whether the sink is producing sound right now
    #[must_use]
    pub fn is_voice_playing(&self) -> bool {
        self.sink.is_playing()
    }
}

/// The pipeline controller task
pub struct Reader {
    backend: Backend,
    pending_backend: Option<Backend>,
    sink: Arc<dyn AudioSink>,
    chunk_limit: usize,
    fetch_concurrency: usize,
    params: watch::Sender<VoiceParams>,
    queue: VecDeque<String>,
    active: Option<ActiveRun>,
    last_dispatch: Option<(usize, usize)>,
    next_run: u64,
    state: watch::Sender<PipelineState>,
    progress: watch::Sender<String>,
    notice: watch::Sender<Option<String>>,
    events: mpsc::UnboundedSender<Dispatched>,
}

impl Reader {
    /// Start a controller on the current runtime
    #[must_use]
    pub fn spawn(backend: Backend, sink: Arc<dyn AudioSink>, options: ReaderOptions) -> ReaderHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let (progress_tx, progress_rx) = watch::channel(String::new());
        let (notice_tx, notice_rx) = watch::channel(None);
        let (params, _) = watch::channel(VoiceParams {
            voice: options.voice,
            rate: clamp_rate(options.rate),
        });

        tracing::debug!(
            backend = backend.name(),
            chunk_limit = options.chunk_limit,
            concurrency = options.fetch_concurrency,
            "reader started"
        );

        let reader = Self {
            backend,
            pending_backend: None,
            sink: Arc::clone(&sink),
            chunk_limit: options.chunk_limit,
            fetch_concurrency: options.fetch_concurrency.max(1),
            params,
            queue: VecDeque::new(),
            active: None,
            last_dispatch: None,
            next_run: 0,
            state: state_tx,
            progress: progress_tx,
            notice: notice_tx,
            events: events_tx,
        };
        tokio::spawn(reader.run(commands_rx, events_rx));

        ReaderHandle {
            commands: commands_tx,
            state: state_rx,
            progress: progress_rx,
            notice: notice_rx,
            sink,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Dispatched>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.stop();
                        break;
                    }
                    Some(command) => self.handle(command),
                },

                Some(event) = events.recv() => self.on_dispatch(event),

                finished = run_finished(&mut self.active) => self.on_finished(finished),
            }
        }

        tracing::debug!("reader shut down");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(text) => {
                self.queue.push_back(text);
                if self.active.is_none() {
                    self.start_next();
                } else {
                    self.publish_progress();
                }
            }
            Command::Stop => self.stop(),
            Command::SetRate(rate) => {
                if self.backend.supports_rate() {
                    let rate = clamp_rate(rate);
                    self.params.send_modify(|p| p.rate = rate);
                    tracing::debug!(rate, "speech rate changed");
                } else {
                    tracing::debug!(backend = self.backend.name(), "backend ignores rate changes");
                }
            }
            Command::PauseOrResume => {
                if self.backend.is_system() || self.active.is_none() {
                    return;
                }
                if self.sink.is_paused() {
                    self.sink.resume();
                } else {
                    self.sink.pause();
                }
            }
            Command::SetBackend(backend) => {
                tracing::info!(backend = backend.name(), "backend selected");
                if self.active.is_some() {
                    self.pending_backend = Some(backend);
                } else {
                    self.backend = backend;
                }
            }
            Command::Languages(reply) => match &self.backend {
                Backend::System(speech) => {
                    let speech = Arc::clone(speech);
                    tokio::spawn(async move {
                        let _ = reply.send(speech.available_languages().await);
                    });
                }
                Backend::Engine(_) => {
                    let _ = reply.send(Ok(Vec::new()));
                }
            },
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn on_dispatch(&mut self, event: Dispatched) {
        if self.active.as_ref().is_none_or(|run| run.id != event.run) {
            return;
        }
        self.last_dispatch = Some((event.index, event.total));
        self.publish_progress();
    }

    fn on_finished(&mut self, run: u64) {
        tracing::debug!(run, queued = self.queue.len(), "article drained");
        self.active = None;
        self.start_next();
    }

    /// Start the next runnable article, or go idle when none is left
    fn start_next(&mut self) {
        while let Some(text) = self.queue.pop_front() {
            if let Some(backend) = self.pending_backend.take() {
                self.backend = backend;
            }

            if let Err(e) = self.backend.check() {
                tracing::warn!(backend = self.backend.name(), error = %e, "skipping article");
                let message = e.to_string();
                self.notice.send_if_modified(|n| {
                    if n.as_deref() == Some(message.as_str()) {
                        return false;
                    }
                    *n = Some(message);
                    true
                });
                continue;
            }

            self.launch(text);
            return;
        }

        self.sink.resume();
        self.publish_state(PipelineState::Idle);
    }

    fn launch(&mut self, text: String) {
        let id = self.next_run;
        self.next_run += 1;
        let cancel = CancellationToken::new();

        self.last_dispatch = None;
        self.notice.send_if_modified(|n| n.take().is_some());
        self.publish_state(PipelineState::Speaking);
        self.publish_progress();

        tracing::debug!(run = id, backend = self.backend.name(), chars = text.len(), "article started");

        let task = match &self.backend {
            Backend::System(speech) => {
                let speech = Arc::clone(speech);
                let params = self.params.borrow().clone();
                tokio::spawn(async move {
                    if text.trim().is_empty() {
                        return;
                    }
                    if let Err(e) = speech.speak(&text, &params).await {
                        tracing::warn!(run = id, error = %e, "system speech failed");
                    }
                })
            }
            Backend::Engine(engine) => {
                let stage = FetchStage::new(Arc::clone(engine), self.fetch_concurrency);
                let sink = Arc::clone(&self.sink);
                let params = self.params.subscribe();
                let events = self.events.clone();
                let limit = self.chunk_limit;
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let chunks = chunk_text(&text, limit);
                    let results = stage.spawn(chunks, params, cancel, move |index, total| {
                        let _ = events.send(Dispatched { run: id, index, total });
                    });
                    let report = play_in_order(sink.as_ref(), results).await;
                    tracing::debug!(run = id, played = report.played, skipped = report.skipped, "playback finished");
                })
            }
        };

        self.active = Some(ActiveRun { id, cancel, task });
    }

    fn stop(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();

        if let Some(run) = self.active.take() {
            run.cancel.cancel();
            run.task.abort();
            tracing::info!(run = run.id, dropped, "reading stopped");
        }

        self.sink.stop();
        self.last_dispatch = None;
        self.progress.send_if_modified(|p| {
            let changed = !p.is_empty();
            p.clear();
            changed
        });
        self.publish_state(PipelineState::Idle);
    }

    fn publish_state(&self, state: PipelineState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    fn publish_progress(&self) {
        let text = render_progress(self.last_dispatch, self.queue.len());
        self.progress.send_if_modified(|current| {
            let changed = *current != text;
            if changed {
                current.clone_from(&text);
            }
            changed
        });
    }
}

/// Resolve when the active run's task ends; pending forever while idle
async fn run_finished(active: &mut Option<ActiveRun>) -> u64 {
    match active {
        Some(run) => {
            if let Err(e) = (&mut run.task).await {
                if e.is_panic() {
                    tracing::error!(run = run.id, "article task panicked");
                }
            }
            run.id
        }
        None => std::future::pending().await,
    }
}

fn render_progress(dispatch: Option<(usize, usize)>, queued: usize) -> String {
    match (dispatch, queued) {
        (Some((index, total)), 0) => format!("{}/{total}", index + 1),
        (Some((index, total)), queued) => format!("{}/{total} ({queued})", index + 1),
        (None, 0) => String::new(),
        (None, queued) => format!("({queued})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_text() {
        assert_eq!(render_progress(Some((0, 3)), 0), "1/3");
        assert_eq!(render_progress(Some((2, 3)), 2), "3/3 (2)");
        assert_eq!(render_progress(None, 1), "(1)");
        assert_eq!(render_progress(None, 0), "");
    }

    #[test]
    fn idle_controller_never_reports_a_finished_run() {
        let mut active = None;
        let mut finished = tokio_test::task::spawn(run_finished(&mut active));
        tokio_test::assert_pending!(finished.poll());
    }

    #[test]
    fn state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "idle");
        assert_eq!(PipelineState::Speaking.to_string(), "speaking");
    }

    #[test]
    fn options_follow_config() {
        let mut config = Config::default();
        config.chunk_limit = 240;
        config.fetch_concurrency = 5;
        config.system.voice = Some("en-gb".to_string());

        let options = ReaderOptions::from_config(&config);
        assert_eq!(options.chunk_limit, 240);
        assert_eq!(options.fetch_concurrency, 5);
        assert_eq!(options.voice.as_deref(), Some("en-gb"));

        config.backend = BackendKind::Local;
        assert!(ReaderOptions::from_config(&config).voice.is_none());
    }
}
