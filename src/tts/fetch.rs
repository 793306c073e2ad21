//! Bounded-concurrency synthesis with in-order delivery
//!
//! Chunks are dispatched to the engine as admission permits become free, up
//! to `concurrency` calls at once. Finished calls land in a reordering buffer
//! and are released strictly by chunk index, so a slow early chunk holds back
//! later ones that are already done. A chunk keeps its permit until it has
//! been released downstream, which bounds the buffered audio to the same
//! window.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::backend::{SynthesisBackend, VoiceParams};
use super::chunking::Chunk;
use crate::{Error, Result};

/// Default number of synthesis calls in flight
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Synthesized audio for one chunk, or the reason there is none
#[derive(Debug)]
pub struct SynthesisResult {
    /// Index of the chunk this result belongs to
    pub index: usize,
    /// Encoded audio bytes
    pub audio: Result<Vec<u8>>,
}

/// Releases items strictly in index order
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> ReorderBuffer<T> {
    /// Store the item for `index`
    pub fn insert(&mut self, index: usize, item: T) {
        if index < self.next {
            tracing::warn!(index, "dropping result for an index already released");
            return;
        }
        self.pending.insert(index, item);
    }

    /// Take the next item if everything before it has been released
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        let item = self.pending.remove(&self.next)?;
        let index = self.next;
        self.next += 1;
        Some((index, item))
    }

    /// Number of items waiting on an earlier index
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Drives chunks through a synthesis engine
#[derive(Clone)]
pub struct FetchStage {
    backend: Arc<dyn SynthesisBackend>,
    concurrency: usize,
}

impl FetchStage {
    /// Create a fetch stage allowing `concurrency` calls in flight (at least one)
    #[must_use]
    pub fn new(backend: Arc<dyn SynthesisBackend>, concurrency: usize) -> Self {
        Self {
            backend,
            concurrency: concurrency.max(1),
        }
    }

    /// Start fetching `chunks` on a background task.
    ///
    /// Returns the ordered result stream. `on_dispatch(index, total)` runs
    /// each time a chunk is handed to the engine. Voice parameters are read
    /// from `params` at dispatch time. Cancelling `cancel` aborts in-flight
    /// calls and discards anything buffered.
    pub fn spawn<F>(
        &self,
        chunks: Vec<Chunk>,
        params: watch::Receiver<VoiceParams>,
        cancel: CancellationToken,
        on_dispatch: F,
    ) -> mpsc::Receiver<SynthesisResult>
    where
        F: Fn(usize, usize) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let stage = self.clone();
        tokio::spawn(async move {
            stage.run(chunks, params, cancel, on_dispatch, tx).await;
        });
        rx
    }

    async fn run<F>(
        self,
        chunks: Vec<Chunk>,
        params: watch::Receiver<VoiceParams>,
        cancel: CancellationToken,
        on_dispatch: F,
        tx: mpsc::Sender<SynthesisResult>,
    ) where
        F: Fn(usize, usize) + Send + 'static,
    {
        let total = chunks.len();
        let gate = Arc::new(Semaphore::new(self.concurrency));
        let mut queued = chunks.into_iter();
        let mut next_chunk = queued.next();
        let mut in_flight = JoinSet::new();
        let mut reorder: ReorderBuffer<(Result<Vec<u8>>, OwnedSemaphorePermit)> =
            ReorderBuffer::default();

        'fetch: loop {
            if next_chunk.is_none() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!(in_flight = in_flight.len(), buffered = reorder.len(), "fetch cancelled");
                    break;
                }

                permit = Arc::clone(&gate).acquire_owned(), if next_chunk.is_some() => {
                    let Ok(permit) = permit else { break };
                    let Some(chunk) = next_chunk.take() else { continue };
                    next_chunk = queued.next();

                    on_dispatch(chunk.index, total);
                    tracing::debug!(index = chunk.index, total, "dispatching chunk for synthesis");

                    let backend = Arc::clone(&self.backend);
                    let voice = params.borrow().clone();
                    in_flight.spawn(async move {
                        let audio = AssertUnwindSafe(backend.synthesize(&chunk.text, &voice))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| Err(Error::Tts("synthesis panicked".to_string())));
                        (chunk.index, audio, permit)
                    });
                }

                Some(joined) = in_flight.join_next() => {
                    let (index, audio, permit) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            tracing::warn!(error = %e, "synthesis task aborted");
                            continue;
                        }
                    };

                    if let Err(e) = &audio {
                        tracing::warn!(index, error = %e, "chunk synthesis failed, skipping");
                    }
                    reorder.insert(index, (audio, permit));

                    while let Some((index, (audio, permit))) = reorder.pop_ready() {
                        let result = SynthesisResult { index, audio };
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break 'fetch,
                            sent = tx.send(result) => {
                                if sent.is_err() {
                                    tracing::debug!("playback went away, stopping fetch");
                                    break 'fetch;
                                }
                            }
                        }
                        drop(permit);
                    }
                }
            }
        }

        gate.close();
        in_flight.abort_all();
    }
}
