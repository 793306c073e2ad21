//! Playback bookkeeping shared between a speaker and its playback thread
//!
//! One clip owns the output at a time. `stop` marks the current clip as
//! interrupted; the playback thread notices on its next check and releases
//! the output, and a new clip waits for that instead of failing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{Error, Result};

/// How often a waiting clip checks whether the output was released
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
pub(crate) struct PlaybackControl {
    active: AtomicBool,
    paused: AtomicBool,
    interrupted: AtomicBool,
}

/// Releases the output when the playback thread exits
#[derive(Debug)]
pub(crate) struct ActiveGuard(Arc<PlaybackControl>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::SeqCst);
    }
}

/// Interrupts the playback thread if the `play` future is dropped early
#[derive(Debug)]
pub(crate) struct InterruptOnDrop {
    control: Arc<PlaybackControl>,
    armed: bool,
}

impl InterruptOnDrop {
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.control.interrupted.store(true, Ordering::SeqCst);
        }
    }
}

impl PlaybackControl {
    /// Take the output for a new clip.
    ///
    /// Waits while an interrupted clip drains, for as long as that takes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkBusy`] if another clip is playing and was not stopped
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<ActiveGuard> {
        loop {
            if !self.active.swap(true, Ordering::SeqCst) {
                self.interrupted.store(false, Ordering::SeqCst);
                return Ok(ActiveGuard(Arc::clone(self)));
            }

            // A stopped clip always releases the output
            if !self.interrupted.load(Ordering::SeqCst) {
                return Err(Error::SinkBusy);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub(crate) fn interrupt_on_drop(self: &Arc<Self>) -> InterruptOnDrop {
        InterruptOnDrop {
            control: Arc::clone(self),
            armed: true,
        }
    }

    // Pause persists across clips until resumed or stopped
    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub(crate) fn stop(&self) {
        if self.active.load(Ordering::SeqCst) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        self.paused.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.is_paused()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_clip_is_rejected_while_first_plays() {
        let control = Arc::new(PlaybackControl::default());

        let guard = control.acquire().await.unwrap();
        assert!(control.is_playing());
        assert!(matches!(control.acquire().await, Err(Error::SinkBusy)));

        drop(guard);
        assert!(!control.is_playing());
        assert!(control.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn new_clip_waits_for_stopped_clip_to_drain() {
        let control = Arc::new(PlaybackControl::default());
        let guard = control.acquire().await.unwrap();

        control.stop();
        assert!(control.is_interrupted());

        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.acquire().await.map(drop) })
        };

        // Slow device teardown
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once the output is released")
            .unwrap();
        assert!(acquired.is_ok());
        assert!(!control.is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_idle_does_not_interrupt_next_clip() {
        let control = Arc::new(PlaybackControl::default());

        control.stop();
        assert!(!control.is_interrupted());

        let _guard = control.acquire().await.unwrap();
        assert!(!control.is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_persists_across_clips_until_stop() {
        let control = Arc::new(PlaybackControl::default());
        control.pause();

        let guard = control.acquire().await.unwrap();
        assert!(control.is_paused());
        assert!(!control.is_playing());
        drop(guard);
        assert!(control.is_paused());

        control.resume();
        assert!(!control.is_paused());

        control.pause();
        control.stop();
        assert!(!control.is_paused());
    }

    #[test]
    fn dropped_play_interrupts_unless_disarmed() {
        let control = Arc::new(PlaybackControl::default());

        let mut finished = control.interrupt_on_drop();
        finished.disarm();
        drop(finished);
        assert!(!control.is_interrupted());

        drop(control.interrupt_on_drop());
        assert!(control.is_interrupted());
    }
}
