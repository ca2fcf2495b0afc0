//! Frame-scheduled playback driver.
//!
//! A worker thread emits a tick per frame interval until cancelled. The host
//! feeds each tick's instant to `ViewportController::tick`; the controller's
//! clock decides how many slices that is.

use crossbeam_channel::{bounded, Receiver, TryRecvError, TrySendError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackTick(pub Instant);

pub struct PlaybackLoop {
    cancel: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    ticks: Receiver<PlaybackTick>,
}

impl PlaybackLoop {
    pub fn start(frame_interval: Duration) -> Self {
        let frame_interval = frame_interval.max(Duration::from_millis(1));
        let cancel = Arc::new(AtomicBool::new(false));
        // Small buffer: a stalled host sees the latest instants, not a backlog.
        let (tx, ticks) = bounded::<PlaybackTick>(2);
        let cancel_worker = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            debug!(
                target: "waterfall::playback",
                interval_ms = frame_interval.as_millis() as u64,
                "playback loop started"
            );
            while !cancel_worker.load(Ordering::Acquire) {
                thread::sleep(frame_interval);
                if cancel_worker.load(Ordering::Acquire) {
                    break;
                }
                match tx.try_send(PlaybackTick(Instant::now())) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            debug!(target: "waterfall::playback", "playback loop stopped");
        });
        Self {
            cancel,
            handle: Some(handle),
            ticks,
        }
    }

    pub fn ticks(&self) -> &Receiver<PlaybackTick> {
        &self.ticks
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Blocks for the next tick. `None` once the loop is stopped or after `timeout`.
    pub fn next_tick(&self, timeout: Duration) -> Option<PlaybackTick> {
        if !self.is_running() {
            return None;
        }
        self.ticks.recv_timeout(timeout).ok()
    }

    /// Cancels the loop and waits for the worker to exit. No tick is
    /// observable after this returns.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(target: "waterfall::playback", "playback loop worker panicked");
            }
        }
        loop {
            match self.ticks.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Drop for PlaybackLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
