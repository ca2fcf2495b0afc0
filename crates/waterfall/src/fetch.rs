use crate::{SliceRange, SliceSource, SourceError, WaterfallSlice};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchId(pub Uuid);

impl FetchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FetchId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchRequest {
    pub id: FetchId,
    pub range: SliceRange,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub id: FetchId,
    pub range: SliceRange,
    pub elapsed: Duration,
    pub result: Result<Vec<WaterfallSlice>, SourceError>,
}

/// Worker threads running fetches against a shared source. Outcomes arrive
/// in completion order, not submission order.
pub struct FetchPool {
    tx_submit: Option<Sender<FetchRequest>>,
    rx_pending: Receiver<FetchRequest>,
    rx_outcomes: Receiver<FetchOutcome>,
    workers: Vec<thread::JoinHandle<()>>,
    in_flight: Arc<Mutex<usize>>,
}

impl FetchPool {
    pub fn start(source: Arc<dyn SliceSource>, num_workers: usize) -> Self {
        let (tx_submit, rx_submit) = unbounded::<FetchRequest>();
        let (tx_outcomes, rx_outcomes) = unbounded::<FetchOutcome>();
        let in_flight = Arc::new(Mutex::new(0usize));

        let workers = (0..num_workers.max(1))
            .map(|worker| {
                let rx = rx_submit.clone();
                let tx = tx_outcomes.clone();
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    // Exits once every submitter is gone and the queue is drained.
                    for request in rx.iter() {
                        let started = Instant::now();
                        let result = source.fetch(request.range);
                        let elapsed = started.elapsed();
                        match &result {
                            Ok(slices) => debug!(
                                target: "waterfall::fetch",
                                worker,
                                range = %request.range,
                                slices = slices.len(),
                                elapsed_ms = elapsed.as_millis() as u64,
                                "fetch completed"
                            ),
                            Err(err) => warn!(
                                target: "waterfall::fetch",
                                worker,
                                range = %request.range,
                                error = %err,
                                "fetch failed"
                            ),
                        }
                        let outcome = FetchOutcome {
                            id: request.id,
                            range: request.range,
                            elapsed,
                            result,
                        };
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        Self {
            tx_submit: Some(tx_submit),
            rx_pending: rx_submit,
            rx_outcomes,
            workers,
            in_flight,
        }
    }

    pub fn submit(&self, range: SliceRange) -> Option<FetchId> {
        let tx = self.tx_submit.as_ref()?;
        let id = FetchId::new();
        *self.in_flight.lock() += 1;
        if tx.send(FetchRequest { id, range }).is_err() {
            self.settle(1);
            return None;
        }
        Some(id)
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Finished fetches, without blocking.
    pub fn drain(&self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.rx_outcomes.try_recv() {
                Ok(outcome) => outcomes.push(outcome),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.settle(outcomes.len());
        outcomes
    }

    /// Blocks up to `timeout` for the next finished fetch.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchOutcome> {
        let outcome = self.rx_outcomes.recv_timeout(timeout).ok()?;
        self.settle(1);
        Some(outcome)
    }

    fn settle(&self, finished: usize) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(finished);
    }

    /// Closes the queue, drops requests no worker has picked up yet and waits
    /// for fetches already running.
    pub fn shutdown(&mut self) {
        if self.tx_submit.take().is_none() && self.workers.is_empty() {
            return;
        }
        let cancelled = self.rx_pending.try_iter().count();
        if cancelled > 0 {
            self.settle(cancelled);
            debug!(target: "waterfall::fetch", cancelled, "pending fetches cancelled");
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(target: "waterfall::fetch", "fetch worker panicked");
            }
        }
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyntheticSource;

    #[test]
    fn test_pool_runs_submitted_fetches() {
        let source = Arc::new(SyntheticSource::new("cap", 100, 8));
        let pool = FetchPool::start(source, 3);
        let ranges = [SliceRange::new(0, 10), SliceRange::new(10, 20), SliceRange::new(50, 55)];
        for r in ranges {
            assert!(pool.submit(r).is_some());
        }

        let mut seen = Vec::new();
        while seen.len() < ranges.len() {
            let outcome = pool.recv_timeout(Duration::from_secs(5)).expect("outcome");
            assert_eq!(outcome.result.as_ref().unwrap().len(), outcome.range.len());
            seen.push(outcome.range);
        }
        seen.sort();
        assert_eq!(seen, ranges.to_vec());
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_failed_fetch_is_reported() {
        let source = Arc::new(SyntheticSource::new("cap", 10, 8));
        let pool = FetchPool::start(source, 1);
        pool.submit(SliceRange::new(40, 50));
        let outcome = pool.recv_timeout(Duration::from_secs(5)).expect("outcome");
        assert!(matches!(outcome.result, Err(SourceError::OutOfRange { .. })));
    }

    #[test]
    fn test_shutdown_cancels_queued_fetches() {
        let source =
            Arc::new(SyntheticSource::new("cap", 100, 8).with_latency(Duration::from_millis(50)));
        let mut pool = FetchPool::start(source, 1);
        for start in (0..100).step_by(10) {
            pool.submit(SliceRange::new(start, start + 10));
        }
        thread::sleep(Duration::from_millis(10));

        let started = Instant::now();
        pool.shutdown();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(pool.drain().len() <= 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let source = Arc::new(SyntheticSource::new("cap", 10, 8));
        let mut pool = FetchPool::start(source, 2);
        pool.shutdown();
        assert!(pool.submit(SliceRange::new(0, 5)).is_none());
    }
}
