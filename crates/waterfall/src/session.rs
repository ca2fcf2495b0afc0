//! Host for one waterfall visualization: wires the slice cache, the viewport
//! controller and the fetch pool for a single capture.

use crate::{
    ControlAction, ControlKey, FetchOutcome, FetchPool, PlaybackLoop, SliceCache, SliceChange,
    SliceIndex, SliceRange, SliceSource, ViewportController, WaterfallConfig, WaterfallError,
    WaterfallSlice,
};
use crossbeam_channel::{unbounded, Receiver};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStats {
    pub fetches_submitted: usize,
    pub fetches_failed: usize,
    pub slices_received: usize,
    pub slice_changes: usize,
}

pub struct WaterfallSession {
    id: SessionId,
    capture_id: String,
    config: WaterfallConfig,
    cache: SliceCache<WaterfallSlice>,
    controller: ViewportController,
    changes: Receiver<SliceChange>,
    last_change: Option<SliceChange>,
    pool: FetchPool,
    stats: SessionStats,
}

impl WaterfallSession {
    pub fn open(config: WaterfallConfig, source: Arc<dyn SliceSource>) -> Result<Self, WaterfallError> {
        config.validate()?;
        let capture_id = source.capture_id().to_string();
        let total = source.total_slices()?;
        if total == 0 {
            return Err(WaterfallError::EmptyCapture(capture_id));
        }

        let (tx_changes, changes) = unbounded::<SliceChange>();
        let controller = ViewportController::from_config(&config, move |change| {
            let _ = tx_changes.send(change);
        });
        let pool = FetchPool::start(source, config.fetch_workers);

        let mut session = Self {
            id: SessionId::new(),
            capture_id,
            config,
            cache: SliceCache::new(total),
            controller,
            changes,
            last_change: None,
            pool,
            stats: SessionStats::default(),
        };
        session.controller.set_total_slices(total);
        session.sync();

        info!(
            target: "waterfall::session",
            session = %session.id.0,
            capture = %session.capture_id,
            total,
            window = session.config.window_size,
            "waterfall session opened"
        );
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn capture_id(&self) -> &str {
        &self.capture_id
    }

    pub fn config(&self) -> &WaterfallConfig {
        &self.config
    }

    pub fn cache(&self) -> &SliceCache<WaterfallSlice> {
        &self.cache
    }

    pub fn controller(&self) -> &ViewportController {
        &self.controller
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn last_change(&self) -> Option<SliceChange> {
        self.last_change
    }

    pub fn visible_range(&self) -> SliceRange {
        self.controller.visible_range()
    }

    /// Rows of the visible window; `None` rows render as placeholders.
    pub fn visible_rows(&self) -> Vec<Option<&WaterfallSlice>> {
        let visible = self.visible_range();
        self.cache.range_slices(visible.start, visible.end)
    }

    pub fn current_slice(&self) -> Option<&WaterfallSlice> {
        self.cache.get(self.controller.current_index())
    }

    pub fn is_window_loaded(&self) -> bool {
        let visible = self.visible_range();
        self.cache.is_range_loaded(visible.start, visible.end)
    }

    pub fn handle(&mut self, action: ControlAction) -> bool {
        let changed = self.controller.apply(action);
        self.sync();
        changed
    }

    pub fn handle_key(&mut self, key: ControlKey) -> bool {
        self.handle(key.action())
    }

    pub fn submit_index_input(&mut self, text: &str) -> Result<bool, WaterfallError> {
        let result = self.controller.submit_index_input(text);
        self.sync();
        result
    }

    pub fn set_hovered_index(&mut self, index: Option<SliceIndex>) {
        self.controller.set_hovered_index(index);
    }

    /// Feeds a playback frame to the controller.
    pub fn tick(&mut self, now: Instant) -> usize {
        let advanced = self.controller.tick(now);
        if advanced > 0 || !self.changes.is_empty() {
            self.sync();
        }
        advanced
    }

    /// Applies a slice total learned after the session opened.
    pub fn update_total_slices(&mut self, total: usize) -> bool {
        if total == self.cache.total_slices() {
            return false;
        }
        info!(
            target: "waterfall::session",
            capture = %self.capture_id,
            from = self.cache.total_slices(),
            to = total,
            "capture total updated"
        );
        self.cache.set_total_slices(total);
        self.controller.set_total_slices(total);
        self.sync();
        true
    }

    /// Re-requests whatever is missing around the viewport, e.g. after a
    /// failed fetch.
    pub fn refresh(&mut self) {
        self.request_missing();
    }

    /// Applies finished fetches without blocking. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let outcomes = self.pool.drain();
        let applied = outcomes.len();
        for outcome in outcomes {
            self.apply_outcome(outcome);
        }
        if applied > 0 {
            self.update_loading_flag();
        }
        applied
    }

    /// Pumps until the visible window is loaded. Returns false on timeout or
    /// when nothing for the window is in flight any more.
    pub fn wait_for_window(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.is_window_loaded() {
                return true;
            }
            if !self.visible_pending() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if let Some(outcome) = self.pool.recv_timeout(remaining) {
                self.apply_outcome(outcome);
                self.update_loading_flag();
            }
        }
    }

    /// Runs playback from the current slice on a frame loop until the end of
    /// the capture, `limit`, or `cancel`. `on_frame` runs after every tick.
    pub fn play<F>(&mut self, limit: Option<Duration>, cancel: &AtomicBool, mut on_frame: F) -> usize
    where
        F: FnMut(&WaterfallSession),
    {
        if !self.controller.is_playing() && !self.handle(ControlAction::StartPlayback) {
            return 0;
        }
        let started = Instant::now();
        let mut frames = PlaybackLoop::start(self.config.frame_interval());
        let mut advanced = 0usize;

        while self.controller.is_playing() {
            if cancel.load(Ordering::Acquire) || limit.is_some_and(|l| started.elapsed() >= l) {
                self.handle(ControlAction::StopPlayback);
                break;
            }
            let Some(tick) = frames.next_tick(Duration::from_millis(250)) else {
                continue;
            };
            advanced += self.tick(tick.0);
            self.pump();
            on_frame(self);
        }
        frames.stop();
        debug!(
            target: "waterfall::session",
            advanced,
            index = self.controller.current_index(),
            "playback run finished"
        );
        advanced
    }

    /// Stops playback, drops cached slices and joins the fetch workers.
    pub fn close(mut self) -> SessionStats {
        self.teardown();
        self.stats.clone()
    }

    fn teardown(&mut self) {
        self.controller.stop_playback();
        self.cache.clear();
        self.pool.shutdown();
        while self.changes.try_recv().is_ok() {}
    }

    fn sync(&mut self) {
        while let Ok(change) = self.changes.try_recv() {
            self.stats.slice_changes += 1;
            self.last_change = Some(change);
        }
        self.request_missing();
    }

    fn request_missing(&mut self) {
        let visible = self.visible_range();
        let window = self.config.window_size;
        let ahead = SliceRange::with_len(visible.end, window * self.config.prefetch_windows)
            .clamp_to(self.cache.total_slices());

        for wanted in [visible, ahead] {
            for missing in self.cache.missing_ranges(wanted.start, wanted.end) {
                for gap in self.outside_loading(missing) {
                    for chunk in chunks(gap, window) {
                        self.submit(chunk);
                    }
                }
            }
        }
        self.update_loading_flag();
    }

    fn submit(&mut self, range: SliceRange) {
        if self.cache.is_range_loading(range.start, range.end) {
            return;
        }
        if self.pool.submit(range).is_none() {
            warn!(target: "waterfall::session", %range, "fetch pool closed, request dropped");
            return;
        }
        self.cache.mark_range_loading(range.start, range.end);
        self.stats.fetches_submitted += 1;
        debug!(target: "waterfall::session", %range, "fetch submitted");
    }

    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        let range = outcome.range;
        match outcome.result {
            Ok(slices) => {
                let received = slices.len();
                if received < range.len() {
                    debug!(
                        target: "waterfall::session",
                        %range,
                        received,
                        "short fetch, remainder stays missing"
                    );
                }
                self.stats.slices_received += received;
                self.cache.add_loaded(range.start, slices);
            }
            Err(err) => {
                self.stats.fetches_failed += 1;
                warn!(
                    target: "waterfall::session",
                    capture = %self.capture_id,
                    %range,
                    error = %err,
                    "slice fetch failed, range left missing"
                );
            }
        }
        self.cache.mark_range_loaded(range.start, range.end);
    }

    /// Parts of `range` not covered by any in-flight fetch.
    fn outside_loading(&self, range: SliceRange) -> Vec<SliceRange> {
        let mut gaps = vec![range];
        for loading in self.cache.loading_ranges() {
            gaps = gaps
                .into_iter()
                .flat_map(|gap| subtract(gap, loading))
                .collect();
        }
        gaps
    }

    fn visible_pending(&self) -> bool {
        let visible = self.visible_range();
        self.cache
            .loading_ranges()
            .iter()
            .any(|r| r.start < visible.end && visible.start < r.end)
    }

    fn update_loading_flag(&mut self) {
        let pending = !self.is_window_loaded() && self.visible_pending();
        self.controller.set_loading(pending);
    }
}

impl Drop for WaterfallSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn subtract(range: SliceRange, cut: SliceRange) -> Vec<SliceRange> {
    if cut.end <= range.start || range.end <= cut.start {
        return vec![range];
    }
    [
        SliceRange::new(range.start, cut.start.max(range.start)),
        SliceRange::new(cut.end.min(range.end), range.end),
    ]
    .into_iter()
    .filter(|r| !r.is_empty())
    .collect()
}

fn chunks(range: SliceRange, size: usize) -> impl Iterator<Item = SliceRange> {
    let size = size.max(1);
    (range.start..range.end)
        .step_by(size)
        .map(move |start| SliceRange::new(start, (start + size).min(range.end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_cases() {
        let r = SliceRange::new(10, 20);
        assert_eq!(subtract(r, SliceRange::new(0, 5)), vec![r]);
        assert_eq!(
            subtract(r, SliceRange::new(12, 15)),
            vec![SliceRange::new(10, 12), SliceRange::new(15, 20)]
        );
        assert_eq!(subtract(r, SliceRange::new(5, 15)), vec![SliceRange::new(15, 20)]);
        assert!(subtract(r, SliceRange::new(0, 30)).is_empty());
    }

    #[test]
    fn test_chunks_split_by_window() {
        let parts: Vec<_> = chunks(SliceRange::new(3, 14), 5).collect();
        assert_eq!(
            parts,
            vec![SliceRange::new(3, 8), SliceRange::new(8, 13), SliceRange::new(13, 14)]
        );
        assert_eq!(chunks(SliceRange::new(4, 4), 5).count(), 0);
    }
}
