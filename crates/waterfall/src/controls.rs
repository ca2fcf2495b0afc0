//! Viewport and playback controls for the waterfall view.
//!
//! Owns the focused slice, the fixed-size sliding window over the slice index
//! space and the playback state. Every state-affecting transition ends with a
//! synchronous call to the injected `on_slice_change` closure; the host uses
//! it to ask the cache for missing data and re-render.

use crate::{PlaybackClock, SliceIndex, SliceRange, WaterfallConfig, WaterfallError};
use std::num::IntErrorKind;
use std::time::Instant;
use tracing::debug;

/// Position reported to the host after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceChange {
    pub current_index: SliceIndex,
    pub window_start: SliceIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
}

/// Bounds-derived state for enabling and disabling UI controls.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlFlags {
    pub can_increment: bool,
    pub can_decrement: bool,
    pub can_scroll_up: bool,
    pub can_scroll_down: bool,
    pub can_play: bool,
    pub is_playing: bool,
    pub loading: bool,
    pub slider_max: SliceIndex,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    Increment,
    Decrement,
    SetIndex(SliceIndex),
    First,
    Last,
    ScrollWindowUp,
    ScrollWindowDown,
    StartPlayback,
    StopPlayback,
    TogglePlayback,
    SetPlaybackSpeed(f64),
}

pub type SliceChangeCallback = Box<dyn FnMut(SliceChange) + Send>;

pub struct ViewportController {
    total_slices: usize,
    window_size: usize,
    current_index: SliceIndex,
    window_start: SliceIndex,
    state: PlaybackState,
    clock: PlaybackClock,
    min_speed: f64,
    max_speed: f64,
    loading: bool,
    hovered_index: Option<SliceIndex>,
    index_input: String,
    flags: ControlFlags,
    on_slice_change: SliceChangeCallback,
}

impl std::fmt::Debug for ViewportController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportController")
            .field("total_slices", &self.total_slices)
            .field("window_size", &self.window_size)
            .field("current_index", &self.current_index)
            .field("window_start", &self.window_start)
            .field("state", &self.state)
            .field("playback_speed", &self.clock.speed())
            .field("loading", &self.loading)
            .finish_non_exhaustive()
    }
}

impl ViewportController {
    pub fn new(window_size: usize, on_slice_change: impl FnMut(SliceChange) + Send + 'static) -> Self {
        let defaults = WaterfallConfig::default();
        let mut controller = Self {
            total_slices: 0,
            window_size: window_size.max(1),
            current_index: 0,
            window_start: 0,
            state: PlaybackState::Idle,
            clock: PlaybackClock::new(defaults.playback_speed),
            min_speed: defaults.min_playback_speed,
            max_speed: defaults.max_playback_speed,
            loading: false,
            hovered_index: None,
            index_input: "0".to_string(),
            flags: ControlFlags::default(),
            on_slice_change: Box::new(on_slice_change),
        };
        controller.refresh_flags();
        controller
    }

    pub fn from_config(
        config: &WaterfallConfig,
        on_slice_change: impl FnMut(SliceChange) + Send + 'static,
    ) -> Self {
        let mut controller = Self::new(config.window_size, on_slice_change);
        let (min_speed, max_speed) =
            speed_bounds(config.min_playback_speed, config.max_playback_speed);
        controller.min_speed = min_speed;
        controller.max_speed = max_speed;
        let speed = controller.clamp_speed(config.playback_speed);
        controller.clock = PlaybackClock::new(speed);
        controller
    }

    pub fn total_slices(&self) -> usize {
        self.total_slices
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn current_index(&self) -> SliceIndex {
        self.current_index
    }

    pub fn window_start(&self) -> SliceIndex {
        self.window_start
    }

    /// Visible slice indices, shorter than the window size only when the
    /// capture itself is.
    pub fn visible_range(&self) -> SliceRange {
        SliceRange::with_len(self.window_start, self.window_size).clamp_to(self.total_slices)
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn playback_speed(&self) -> f64 {
        self.clock.speed()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn hovered_index(&self) -> Option<SliceIndex> {
        self.hovered_index
    }

    /// Text currently shown in the direct index entry field.
    pub fn index_input(&self) -> &str {
        &self.index_input
    }

    pub fn flags(&self) -> ControlFlags {
        self.flags
    }

    pub fn can_increment(&self) -> bool {
        self.flags.can_increment
    }

    pub fn can_decrement(&self) -> bool {
        self.flags.can_decrement
    }

    pub fn can_scroll_up(&self) -> bool {
        self.flags.can_scroll_up
    }

    pub fn can_scroll_down(&self) -> bool {
        self.flags.can_scroll_down
    }

    fn last_index(&self) -> SliceIndex {
        self.total_slices.saturating_sub(1)
    }

    fn max_window_start(&self) -> SliceIndex {
        self.total_slices.saturating_sub(self.window_size)
    }

    pub fn set_total_slices(&mut self, total_slices: usize) -> bool {
        if total_slices == self.total_slices {
            return false;
        }
        self.total_slices = total_slices;
        self.current_index = self.current_index.min(self.last_index());
        self.window_start = self.window_start.min(self.max_window_start());
        self.ensure_window_visible();
        if self.is_playing() && self.current_index >= self.last_index() {
            self.halt_playback("capture shrank past playhead");
        }
        self.finish();
        true
    }

    pub fn set_current_index(&mut self, index: SliceIndex) -> bool {
        if self.total_slices == 0 {
            return false;
        }
        let index = index.min(self.last_index());
        if index == self.current_index {
            return false;
        }
        self.current_index = index;
        self.ensure_window_visible();
        self.finish();
        true
    }

    pub fn increment_index(&mut self) -> bool {
        if !self.can_increment() {
            return false;
        }
        self.set_current_index(self.current_index + 1)
    }

    pub fn decrement_index(&mut self) -> bool {
        if !self.can_decrement() {
            return false;
        }
        self.set_current_index(self.current_index - 1)
    }

    /// Moves the window one page towards the end of the capture.
    pub fn scroll_window_up(&mut self) -> bool {
        if self.loading {
            return false;
        }
        let target = (self.window_start + self.window_size).min(self.max_window_start());
        self.move_window(target)
    }

    /// Moves the window one page towards the start of the capture.
    pub fn scroll_window_down(&mut self) -> bool {
        if self.loading {
            return false;
        }
        let target = self.window_start.saturating_sub(self.window_size);
        self.move_window(target)
    }

    fn move_window(&mut self, window_start: SliceIndex) -> bool {
        if window_start == self.window_start {
            return false;
        }
        self.window_start = window_start;
        let visible = self.visible_range();
        if !visible.is_empty() {
            self.current_index = self.current_index.clamp(visible.start, visible.end - 1);
        }
        self.finish();
        true
    }

    /// Scrolls just enough to keep the focused slice inside the window.
    fn ensure_window_visible(&mut self) {
        if self.current_index < self.window_start {
            self.window_start = self.current_index;
        } else if self.current_index >= self.window_start + self.window_size {
            self.window_start = self.current_index + 1 - self.window_size;
        }
        self.window_start = self.window_start.min(self.max_window_start());
    }

    /// Host backpressure: while set, page scrolling is disabled. Only the
    /// flags are refreshed; no change is reported.
    pub fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.refresh_flags();
        }
    }

    pub fn set_hovered_index(&mut self, index: Option<SliceIndex>) {
        self.hovered_index = index.filter(|i| self.visible_range().contains(*i));
    }

    pub fn set_index_input(&mut self, text: impl Into<String>) {
        self.index_input = text.into();
    }

    /// Parses a typed slice index. Rejected text resets the field to the last
    /// valid index and leaves the state untouched.
    pub fn submit_index_input(&mut self, text: &str) -> Result<bool, WaterfallError> {
        let parsed = match text.trim().parse::<i64>() {
            Ok(value) => value,
            Err(err) if *err.kind() == IntErrorKind::PosOverflow => i64::MAX,
            Err(err) if *err.kind() == IntErrorKind::NegOverflow => 0,
            Err(_) => {
                self.index_input = self.current_index.to_string();
                return Err(WaterfallError::InvalidIndexInput(text.to_string()));
            }
        };
        let index = SliceIndex::try_from(parsed.max(0)).unwrap_or(SliceIndex::MAX);
        let changed = self.set_current_index(index);
        self.index_input = self.current_index.to_string();
        Ok(changed)
    }

    pub fn start_playback(&mut self) -> bool {
        self.start_playback_at(Instant::now())
    }

    pub fn start_playback_at(&mut self, now: Instant) -> bool {
        if self.is_playing() || self.total_slices == 0 || self.current_index >= self.last_index() {
            return false;
        }
        self.state = PlaybackState::Playing;
        self.clock.start(now);
        debug!(
            target: "waterfall::controls",
            index = self.current_index,
            speed = self.clock.speed(),
            "playback started"
        );
        self.finish();
        true
    }

    pub fn stop_playback(&mut self) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.halt_playback("paused");
        self.finish();
        true
    }

    pub fn toggle_playback(&mut self) -> bool {
        if self.is_playing() {
            self.stop_playback()
        } else {
            self.start_playback()
        }
    }

    fn halt_playback(&mut self, reason: &'static str) {
        self.state = PlaybackState::Idle;
        self.clock.stop();
        debug!(
            target: "waterfall::controls",
            index = self.current_index,
            reason,
            "playback stopped"
        );
    }

    pub fn set_playback_speed(&mut self, speed: f64) -> bool {
        self.set_playback_speed_at(speed, Instant::now())
    }

    pub fn set_playback_speed_at(&mut self, speed: f64, now: Instant) -> bool {
        let speed = self.clamp_speed(speed);
        if speed == self.clock.speed() {
            return false;
        }
        self.clock.retime(speed, now);
        self.finish();
        true
    }

    fn clamp_speed(&self, speed: f64) -> f64 {
        if speed.is_nan() {
            return self.clock.speed();
        }
        speed.max(self.min_speed).min(self.max_speed)
    }

    /// Advances playback by every interval elapsed up to `now`. Returns the
    /// number of slices advanced; reaching the last slice stops playback.
    pub fn tick(&mut self, now: Instant) -> usize {
        if !self.is_playing() {
            return 0;
        }
        let due = self.clock.due_advances(now);
        if due == 0 {
            return 0;
        }
        let last = self.last_index();
        let target = self.current_index.saturating_add(due).min(last);
        let advanced = target - self.current_index;
        self.current_index = target;
        self.ensure_window_visible();
        if self.current_index >= last {
            self.halt_playback("reached end of capture");
        }
        self.finish();
        advanced
    }

    pub fn apply(&mut self, action: ControlAction) -> bool {
        match action {
            ControlAction::Increment => self.increment_index(),
            ControlAction::Decrement => self.decrement_index(),
            ControlAction::SetIndex(i) => self.set_current_index(i),
            ControlAction::First => self.set_current_index(0),
            ControlAction::Last => self.set_current_index(self.last_index()),
            ControlAction::ScrollWindowUp => self.scroll_window_up(),
            ControlAction::ScrollWindowDown => self.scroll_window_down(),
            ControlAction::StartPlayback => self.start_playback(),
            ControlAction::StopPlayback => self.stop_playback(),
            ControlAction::TogglePlayback => self.toggle_playback(),
            ControlAction::SetPlaybackSpeed(speed) => self.set_playback_speed(speed),
        }
    }

    fn refresh_flags(&mut self) {
        let has_slices = self.total_slices > 0;
        self.flags = ControlFlags {
            can_increment: has_slices && self.current_index < self.last_index(),
            can_decrement: self.current_index > 0,
            can_scroll_up: !self.loading && self.window_start < self.max_window_start(),
            can_scroll_down: !self.loading && self.window_start > 0,
            can_play: has_slices && !self.is_playing() && self.current_index < self.last_index(),
            is_playing: self.is_playing(),
            loading: self.loading,
            slider_max: self.last_index(),
        };
    }

    fn finish(&mut self) {
        self.refresh_flags();
        self.hovered_index = None;
        self.index_input = self.current_index.to_string();
        let change = SliceChange {
            current_index: self.current_index,
            window_start: self.window_start,
        };
        (self.on_slice_change)(change);
    }
}

/// Orders the configured speed bounds; unusable bounds fall back to defaults.
fn speed_bounds(min: f64, max: f64) -> (f64, f64) {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if usable(min) && usable(max) {
        (min.min(max), min.max(max))
    } else {
        let defaults = WaterfallConfig::default();
        (defaults.min_playback_speed, defaults.max_playback_speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn controller(window: usize, total: usize) -> (ViewportController, Arc<Mutex<Vec<SliceChange>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut c = ViewportController::new(window, move |change| sink.lock().push(change));
        c.set_total_slices(total);
        seen.lock().clear();
        (c, seen)
    }

    fn assert_window_holds_index(c: &ViewportController) {
        assert!(c.window_start() <= c.current_index());
        assert!(c.current_index() < c.window_start() + c.window_size());
        if c.total_slices() >= c.window_size() {
            assert!(c.window_start() + c.window_size() <= c.total_slices());
        }
    }

    #[test]
    fn test_scroll_window_up_moves_one_page() {
        let (mut c, seen) = controller(5, 20);
        assert!(c.scroll_window_up());
        assert_eq!(c.window_start(), 5);
        assert!(c.scroll_window_up());
        assert_eq!(c.window_start(), 10);
        // index followed the window edge
        assert_eq!(c.current_index(), 10);
        assert_eq!(seen.lock().len(), 2);
        assert_window_holds_index(&c);
    }

    #[test]
    fn test_scroll_window_clamps_at_both_ends() {
        let (mut c, _) = controller(5, 17);
        c.scroll_window_up();
        c.scroll_window_up();
        c.scroll_window_up();
        assert_eq!(c.window_start(), 12);
        assert!(!c.can_scroll_up());
        assert!(!c.scroll_window_up());

        c.set_current_index(16);
        assert!(c.scroll_window_down());
        assert_eq!(c.window_start(), 7);
        assert_eq!(c.current_index(), 11);
        c.scroll_window_down();
        c.scroll_window_down();
        assert_eq!(c.window_start(), 0);
        assert!(!c.can_scroll_down());
        assert_window_holds_index(&c);
    }

    #[test]
    fn test_scroll_is_blocked_while_loading() {
        let (mut c, seen) = controller(5, 20);
        c.set_loading(true);
        assert!(!c.flags().can_scroll_up);
        assert!(!c.scroll_window_up());
        assert_eq!(c.window_start(), 0);
        assert!(seen.lock().is_empty());

        c.set_loading(false);
        assert!(c.scroll_window_up());
    }

    #[test]
    fn test_increment_at_last_index_is_noop() {
        let (mut c, seen) = controller(5, 20);
        c.set_current_index(19);
        seen.lock().clear();
        assert!(!c.increment_index());
        assert_eq!(c.current_index(), 19);
        assert!(!c.can_increment());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_decrement_at_zero_is_noop() {
        let (mut c, _) = controller(5, 20);
        assert!(!c.can_decrement());
        assert!(!c.decrement_index());
        assert!(c.increment_index());
        assert!(c.can_decrement());
    }

    #[test]
    fn test_set_current_index_clamps_and_follows() {
        let (mut c, seen) = controller(5, 20);
        assert!(c.set_current_index(500));
        assert_eq!(c.current_index(), 19);
        assert_eq!(c.window_start(), 15);
        assert_window_holds_index(&c);

        assert!(c.set_current_index(12));
        assert_eq!(c.window_start(), 12);
        assert!(!c.set_current_index(12));

        let changes = seen.lock().clone();
        assert_eq!(
            changes,
            vec![
                SliceChange { current_index: 19, window_start: 15 },
                SliceChange { current_index: 12, window_start: 12 },
            ]
        );
    }

    #[test]
    fn test_window_larger_than_capture() {
        let (mut c, _) = controller(10, 4);
        assert_eq!(c.visible_range(), SliceRange::new(0, 4));
        assert!(!c.scroll_window_up());
        c.set_current_index(3);
        assert_eq!(c.window_start(), 0);
        assert_window_holds_index(&c);
    }

    #[test]
    fn test_hover_is_cleared_on_change() {
        let (mut c, _) = controller(5, 20);
        c.set_hovered_index(Some(3));
        assert_eq!(c.hovered_index(), Some(3));
        c.set_hovered_index(Some(8));
        assert_eq!(c.hovered_index(), None);

        c.set_hovered_index(Some(2));
        c.increment_index();
        assert_eq!(c.hovered_index(), None);
    }

    #[test]
    fn test_invalid_index_input_resets_display() {
        let (mut c, seen) = controller(5, 20);
        c.set_current_index(7);
        seen.lock().clear();

        c.set_index_input("7x");
        let err = c.submit_index_input("7x").unwrap_err();
        assert!(matches!(err, WaterfallError::InvalidIndexInput(_)));
        assert_eq!(c.index_input(), "7");
        assert_eq!(c.current_index(), 7);
        assert!(seen.lock().is_empty());

        assert!(c.submit_index_input(" 42 ").unwrap());
        assert_eq!(c.current_index(), 19);
        assert_eq!(c.index_input(), "19");
        assert!(c.submit_index_input("-4").unwrap());
        assert_eq!(c.current_index(), 0);

        assert!(c.submit_index_input("99999999999999999999").unwrap());
        assert_eq!(c.current_index(), 19);
        assert_eq!(c.index_input(), "19");
        assert!(c.submit_index_input("-99999999999999999999").unwrap());
        assert_eq!(c.current_index(), 0);
    }

    #[test]
    fn test_playback_reaches_end_and_stops() {
        let (mut c, seen) = controller(5, 20);
        c.set_current_index(18);
        c.set_playback_speed(10.0);
        let t0 = Instant::now();
        assert!(c.start_playback_at(t0));
        assert!(c.is_playing());
        seen.lock().clear();

        assert_eq!(c.tick(t0 + Duration::from_millis(50)), 0);
        assert_eq!(c.tick(t0 + Duration::from_millis(120)), 1);
        assert_eq!(c.current_index(), 19);
        assert!(!c.is_playing());
        assert!(!c.flags().can_play);

        let callbacks = seen.lock().len();
        assert_eq!(c.tick(t0 + Duration::from_secs(10)), 0);
        assert_eq!(c.current_index(), 19);
        assert_eq!(seen.lock().len(), callbacks);
    }

    #[test]
    fn test_cannot_start_playback_at_last_index() {
        let (mut c, _) = controller(5, 20);
        c.set_current_index(19);
        assert!(!c.start_playback());
        assert!(!c.is_playing());
    }

    #[test]
    fn test_slow_frames_do_not_slow_playback() {
        let (mut c, _) = controller(5, 100);
        c.set_playback_speed(20.0);
        let t0 = Instant::now();
        c.start_playback_at(t0);
        assert_eq!(c.tick(t0 + Duration::from_millis(260)), 5);
        assert_eq!(c.current_index(), 5);
        assert_eq!(c.window_start(), 1);
        assert_window_holds_index(&c);
    }

    #[test]
    fn test_stop_halts_advancement() {
        let (mut c, _) = controller(5, 100);
        c.set_playback_speed(10.0);
        let t0 = Instant::now();
        c.start_playback_at(t0);
        c.tick(t0 + Duration::from_millis(310));
        assert!(c.stop_playback());
        let index = c.current_index();
        assert_eq!(c.tick(t0 + Duration::from_secs(5)), 0);
        assert_eq!(c.current_index(), index);
    }

    #[test]
    fn test_manual_navigation_does_not_pause_playback() {
        let (mut c, _) = controller(5, 100);
        c.start_playback();
        assert!(c.set_current_index(40));
        assert!(c.is_playing());
        assert!(c.scroll_window_down());
        assert!(c.is_playing());
    }

    #[test]
    fn test_speed_change_retimes_immediately() {
        let (mut c, _) = controller(5, 100);
        c.set_playback_speed(1.0);
        let t0 = Instant::now();
        c.start_playback_at(t0);
        let t1 = t0 + Duration::from_millis(900);
        assert!(c.set_playback_speed_at(10.0, t1));
        assert_eq!(c.tick(t1 + Duration::from_millis(110)), 1);
        assert_eq!(c.current_index(), 1);
    }

    #[test]
    fn test_speed_is_clamped_to_config_bounds() {
        let config = WaterfallConfig {
            min_playback_speed: 2.0,
            max_playback_speed: 30.0,
            ..WaterfallConfig::default()
        };
        let mut c = ViewportController::from_config(&config, |_| {});
        c.set_playback_speed(500.0);
        assert_eq!(c.playback_speed(), 30.0);
        c.set_playback_speed(0.1);
        assert_eq!(c.playback_speed(), 2.0);
    }

    #[test]
    fn test_unordered_speed_bounds_do_not_panic() {
        let inverted = WaterfallConfig {
            min_playback_speed: 10.0,
            max_playback_speed: 1.0,
            playback_speed: 5.0,
            ..WaterfallConfig::default()
        };
        let mut c = ViewportController::from_config(&inverted, |_| {});
        assert_eq!(c.playback_speed(), 5.0);
        c.set_playback_speed(100.0);
        assert_eq!(c.playback_speed(), 10.0);
        c.set_playback_speed(0.01);
        assert_eq!(c.playback_speed(), 1.0);

        let unusable = WaterfallConfig {
            min_playback_speed: f64::NAN,
            max_playback_speed: -3.0,
            ..WaterfallConfig::default()
        };
        let defaults = WaterfallConfig::default();
        let mut c = ViewportController::from_config(&unusable, |_| {});
        c.set_playback_speed(1.0e6);
        assert_eq!(c.playback_speed(), defaults.max_playback_speed);
    }

    #[test]
    fn test_shrinking_total_past_playhead_stops_playback() {
        let (mut c, seen) = controller(5, 20);
        c.set_current_index(18);
        assert!(c.start_playback());
        seen.lock().clear();

        assert!(c.set_total_slices(10));
        assert!(!c.is_playing());
        assert_eq!(c.current_index(), 9);
        assert!(!c.flags().can_play);
        assert!(!c.flags().is_playing);
        assert_eq!(seen.lock().len(), 1);
        assert_window_holds_index(&c);
    }

    #[test]
    fn test_shrinking_total_clamps_position() {
        let (mut c, _) = controller(5, 20);
        c.set_current_index(18);
        assert!(c.set_total_slices(10));
        assert_eq!(c.current_index(), 9);
        assert_eq!(c.window_start(), 5);
        assert_eq!(c.flags().slider_max, 9);
        assert!(!c.set_total_slices(10));
        assert_window_holds_index(&c);
    }

    #[test]
    fn test_apply_dispatches_actions() {
        let (mut c, _) = controller(5, 20);
        assert!(c.apply(ControlAction::Last));
        assert_eq!(c.current_index(), 19);
        assert!(c.apply(ControlAction::First));
        assert!(c.apply(ControlAction::ScrollWindowUp));
        assert_eq!(c.window_start(), 5);
        assert!(c.apply(ControlAction::TogglePlayback));
        assert!(c.is_playing());
        assert!(c.apply(ControlAction::TogglePlayback));
        assert!(!c.is_playing());
    }
}
