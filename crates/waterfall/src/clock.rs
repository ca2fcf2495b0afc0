use std::time::{Duration, Instant};

/// Elapsed-time gate for playback: converts wall-clock time into whole slice
/// advances at `speed` slices per second.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    speed: f64,
    anchor: Option<Instant>,
}

impl PlaybackClock {
    pub fn new(speed: f64) -> Self {
        Self {
            speed: sanitize_speed(speed),
            anchor: None,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    /// Time between two slice advances.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos((1_000_000_000.0 / self.speed).round() as u64)
    }

    pub fn start(&mut self, now: Instant) {
        self.anchor = Some(now);
    }

    pub fn stop(&mut self) {
        self.anchor = None;
    }

    /// Changes the rate; a running clock re-anchors at `now` so the new rate
    /// applies from this instant.
    pub fn retime(&mut self, speed: f64, now: Instant) {
        self.speed = sanitize_speed(speed);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }

    /// Number of whole intervals elapsed since the anchor. Consumed intervals
    /// move the anchor forward; the remainder carries over to the next call.
    pub fn due_advances(&mut self, now: Instant) -> usize {
        let Some(anchor) = self.anchor else {
            return 0;
        };
        let elapsed = now.saturating_duration_since(anchor).as_nanos();
        let interval = self.interval();
        let step = interval.as_nanos().max(1);
        let due = elapsed / step;
        if due > 0 {
            self.anchor = Some(anchor + Duration::from_nanos((due * step) as u64));
        }
        due as usize
    }
}

fn sanitize_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_advances_while_stopped() {
        let mut clock = PlaybackClock::new(10.0);
        let t0 = Instant::now();
        assert_eq!(clock.due_advances(t0 + Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_advances_follow_elapsed_time_not_call_count() {
        let mut clock = PlaybackClock::new(10.0);
        let t0 = Instant::now();
        clock.start(t0);

        // Many fast frames inside one interval advance nothing.
        for ms in [16, 33, 50, 66, 83] {
            assert_eq!(clock.due_advances(t0 + Duration::from_millis(ms)), 0);
        }
        assert_eq!(clock.due_advances(t0 + Duration::from_millis(105)), 1);
        // One slow frame catches up on every interval it spanned.
        assert_eq!(clock.due_advances(t0 + Duration::from_millis(420)), 3);
        assert_eq!(clock.due_advances(t0 + Duration::from_millis(450)), 0);
        assert_eq!(clock.due_advances(t0 + Duration::from_millis(510)), 1);
    }

    #[test]
    fn test_retime_reanchors_running_clock() {
        let mut clock = PlaybackClock::new(1.0);
        let t0 = Instant::now();
        clock.start(t0);
        let t1 = t0 + Duration::from_millis(900);
        clock.retime(20.0, t1);
        assert_eq!(clock.due_advances(t1 + Duration::from_millis(60)), 1);
        assert_eq!(clock.interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_invalid_speed_falls_back() {
        assert_eq!(PlaybackClock::new(0.0).speed(), 1.0);
        assert_eq!(PlaybackClock::new(f64::NAN).speed(), 1.0);
    }
}
