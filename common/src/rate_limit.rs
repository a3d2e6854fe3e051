use tokio::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
/// A very simple rate limiter, that uses a fixed time window between events.
/// I.e., no bursts or anything.
///
/// Mostly used to keep per-event diagnostics (e.g., "user agent map is full")
/// from flooding the log: callers only log when `check_update()` says so and
/// can report how many occurrences were swallowed in between.
pub struct SimpleRateLimiter {
    time_between_events: Duration,
    last_event_time: Option<Instant>,
    suppressed: u64,
}

impl SimpleRateLimiter {
    /// Create a new rate limiter that allows one event per `time_between_events`.
    pub fn new(time_between_events: Duration) -> Self {
        Self {
            time_between_events,
            last_event_time: None,
            suppressed: 0,
        }
    }

    /// Returns true if the caller may act on this event. Every denied call is
    /// counted as suppressed.
    pub fn check_update(&mut self) -> bool {
        let now = Instant::now();
        let allowed = match self.last_event_time {
            None => true,
            Some(last) => now.duration_since(last) >= self.time_between_events,
        };
        if allowed {
            self.last_event_time = Some(now);
        } else {
            self.suppressed += 1;
        }
        allowed
    }

    /// Like `check_update()` but on success also returns (and resets) the
    /// number of events suppressed since the last allowed one.
    pub fn check_update_with_suppressed(&mut self) -> Option<u64> {
        if self.check_update() {
            Some(std::mem::take(&mut self.suppressed))
        } else {
            None
        }
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
