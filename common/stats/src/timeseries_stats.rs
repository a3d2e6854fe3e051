use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterBucket {
    /// The absolute bucket number, i.e., `(time - created_time) / bucket_time_window`,
    /// whose samples this bucket currently holds
    pub epoch: u64,
    pub sum: u64,
    pub max: u64,
    pub num_entries: u64,
    /// `(microseconds since creation, value)` of every sample in the bucket. Only
    /// consulted when the start of a window falls into this bucket.
    pub samples: Vec<(u64, u64)>,
}

impl CounterBucket {
    pub fn new() -> CounterBucket {
        CounterBucket::default()
    }

    pub fn add(&mut self, value: u64) {
        // try to do some sane things to avoid wrapping counters
        self.sum = self.sum.saturating_add(value);
        self.max = std::cmp::max(self.max, value);
        self.num_entries = self.num_entries.saturating_add(1);
    }

    /// Add a sample and remember when it was taken
    pub fn add_sample(&mut self, at_us: u64, value: u64) {
        self.add(value);
        self.samples.push((at_us, value));
    }

    pub fn avg(&self) -> f64 {
        if self.num_entries == 0 {
            0.0
        } else {
            self.sum as f64 / self.num_entries as f64
        }
    }

    /// Empty the bucket and re-label it for `epoch`
    pub fn reset(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.sum = 0;
        self.max = 0;
        self.num_entries = 0;
        self.samples.clear();
    }
}

/// Sum, max and number of samples inside a time window.
///
/// Totals of different series can be merged. That is how per-container latency
/// windows get rolled up into an application total without averaging averages
/// (which would over-weight containers that barely see any traffic).
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTotals {
    pub sum: u64,
    pub max: u64,
    pub num_entries: u64,
}

impl WindowTotals {
    fn add_bucket(&mut self, bucket: &CounterBucket) {
        self.sum = self.sum.saturating_add(bucket.sum);
        self.max = self.max.max(bucket.max);
        self.num_entries = self.num_entries.saturating_add(bucket.num_entries);
    }

    fn add_value(&mut self, value: u64) {
        self.sum = self.sum.saturating_add(value);
        self.max = self.max.max(value);
        self.num_entries = self.num_entries.saturating_add(1);
    }

    pub fn merge(&mut self, other: &WindowTotals) {
        self.sum = self.sum.saturating_add(other.sum);
        self.max = self.max.max(other.max);
        self.num_entries = self.num_entries.saturating_add(other.num_entries);
    }

    pub fn avg(&self) -> f64 {
        if self.num_entries == 0 {
            0.0
        } else {
            self.sum as f64 / self.num_entries as f64
        }
    }
}

pub type BucketIndex = usize;

/**
 * BucketedTimeSeries.
 * Roughly inspired by https://github.com/facebook/folly/blob/main/folly/stats/BucketedTimeSeries.h
 *
 * Tracks values across a sliding time window, e.g., response times seen in the last 10 seconds.
 *
 * A window is `num_buckets` buckets of `bucket_time_window` each. The data lives in a
 * circular buffer of `num_buckets + 1` counters, one more than a window needs, since
 * a window that doesn't start on a bucket boundary touches `num_buckets + 1` buckets.
 * Every bucket remembers which absolute time slot (its `epoch`) it holds, so:
 *
 * 1. Writes into a slot that still holds an older epoch reset the slot first.
 * 2. A read at `t` covers exactly `(t - window, t]`. Buckets completely inside the
 *    window contribute their totals, the bucket the window starts in is filtered
 *    sample by sample. Expired buckets are dropped lazily and reads never need `&mut`.
 * 3. Samples older than the window (late arrivals) are rejected.
 *
 * Reads are anchored at the later of `now` and the newest sample, so a reader with a
 * slightly older clock never loses data that was already stored.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketedTimeSeries {
    created_time: DateTime<Utc>,
    bucket_time_window: Duration,
    /// Buckets per window
    num_buckets: BucketIndex,
    buckets: Vec<CounterBucket>,
    /// Microseconds since creation of the most recent sample
    last_us: u64,
}

impl BucketedTimeSeries {
    /**
     * Create a new BucketedTimeSeries whose epoch zero starts at `created_time`
     */
    pub fn new_with_create_time(
        created_time: DateTime<Utc>,
        bucket_time_window: Duration,
        num_buckets: BucketIndex,
    ) -> BucketedTimeSeries {
        let num_buckets = num_buckets.max(1);
        BucketedTimeSeries {
            created_time,
            bucket_time_window: bucket_time_window.max(Duration::from_micros(1)),
            num_buckets,
            buckets: vec![CounterBucket::new(); num_buckets + 1],
            last_us: 0,
        }
    }

    fn bucket_width_us(&self) -> u64 {
        (self.bucket_time_window.as_micros() as u64).max(1)
    }

    fn window_us(&self) -> u64 {
        self.bucket_width_us() * self.num_buckets as u64
    }

    /// Microseconds since creation. Timestamps from before the creation time are
    /// clamped to zero.
    fn offset_us(&self, now: DateTime<Utc>) -> u64 {
        let offset_us = (now - self.created_time)
            .num_microseconds()
            .unwrap_or(i64::MAX);
        offset_us.max(0) as u64
    }

    /// Map a timestamp to its absolute bucket number
    pub fn epoch_of(&self, now: DateTime<Utc>) -> u64 {
        self.offset_us(now) / self.bucket_width_us()
    }

    /// The end of the window a read at `now` covers
    fn read_anchor_us(&self, now: DateTime<Utc>) -> u64 {
        std::cmp::max(self.offset_us(now), self.last_us)
    }

    fn read_epoch(&self, now: DateTime<Utc>) -> u64 {
        self.read_anchor_us(now) / self.bucket_width_us()
    }

    /// Add `value` at time `now`. Returns false if the sample was too old to fit
    /// into the window and was dropped.
    pub fn add_value(&mut self, value: u64, now: DateTime<Utc>) -> bool {
        let at_us = self.offset_us(now);
        if at_us.saturating_add(self.window_us()) <= self.last_us {
            // recently old data, could happen if the caller was delayed; but it
            // doesn't fit into the window anymore
            return false;
        }
        let epoch = at_us / self.bucket_width_us();
        let slots = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(epoch % slots) as usize];
        if bucket.epoch != epoch {
            bucket.reset(epoch);
        }
        bucket.add_sample(at_us, value);
        self.last_us = self.last_us.max(at_us);
        true
    }

    /// Sum, max and count of everything inside the window ending at `now`
    pub fn totals(&self, now: DateTime<Utc>) -> WindowTotals {
        let end_us = self.read_anchor_us(now);
        let width_us = self.bucket_width_us();
        // None if the window starts before the series was created
        let start_us = end_us.checked_sub(self.window_us());
        let first_epoch = start_us.map_or(0, |s| s / width_us);
        let last_epoch = end_us / width_us;
        let mut totals = WindowTotals::default();
        for b in self.buckets.iter().filter(|b| {
            b.num_entries > 0 && b.epoch >= first_epoch && b.epoch <= last_epoch
        }) {
            match start_us {
                Some(start_us) if b.epoch == first_epoch => b
                    .samples
                    .iter()
                    .filter(|(at_us, _)| *at_us > start_us)
                    .for_each(|(_, value)| totals.add_value(*value)),
                _ => totals.add_bucket(b),
            }
        }
        totals
    }

    pub fn get_sum(&self, now: DateTime<Utc>) -> u64 {
        self.totals(now).sum
    }

    pub fn get_max(&self, now: DateTime<Utc>) -> u64 {
        self.totals(now).max
    }

    /**
     * Average of the values (not over time!) in the window.
     */
    pub fn get_avg(&self, now: DateTime<Utc>) -> f64 {
        self.totals(now).avg()
    }

    pub fn get_num_entries(&self, now: DateTime<Utc>) -> u64 {
        self.totals(now).num_entries
    }

    /// The time span of a window
    pub fn total_duration(&self) -> Duration {
        self.bucket_time_window * self.num_buckets as u32
    }

    pub fn num_buckets(&self) -> BucketIndex {
        self.num_buckets
    }

    pub fn bucket_time_window(&self) -> Duration {
        self.bucket_time_window
    }

    /// Has enough time passed since creation that every bucket could have been used?
    pub fn full_window_seen(&self, now: DateTime<Utc>) -> bool {
        self.read_epoch(now) + 1 >= self.num_buckets as u64
    }
}

/// Convert a number of samples seen in `window` into samples per second.
/// Integer math on purpose: dashboards show whole events per second.
pub fn rate_per_second(count: u64, window: Duration) -> u64 {
    let window_us = window.as_micros().max(1);
    ((count as u128 * 1_000_000) / window_us) as u64
}

/// The trailing-window tracker behind every rate and latency column: tracks the
/// samples recorded within the last `window` and answers count/rate/average queries.
///
/// Not synchronized. The owner of the live statistics mutates it under its lock and
/// readers only query the copy in a frozen snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowTracker {
    window: Duration,
    series: BucketedTimeSeries,
}

impl SlidingWindowTracker {
    /// Upper bound on the buckets we use for long windows; 1 second resolution
    /// for anything up to 10 minutes is plenty for a dashboard.
    const MAX_BUCKETS: u64 = 600;

    pub fn new(window: Duration, now: DateTime<Utc>) -> SlidingWindowTracker {
        SlidingWindowTracker::with_buckets(window, Self::default_num_buckets(window), now)
    }

    pub fn with_buckets(
        window: Duration,
        num_buckets: BucketIndex,
        now: DateTime<Utc>,
    ) -> SlidingWindowTracker {
        let num_buckets = num_buckets.max(1);
        SlidingWindowTracker {
            window,
            series: BucketedTimeSeries::new_with_create_time(
                now,
                window / num_buckets as u32,
                num_buckets,
            ),
        }
    }

    /// Sub-second windows get 10 buckets, longer ones one bucket per second.
    pub fn default_num_buckets(window: Duration) -> BucketIndex {
        if window <= Duration::from_secs(1) {
            10
        } else {
            window.as_secs().clamp(1, Self::MAX_BUCKETS) as BucketIndex
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one sample observed at `now`
    pub fn track(&mut self, value: u64, now: DateTime<Utc>) -> bool {
        self.series.add_value(value, now)
    }

    /// Number of samples recorded in the window ending at `now`
    pub fn count(&self, now: DateTime<Utc>) -> u64 {
        self.series.get_num_entries(now)
    }

    /// Samples per second over the window ending at `now`
    pub fn rate(&self, now: DateTime<Utc>) -> u64 {
        rate_per_second(self.count(now), self.window)
    }

    /// Mean sample value in the window ending at `now`
    pub fn avg(&self, now: DateTime<Utc>) -> f64 {
        self.series.get_avg(now)
    }

    pub fn totals(&self, now: DateTime<Utc>) -> WindowTotals {
        self.series.totals(now)
    }
}

/**
 * Keeps track of multiple SlidingWindowTrackers to allow tracking of data across multiple time
 * windows. E.g., response times over the last 1, 10 and 60 seconds.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiWindowTracker {
    /// One tracker per window, in the order the windows were given
    windows: Vec<SlidingWindowTracker>,
    /// Everything ever tracked
    all_time: WindowTotals,
}

impl MultiWindowTracker {
    pub fn new(window_sizes: &[Duration], now: DateTime<Utc>) -> Self {
        MultiWindowTracker {
            windows: window_sizes
                .iter()
                .map(|w| SlidingWindowTracker::new(*w, now))
                .collect(),
            all_time: WindowTotals::default(),
        }
    }

    /// Add `value` at time `now` to all windows
    pub fn track(&mut self, value: u64, now: DateTime<Utc>) {
        for w in &mut self.windows {
            w.track(value, now);
        }
        self.all_time.merge(&WindowTotals {
            sum: value,
            max: value,
            num_entries: 1,
        });
    }

    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self, level_idx: usize) -> Option<Duration> {
        self.windows.get(level_idx).map(|w| w.window())
    }

    /// Totals for the given level. If `level_idx >= self.num_windows()` this
    /// returns the all-time totals.
    pub fn totals(&self, level_idx: usize, now: DateTime<Utc>) -> WindowTotals {
        match self.windows.get(level_idx) {
            Some(w) => w.totals(now),
            None => self.all_time,
        }
    }

    /// See `totals()` for how `level_idx` is handled
    pub fn count(&self, level_idx: usize, now: DateTime<Utc>) -> u64 {
        self.totals(level_idx, now).num_entries
    }

    /// See `totals()` for how `level_idx` is handled
    pub fn avg(&self, level_idx: usize, now: DateTime<Utc>) -> f64 {
        self.totals(level_idx, now).avg()
    }

    /// Rate for a window level; zero for the all-time level which has no
    /// meaningful duration.
    pub fn rate(&self, level_idx: usize, now: DateTime<Utc>) -> u64 {
        match self.windows.get(level_idx) {
            Some(w) => w.rate(now),
            None => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration as ChronoDuration;

    fn secs(s: i64) -> ChronoDuration {
        ChronoDuration::seconds(s)
    }

    fn millis(ms: i64) -> ChronoDuration {
        ChronoDuration::milliseconds(ms)
    }

    #[test]
    fn time_series_basic() {
        let t0 = Utc::now();
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 2);
        assert_eq!(ts.get_sum(t0), 0);
        // add 1 'right away'
        assert!(ts.add_value(1, t0));
        assert_eq!(ts.get_sum(t0), 1);
        assert_eq!(ts.buckets[0].sum, 1);
        // add 2, 1 second after 'right away'
        ts.add_value(2, t0 + secs(1));
        assert_eq!(ts.buckets[1].sum, 2);
        assert_eq!(ts.get_sum(t0 + secs(1)), 3);
        // 2 seconds in: the spare slot takes epoch 2, the window (t0, t0 + 2s] no
        // longer holds the first value
        ts.add_value(3, t0 + secs(2));
        assert_eq!(ts.buckets[2].sum, 3);
        assert_eq!(ts.buckets[2].epoch, 2);
        assert_eq!(ts.get_sum(t0 + secs(2)), 5);
        // 7 seconds in: epoch 7 wraps around to slot 1 and is alone in the window
        ts.add_value(4, t0 + secs(7));
        assert_eq!(ts.buckets[1].sum, 4);
        assert_eq!(ts.buckets[1].epoch, 7);
        assert_eq!(ts.get_sum(t0 + secs(7)), 4);
    }

    #[test]
    fn time_series_harder() {
        let t0 = Utc::now();
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 8);
        ts.add_value(1, t0);
        assert_eq!(ts.get_sum(t0), 1);
        // 12 seconds later the first value is long gone
        ts.add_value(2, t0 + secs(12));
        assert_eq!(ts.get_sum(t0 + secs(12)), 2);
    }

    #[test]
    fn test_reads_expire_without_writes() {
        let t0 = Utc::now();
        let dt = millis(1001);
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 4);

        for i in 0..4 {
            ts.add_value(i as u64 + 1, t0 + dt * i);
        }
        assert_eq!(ts.get_sum(t0 + dt * 3), 1 + 2 + 3 + 4);
        // reading later drops the oldest buckets even though nothing was written
        assert_eq!(ts.get_sum(t0 + dt * 4), 2 + 3 + 4);
        assert_eq!(ts.get_sum(t0 + dt * 5), 3 + 4);
        assert_eq!(ts.get_sum(t0 + dt * 10), 0);
        // but the stored data is untouched until a write reuses the slot
        assert_eq!(ts.buckets[0].sum, 1);
    }

    #[test]
    fn test_wrap_skips_slots() {
        let t0 = Utc::now();
        let dt = millis(1001);
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 4);

        for i in 0..4 {
            ts.add_value(i as u64 + 1, t0 + dt * i);
        }
        // epoch 5 lands in slot 0; epochs 2 and 3 are still in the window, 0 and 1 are not
        ts.add_value(5, t0 + dt * 5);
        assert_eq!(ts.buckets[0].epoch, 5);
        assert_eq!(ts.get_sum(t0 + dt * 5), 3 + 4 + 5);
        assert_eq!(ts.get_num_entries(t0 + dt * 5), 3);
    }

    #[test]
    fn test_late_samples() {
        let t0 = Utc::now();
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 4);
        ts.add_value(10, t0 + secs(10));
        // 2 seconds late, still inside the window
        assert!(ts.add_value(8, t0 + secs(8)));
        // 5 seconds late, outside of the window: dropped
        assert!(!ts.add_value(5, t0 + secs(5)));
        assert_eq!(ts.get_sum(t0 + secs(10)), 18);
        // a reader with an older clock still sees everything
        assert_eq!(ts.get_sum(t0 + secs(9)), 18);
    }

    #[test]
    fn test_counter_bucket() {
        let mut cb = CounterBucket::default();
        cb.add(5);
        cb.add(10);
        cb.add(2);
        assert_eq!(cb.sum, 17);
        assert_eq!(cb.max, 10);
        assert_eq!(cb.num_entries, 3);
        assert_eq!(cb.avg(), 17. / 3.);

        cb.add_sample(7, 1);
        assert_eq!(cb.samples, vec![(7, 1)]);
        assert_eq!(cb.num_entries, 4);

        cb.reset(42);
        assert!(cb.samples.is_empty());
        assert_eq!(cb.sum, 0);
        assert_eq!(cb.max, 0);
        assert_eq!(cb.num_entries, 0);
        assert_eq!(cb.epoch, 42);
        assert_eq!(cb.avg(), 0.0);
    }

    #[test]
    fn test_bucketed_timeseries_getters() {
        let t0 = Utc::now();
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 60);
        for i in 0..60 {
            ts.add_value(i as u64 + 1, t0 + secs(i));
            ts.add_value(i as u64 + 1, t0 + secs(i));
        }
        let now = t0 + secs(59);
        let expected_sum = 60 * 61; // 2*  n*(n+1)/2 :-)
        assert_eq!(ts.get_sum(now), expected_sum);
        assert_eq!(ts.get_num_entries(now), 120);
        assert_eq!(ts.get_avg(now), expected_sum as f64 / 120.);
        assert_eq!(ts.get_max(now), 60);
        assert!(ts.full_window_seen(now));

        // three buckets fall out of the window, with two entries each
        let later = t0 + secs(62);
        assert_eq!(ts.get_num_entries(later), 114);
        // the sum should have been reduced by 2 + 4 + 6 = 12
        assert_eq!(ts.get_sum(later), expected_sum - 12);
    }

    #[test]
    fn test_bucketed_timeseries_max() {
        let t0 = Utc::now();
        let mut ts = BucketedTimeSeries::new_with_create_time(t0, Duration::from_secs(1), 5);
        ts.add_value(10, t0);

        ts.add_value(25, t0 + secs(1));
        ts.add_value(100, t0 + secs(1));
        ts.add_value(50, t0 + secs(1));

        ts.add_value(23, t0 + secs(2));
        ts.add_value(42, t0 + secs(3));
        assert_eq!(ts.get_num_entries(t0 + secs(3)), 6);
        assert_eq!(ts.get_max(t0 + secs(3)), 100);

        assert_eq!(ts.get_max(t0 + secs(7)), 42);
    }

    #[test]
    fn test_rate_per_second() {
        assert_eq!(rate_per_second(120, Duration::from_secs(2)), 60);
        assert_eq!(rate_per_second(120, Duration::from_millis(500)), 240);
        assert_eq!(rate_per_second(9, Duration::from_secs(10)), 0);
        assert_eq!(rate_per_second(120, Duration::from_millis(0)), 120_000_000);
    }

    #[test]
    fn test_tracker_counts_trailing_window() {
        let t0 = Utc::now();
        let mut tracker = SlidingWindowTracker::new(Duration::from_secs(10), t0);
        assert_eq!(tracker.series.num_buckets(), 10);
        for k in 0..30 {
            tracker.track(100 + k as u64, t0 + secs(k));
        }
        let now = t0 + secs(29);
        assert_eq!(tracker.count(now), 10);
        assert_eq!(tracker.rate(now), 1);
        // samples 20..=29 => values 120..=129
        assert_relative_eq!(tracker.avg(now), 124.5);
        // half a second later, (19.5, 29.5] still holds exactly the same samples
        assert_eq!(tracker.count(now + millis(500)), 10);
        assert_eq!(tracker.count(t0 + secs(35)), 4);
        assert_eq!(tracker.count(t0 + secs(39)), 0);
        assert_eq!(tracker.avg(t0 + secs(39)), 0.0);
    }

    #[test]
    fn test_tracker_one_second_window() {
        let t0 = Utc::now();
        let mut tracker = SlidingWindowTracker::new(Duration::from_secs(1), t0);
        assert_eq!(tracker.series.num_buckets(), 10);
        for k in 0..5 {
            tracker.track(10 * (k as u64 + 1), t0 + millis(100 * k));
        }
        assert_eq!(tracker.count(t0 + millis(400)), 5);
        assert_eq!(tracker.rate(t0 + millis(400)), 5);
        assert_relative_eq!(tracker.avg(t0 + millis(400)), 30.0);
        // (50ms, 1050ms] no longer holds the sample at t0
        assert_eq!(tracker.count(t0 + millis(1050)), 4);
        assert_relative_eq!(tracker.avg(t0 + millis(1050)), 35.0);
    }

    #[test]
    fn test_tracker_off_bucket_boundaries() {
        let t0 = Utc::now();
        let mut tracker = SlidingWindowTracker::new(Duration::from_secs(10), t0);
        tracker.track(7, t0 + millis(900));
        // (0.5s, 10.5s] holds the sample, (0.9s, 10.9s] doesn't
        assert_eq!(tracker.count(t0 + millis(10_500)), 1);
        assert_eq!(tracker.count(t0 + millis(10_899)), 1);
        assert_eq!(tracker.count(t0 + millis(10_900)), 0);
        assert_eq!(tracker.count(t0 + millis(10_901)), 0);
    }

    #[test]
    fn test_tracker_matches_brute_force_count() {
        let t0 = Utc::now();
        let mut tracker = SlidingWindowTracker::new(Duration::from_secs(10), t0);
        let window = millis(10_000);
        // irregular gaps, several samples per bucket, none on a bucket boundary
        let mut sample_times = Vec::new();
        let mut t = t0 + millis(37);
        for k in 0..200i64 {
            sample_times.push(t);
            assert!(tracker.track(k as u64, t));
            t += millis(13 + (k * 97) % 311);
        }
        let last = *sample_times.last().unwrap();
        let mut now = last;
        while now < last + window + millis(500) {
            let expected = sample_times
                .iter()
                .filter(|ts| **ts > now - window && **ts <= now)
                .count() as u64;
            assert_eq!(tracker.count(now), expected, "at {}", now - t0);
            now += millis(53);
        }
    }

    #[test]
    fn test_window_totals_merge() {
        let t0 = Utc::now();
        let mut busy = SlidingWindowTracker::new(Duration::from_secs(10), t0);
        let mut quiet = SlidingWindowTracker::new(Duration::from_secs(10), t0);
        for _ in 0..9 {
            busy.track(10, t0);
        }
        quiet.track(1000, t0);
        let mut merged = busy.totals(t0);
        merged.merge(&quiet.totals(t0));
        assert_eq!(merged.num_entries, 10);
        assert_eq!(merged.max, 1000);
        // 1090 / 10, not the mean of means (505)
        assert_relative_eq!(merged.avg(), 109.0);
    }

    #[test]
    fn test_multi_window_creation() {
        let t0 = Utc::now();
        let mwt = MultiWindowTracker::new(
            &[Duration::from_secs(60), Duration::from_secs(600)],
            t0,
        );
        assert_eq!(mwt.num_windows(), 2);
        assert_eq!(mwt.window(0), Some(Duration::from_secs(60)));
        assert_eq!(mwt.window(2), None);
        assert_eq!(
            mwt.windows[1].series.bucket_time_window(),
            Duration::from_secs(1)
        );
        assert_eq!(mwt.windows[1].series.num_buckets(), 600);
        // nothing in there yet; make sure we don't divide by zero
        for lvl in 0..3 {
            assert_eq!(mwt.count(lvl, t0), 0);
            assert_eq!(mwt.avg(lvl, t0), 0.0);
            assert_eq!(mwt.rate(lvl, t0), 0);
        }
    }

    #[test]
    fn test_multi_window_levels() {
        let t0 = Utc::now();
        let mut mwt = MultiWindowTracker::new(
            &[Duration::from_secs(60), Duration::from_secs(600)],
            t0,
        );
        mwt.track(10, t0);
        mwt.track(10, t0 + secs(10));
        mwt.track(50, t0 + secs(30));
        for lvl in 0..3 {
            assert_eq!(mwt.totals(lvl, t0 + secs(30)).sum, 70);
        }

        // the first three values fall out of the 60 sec window
        mwt.track(200, t0 + secs(130));
        mwt.track(500, t0 + secs(140));
        mwt.track(100, t0 + secs(150));
        let now = t0 + secs(150);
        assert_eq!(mwt.totals(0, now).sum, 800);
        assert_eq!(mwt.totals(1, now).sum, 870);
        assert_eq!(mwt.totals(2, now).sum, 870);
        assert_eq!(mwt.count(0, now), 3);
        assert_eq!(mwt.count(1, now), 6);
        assert_eq!(mwt.count(2, now), 6);
    }

    #[test]
    fn test_multi_window_evictions() {
        let t0 = Utc::now();
        let mut mwt = MultiWindowTracker::new(
            &[Duration::from_secs(60), Duration::from_secs(600)],
            t0,
        );
        for i in 0..60 {
            mwt.track(42, t0 + secs(10 * i));
        }
        let t1 = t0 + secs(590);
        assert_eq!(mwt.count(0, t1), 6);
        assert_eq!(mwt.count(1, t1), 60);
        assert_eq!(mwt.count(2, t1), 60);
        assert_eq!(mwt.totals(0, t1).sum, 6 * 42);

        // now add more data; the 600 sec window starts to lose the old samples
        for i in 1..=30 {
            mwt.track(23, t1 + secs(10 * i));
        }
        let t2 = t1 + secs(300);
        assert_eq!(mwt.count(0, t2), 6);
        assert_eq!(mwt.count(1, t2), 60);
        assert_eq!(mwt.count(2, t2), 90);
        assert_eq!(mwt.totals(0, t2).sum, 6 * 23);
        assert_eq!(mwt.totals(1, t2).sum, 30 * 23 + 30 * 42);
        assert_eq!(mwt.totals(2, t2).sum, 60 * 42 + 30 * 23);

        assert_eq!(mwt.rate(0, t2), 0); // 6 samples / 60 sec
        assert_eq!(mwt.rate(2, t2), 0); // no duration for all-time
        assert_eq!(mwt.avg(0, t2), 23.);
        assert_eq!(mwt.avg(1, t2), (30 * 23 + 30 * 42) as f64 / 60.);
        assert_eq!(mwt.avg(2, t2), (60 * 42 + 30 * 23) as f64 / 90.);

        assert_eq!(mwt.totals(0, t2).max, 23);
        assert_eq!(mwt.totals(1, t2).max, 42);
        assert_eq!(mwt.totals(2, t2).max, 42);

        // 599 sec later the 60 sec window is empty and the 600 sec window has a single entry
        let t3 = t2 + secs(599);
        assert_eq!(mwt.count(0, t3), 0);
        assert_eq!(mwt.count(1, t3), 1);
        assert_eq!(mwt.totals(1, t3).sum, 23);
        assert_eq!(mwt.count(2, t3), 90);
    }
}
