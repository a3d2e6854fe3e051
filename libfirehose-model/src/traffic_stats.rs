use std::{fmt::Display, time::Duration};

use chrono::{DateTime, Utc};
use common_stats::{timeseries_stats::rate_per_second, MultiWindowTracker, WindowTotals};
use serde::Serialize;

use crate::pretty_print_si_units;

/// The trailing windows every TrafficStats tracks: 1s, 10s and 60s
pub const TRAFFIC_WINDOWS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(10),
    Duration::from_secs(60),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
}

impl StatusClass {
    /// `None` for anything outside of 200..=599
    pub fn from_status_code(code: u16) -> Option<StatusClass> {
        match code {
            200..=299 => Some(StatusClass::Success),
            300..=399 => Some(StatusClass::Redirect),
            400..=499 => Some(StatusClass::ClientError),
            500..=599 => Some(StatusClass::ServerError),
            _ => None,
        }
    }
}

/**
 * HTTP traffic of one container (or, once rolled up, of one application).
 *
 * Latencies (in nanoseconds) go into 1s/10s/60s sliding windows. The counters are
 * monotonic. The derived `avg_response_l*_time` and `event_l*_rate` fields are only
 * filled in by `finalize()`/`rollup()` when a snapshot is taken, never per event.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrafficStats {
    #[serde(skip)]
    latency: MultiWindowTracker,
    pub http_all_count: u64,
    pub http_2xx_count: u64,
    pub http_3xx_count: u64,
    pub http_4xx_count: u64,
    pub http_5xx_count: u64,
    /// Average response time in nanoseconds over the last second
    pub avg_response_l1_time: f64,
    pub avg_response_l10_time: f64,
    pub avg_response_l60_time: f64,
    /// Requests per second over the last second
    pub event_l1_rate: u64,
    pub event_l10_rate: u64,
    pub event_l60_rate: u64,
    pub last_access: Option<DateTime<Utc>>,
}

impl TrafficStats {
    pub fn new(now: DateTime<Utc>) -> TrafficStats {
        TrafficStats {
            latency: MultiWindowTracker::new(&TRAFFIC_WINDOWS, now),
            http_all_count: 0,
            http_2xx_count: 0,
            http_3xx_count: 0,
            http_4xx_count: 0,
            http_5xx_count: 0,
            avg_response_l1_time: 0.0,
            avg_response_l10_time: 0.0,
            avg_response_l60_time: 0.0,
            event_l1_rate: 0,
            event_l10_rate: 0,
            event_l60_rate: 0,
            last_access: None,
        }
    }

    /// Record one completed request. Returns false (and records nothing) for status
    /// codes outside of 200..=599: those only show up in the route statistics.
    pub fn record(&mut self, latency_nanos: u64, status_code: u16, now: DateTime<Utc>) -> bool {
        let class = match StatusClass::from_status_code(status_code) {
            Some(class) => class,
            None => return false,
        };
        self.latency.track(latency_nanos, now);
        self.http_all_count += 1;
        match class {
            StatusClass::Success => self.http_2xx_count += 1,
            StatusClass::Redirect => self.http_3xx_count += 1,
            StatusClass::ClientError => self.http_4xx_count += 1,
            StatusClass::ServerError => self.http_5xx_count += 1,
        }
        self.last_access = Some(self.last_access.map_or(now, |prev| prev.max(now)));
        true
    }

    /// Latency totals for window `level` (index into TRAFFIC_WINDOWS)
    pub fn window_totals(&self, level: usize, now: DateTime<Utc>) -> WindowTotals {
        self.latency.totals(level, now)
    }

    /// Materialize the derived rate and average fields from the windows
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        let totals: Vec<WindowTotals> = (0..TRAFFIC_WINDOWS.len())
            .map(|lvl| self.latency.totals(lvl, now))
            .collect();
        self.set_derived(&totals);
    }

    fn set_derived(&mut self, totals: &[WindowTotals]) {
        let avg = |lvl: usize| totals.get(lvl).map(|t| t.avg()).unwrap_or(0.0);
        let rate = |lvl: usize| {
            totals
                .get(lvl)
                .map(|t| rate_per_second(t.num_entries, TRAFFIC_WINDOWS[lvl]))
                .unwrap_or(0)
        };
        self.avg_response_l1_time = avg(0);
        self.avg_response_l10_time = avg(1);
        self.avg_response_l60_time = avg(2);
        self.event_l1_rate = rate(0);
        self.event_l10_rate = rate(1);
        self.event_l60_rate = rate(2);
    }

    /**
     * Sum up the traffic of several containers into one application total.
     *
     * Counters are added. The windows are merged bucket totals first and only then
     * turned into averages and rates, so a container with a single slow request can't
     * drag the application average around the way a mean of means would.
     */
    pub fn rollup<'a, I>(parts: I, now: DateTime<Utc>) -> TrafficStats
    where
        I: IntoIterator<Item = &'a TrafficStats>,
    {
        let mut total = TrafficStats::new(now);
        let mut totals = vec![WindowTotals::default(); TRAFFIC_WINDOWS.len()];
        for part in parts {
            total.http_all_count += part.http_all_count;
            total.http_2xx_count += part.http_2xx_count;
            total.http_3xx_count += part.http_3xx_count;
            total.http_4xx_count += part.http_4xx_count;
            total.http_5xx_count += part.http_5xx_count;
            total.last_access = match (total.last_access, part.last_access) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            for (lvl, t) in totals.iter_mut().enumerate() {
                t.merge(&part.latency.totals(lvl, now));
            }
        }
        total.set_derived(&totals);
        total
    }
}

impl Display for TrafficStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} requests (2xx: {} 3xx: {} 4xx: {} 5xx: {}); {}/{}/{} req/s; avg {}",
            self.http_all_count,
            self.http_2xx_count,
            self.http_3xx_count,
            self.http_4xx_count,
            self.http_5xx_count,
            self.event_l1_rate,
            self.event_l10_rate,
            self.event_l60_rate,
            pretty_print_si_units(Some(self.avg_response_l60_time / 1e9), "s"),
        )
    }
}
