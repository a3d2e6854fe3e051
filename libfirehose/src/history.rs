use std::{
    collections::VecDeque,
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard},
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use libfirehose_model::EventRate;
#[cfg(not(test))]
use log::{debug, warn};
use serde::Serialize;

#[cfg(test)]
use std::{println as debug, println as warn}; // Workaround to use prinltn! for logs.

use crate::{config::HistoryConfig, rate_counters::EventRateCounters};

/// Resolution tiers of the event rate history, finest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HistoryTier {
    Second,
    Minute,
    TenMinute,
    Hour,
    Day,
}

impl HistoryTier {
    pub const ALL: [HistoryTier; 5] = [
        HistoryTier::Second,
        HistoryTier::Minute,
        HistoryTier::TenMinute,
        HistoryTier::Hour,
        HistoryTier::Day,
    ];

    /// The next coarser tier; None for the terminal Day tier
    pub fn next(&self) -> Option<HistoryTier> {
        use HistoryTier::*;
        match self {
            Second => Some(Minute),
            Minute => Some(TenMinute),
            TenMinute => Some(Hour),
            Hour => Some(Day),
            Day => None,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl Display for HistoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use HistoryTier::*;
        let s = match self {
            Second => "second",
            Minute => "minute",
            TenMinute => "ten-minute",
            Hour => "hour",
            Day => "day",
        };
        write!(f, "{}", s)
    }
}

/**
 * Event rate history in the manner of a round-robin database: every tier holds a
 * bounded number of records, and when a tier overflows its oldest half is merged
 * into a single record of the next coarser tier. Storage stays bounded while the
 * resolution drops with age. The Day tier is never consolidated.
 *
 * Each tick costs O(1) amortized: a tier is only looked at when the tier below it
 * actually overflowed.
 */
#[derive(Clone, Debug)]
pub struct EventRateHistory {
    tiers: [VecDeque<EventRate>; 5],
    /// Max records per tier; None means unbounded
    caps: [Option<usize>; 5],
    last_tick: DateTime<Utc>,
}

impl EventRateHistory {
    pub fn new(config: &HistoryConfig, now: DateTime<Utc>) -> EventRateHistory {
        EventRateHistory {
            tiers: Default::default(),
            caps: [
                Some(config.second),
                Some(config.minute),
                Some(config.ten_minute),
                Some(config.hour),
                None,
            ],
            last_tick: now,
        }
    }

    /// Take the event counts accumulated since the last tick as a new record
    pub fn tick(&mut self, counters: &EventRateCounters, now: DateTime<Utc>) {
        let begin = self.last_tick.min(now);
        let counts = counters.take_interval();
        self.record(EventRate::from_counts(
            begin,
            now,
            counts.total,
            &counts.per_type_pairs(),
        ));
        self.last_tick = now;
    }

    /// Append a finest-resolution record and consolidate overflowing tiers
    pub fn record(&mut self, rate: EventRate) {
        self.tiers[HistoryTier::Second.index()].push_back(rate);
        let mut tier = HistoryTier::Second;
        while let Some(next) = tier.next() {
            match self.consolidate(tier) {
                Some(merged) => {
                    debug!(
                        "Consolidated {} records of the {} history into one {} record",
                        self.caps[tier.index()].unwrap_or_default() / 2,
                        tier,
                        next
                    );
                    self.tiers[next.index()].push_back(merged);
                    tier = next;
                }
                None => break,
            }
        }
    }

    /// If `tier` is over its cap, remove its oldest half and return it merged. The
    /// newest half is kept; anything in between is dropped.
    fn consolidate(&mut self, tier: HistoryTier) -> Option<EventRate> {
        let cap = self.caps[tier.index()]?;
        let records = &mut self.tiers[tier.index()];
        if records.len() <= cap {
            return None;
        }
        let half = cap / 2;
        let oldest: Vec<EventRate> = records.drain(..half).collect();
        let excess = records.len().saturating_sub(half);
        records.drain(..excess);
        let merged = EventRate::merge(&oldest);
        if merged.is_none() {
            warn!("History tier {} overflowed with nothing to merge", tier);
        }
        merged
    }

    pub fn tier(&self, tier: HistoryTier) -> &VecDeque<EventRate> {
        &self.tiers[tier.index()]
    }

    /// The whole history, oldest (coarsest) first
    pub fn ordered(&self) -> Vec<EventRate> {
        HistoryTier::ALL
            .iter()
            .rev()
            .flat_map(|t| self.tiers[t.index()].iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self, now: DateTime<Utc>) {
        for t in self.tiers.iter_mut() {
            t.clear();
        }
        self.last_tick = now;
    }
}

fn lock_history(history: &Mutex<EventRateHistory>) -> MutexGuard<'_, EventRateHistory> {
    history.lock().unwrap_or_else(|poisoned| {
        warn!("History lock was poisoned; continuing with its current state");
        poisoned.into_inner()
    })
}

/**
 * Drives the history from the dispatcher's event counters and publishes the
 * ordered record sequence for readers. Never touches the statistics graph.
 */
#[derive(Debug)]
pub struct HistoryRecorder {
    history: Mutex<EventRateHistory>,
    counters: Arc<EventRateCounters>,
    published: ArcSwap<Vec<EventRate>>,
}

impl HistoryRecorder {
    pub fn new(
        config: &HistoryConfig,
        counters: Arc<EventRateCounters>,
        now: DateTime<Utc>,
    ) -> HistoryRecorder {
        HistoryRecorder {
            history: Mutex::new(EventRateHistory::new(config, now)),
            counters,
            published: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn tick(&self) -> Arc<Vec<EventRate>> {
        self.tick_with_time(Utc::now())
    }

    pub fn tick_with_time(&self, now: DateTime<Utc>) -> Arc<Vec<EventRate>> {
        let ordered = {
            let mut history = lock_history(&self.history);
            history.tick(&self.counters, now);
            history.ordered()
        };
        let ordered = Arc::new(ordered);
        self.published.store(Arc::clone(&ordered));
        ordered
    }

    /// The most recently published history, oldest first
    pub fn displayed(&self) -> Arc<Vec<EventRate>> {
        self.published.load_full()
    }

    /// Number of records per tier, finest first
    pub fn tier_lengths(&self) -> [usize; 5] {
        let history = lock_history(&self.history);
        HistoryTier::ALL.map(|t| history.tier(t).len())
    }

    pub fn clear(&self, now: DateTime<Utc>) {
        lock_history(&self.history).clear(now);
        self.published.store(Arc::new(Vec::new()));
    }
}
