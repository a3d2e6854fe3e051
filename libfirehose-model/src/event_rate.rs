use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::EventType;

/// Highest and lowest rate (events/second) seen over a record's time span
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRange {
    pub high: u64,
    pub low: u64,
}

impl RateRange {
    pub fn new(rate: u64) -> RateRange {
        RateRange {
            high: rate,
            low: rate,
        }
    }

    fn merge(&mut self, other: &RateRange) {
        self.high = self.high.max(other.high);
        self.low = self.low.min(other.low);
    }
}

/**
 * One history record: event rates between `begin` and `end`.
 *
 * Freshly recorded (second resolution) records have `high == low`. Records created
 * by consolidation carry the highest and lowest rates of the records they replace.
 */
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRate {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total: RateRange,
    pub per_type: BTreeMap<EventType, RateRange>,
}

/// `count` events in `[begin, end)` as events per second. Intervals shorter than a
/// second count as a full second.
fn normalize(count: u64, begin: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let elapsed_ms = (end - begin).num_milliseconds();
    if elapsed_ms <= 1000 {
        count
    } else {
        ((count as u128 * 1000) / elapsed_ms as u128) as u64
    }
}

impl EventRate {
    /// Build a record from raw event counts for the interval `[begin, end)`
    pub fn from_counts(
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        total: u64,
        per_type: &[(EventType, u64)],
    ) -> EventRate {
        EventRate {
            begin,
            end,
            total: RateRange::new(normalize(total, begin, end)),
            per_type: per_type
                .iter()
                .map(|(t, cnt)| (*t, RateRange::new(normalize(*cnt, begin, end))))
                .collect(),
        }
    }

    pub fn total_high(&self) -> u64 {
        self.total.high
    }

    pub fn total_low(&self) -> u64 {
        self.total.low
    }

    /// Rate range for one event type; types a record never saw had a rate of zero
    pub fn type_rate(&self, event_type: EventType) -> RateRange {
        self.per_type.get(&event_type).copied().unwrap_or_default()
    }

    /**
     * Merge consecutive records into one coarser record spanning from the first's
     * `begin` to the last's `end`. High fields take the maximum, low fields the
     * minimum. Returns None for an empty slice.
     */
    pub fn merge(records: &[EventRate]) -> Option<EventRate> {
        let (first, rest) = records.split_first()?;
        let mut merged = first.clone();
        // a type missing from some record counts as rate zero there
        for t in EventType::ALL {
            if records.iter().any(|r| r.per_type.contains_key(&t)) {
                let mut range = first.type_rate(t);
                for r in rest {
                    range.merge(&r.type_rate(t));
                }
                merged.per_type.insert(t, range);
            }
        }
        for r in rest {
            merged.total.merge(&r.total);
            merged.begin = merged.begin.min(r.begin);
            merged.end = merged.end.max(r.end);
        }
        Some(merged)
    }
}
