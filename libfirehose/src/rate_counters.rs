use std::sync::atomic::{AtomicU64, Ordering};

use libfirehose_model::EventType;

/// Event counts since the last `take_interval()`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntervalCounts {
    pub total: u64,
    pub per_type: [u64; EventType::ALL.len()],
}

impl IntervalCounts {
    pub fn per_type_pairs(&self) -> Vec<(EventType, u64)> {
        EventType::ALL
            .iter()
            .map(|t| (*t, self.per_type[t.index()]))
            .collect()
    }
}

/**
 * Lock-free event counters written by the dispatcher and drained once per history
 * tick. They live outside of the statistics graph so the history task never has to
 * take the graph's lock.
 */
#[derive(Debug, Default)]
pub struct EventRateCounters {
    total_processed: AtomicU64,
    interval_total: AtomicU64,
    interval_per_type: [AtomicU64; EventType::ALL.len()],
}

impl EventRateCounters {
    pub fn new() -> EventRateCounters {
        EventRateCounters::default()
    }

    pub fn record(&self, event_type: EventType) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.interval_total.fetch_add(1, Ordering::Relaxed);
        self.interval_per_type[event_type.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Events processed since the session started (or was cleared)
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    /// Return and reset the counts of the current interval
    pub fn take_interval(&self) -> IntervalCounts {
        let mut counts = IntervalCounts {
            total: self.interval_total.swap(0, Ordering::Relaxed),
            ..Default::default()
        };
        for (i, c) in self.interval_per_type.iter().enumerate() {
            counts.per_type[i] = c.swap(0, Ordering::Relaxed);
        }
        counts
    }

    pub fn reset(&self) {
        self.total_processed.store(0, Ordering::Relaxed);
        self.take_interval();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_take_interval() {
        let counters = EventRateCounters::new();
        counters.record(EventType::HttpStartStop);
        counters.record(EventType::HttpStartStop);
        counters.record(EventType::Other);
        let counts = counters.take_interval();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.per_type[EventType::HttpStartStop.index()], 2);
        assert_eq!(counts.per_type[EventType::Other.index()], 1);
        assert_eq!(
            counts.per_type_pairs()[EventType::LogMessage.index()],
            (EventType::LogMessage, 0)
        );

        // next interval starts from scratch, the total keeps going
        counters.record(EventType::LogMessage);
        assert_eq!(counters.take_interval().total, 1);
        assert_eq!(counters.total_processed(), 4);

        counters.reset();
        assert_eq!(counters.total_processed(), 0);
        assert_eq!(counters.take_interval(), IntervalCounts::default());
    }
}
