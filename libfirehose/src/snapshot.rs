use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::RouteLimits,
    dispatcher::{lock_live, SharedLiveState},
    rate_counters::EventRateCounters,
    stats_graph::StatsGraph,
};

/// One published, fully finalized generation of the statistics graph
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Starts at 0 (the empty generation published at session start) and only
    /// ever grows
    pub generation: u64,
    pub taken_at: DateTime<Utc>,
    pub total_processed: u64,
    pub stats: StatsGraph,
}

/**
 * Produces generations from the live graph and publishes them.
 *
 * The live lock is held only while copying. Rates, staleness and roll-ups are
 * computed on the private copy afterwards, then the finished generation replaces
 * the displayed one in a single atomic swap, so readers only ever see complete
 * generations and never wait on the dispatcher.
 */
#[derive(Debug)]
pub struct SnapshotManager {
    live: SharedLiveState,
    counters: Arc<EventRateCounters>,
    displayed: ArcSwap<StatsSnapshot>,
    generation: AtomicU64,
    stale_threshold: chrono::Duration,
}

impl SnapshotManager {
    pub fn new(
        live: SharedLiveState,
        counters: Arc<EventRateCounters>,
        route_limits: RouteLimits,
        stale_threshold: chrono::Duration,
    ) -> SnapshotManager {
        SnapshotManager {
            live,
            counters,
            displayed: ArcSwap::from_pointee(Self::empty(route_limits, Utc::now())),
            generation: AtomicU64::new(0),
            stale_threshold,
        }
    }

    fn empty(route_limits: RouteLimits, now: DateTime<Utc>) -> StatsSnapshot {
        StatsSnapshot {
            generation: 0,
            taken_at: now,
            total_processed: 0,
            stats: StatsGraph::new(route_limits),
        }
    }

    /**
     * Copy the live graph and finalize the copy:
     * 1. materialize the windowed rates/averages of every TrafficStats and roll the
     *    container traffic up into the app's total
     * 2. drop containers that haven't reported for longer than the stale threshold
     * 3. recompute the app roll-ups that depend on which containers are present
     */
    pub fn clone_graph(&self, now: DateTime<Utc>) -> StatsGraph {
        let graph = lock_live(&self.live).graph.copy_for_snapshot();
        self.finalize(graph, now)
    }

    fn finalize(&self, mut graph: StatsGraph, now: DateTime<Utc>) -> StatsGraph {
        for app in graph.apps.values_mut() {
            app.finalize_traffic(now);
            app.evict_stale_containers(now, self.stale_threshold);
            app.recompute_rollups();
        }
        graph
    }

    /// Generations are handed out while holding the live lock, so their order is
    /// the order in which the copies (and resets) saw the live graph.
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn take_snapshot(&self) -> Arc<StatsSnapshot> {
        self.take_snapshot_with_time(Utc::now())
    }

    /// Build a new generation and publish it. Returns the displayed generation, which
    /// is a newer one if a concurrent publisher got there first.
    pub fn take_snapshot_with_time(&self, now: DateTime<Utc>) -> Arc<StatsSnapshot> {
        let (generation, total_processed, graph) = {
            let live = lock_live(&self.live);
            (
                self.next_generation(),
                self.counters.total_processed(),
                live.graph.copy_for_snapshot(),
            )
        };
        self.publish(StatsSnapshot {
            generation,
            taken_at: now,
            total_processed,
            stats: self.finalize(graph, now),
        })
    }

    /// Replace the displayed generation unless it is already newer than `snapshot`
    fn publish(&self, snapshot: StatsSnapshot) -> Arc<StatsSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.displayed.rcu(|current| {
            if current.generation > snapshot.generation {
                Arc::clone(current)
            } else {
                Arc::clone(&snapshot)
            }
        });
        self.displayed()
    }

    /// The most recently published generation
    pub fn displayed(&self) -> Arc<StatsSnapshot> {
        self.displayed.load_full()
    }

    /// Publish an empty generation, e.g., after the live graph was cleared. Copies
    /// taken before this call can no longer be published.
    pub fn reset(&self, now: DateTime<Utc>) {
        let (generation, limits) = {
            let live = lock_live(&self.live);
            (self.next_generation(), *live.graph.routes.limits())
        };
        self.publish(StatsSnapshot {
            generation,
            ..Self::empty(limits, now)
        });
    }
}
