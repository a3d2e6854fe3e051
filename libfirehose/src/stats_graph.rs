use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use libfirehose_model::{AppStats, CellStats};
use serde::Serialize;

use crate::{config::RouteLimits, route_tracker::RouteTracker};

/// Identifies one firehose subscriber feeding the session
pub type StreamId = u32;

/// Diagnostics about what the dispatcher did with the events it saw
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounters {
    pub processed_by_stream: BTreeMap<StreamId, u64>,
    /// Events missing a required identifier (or with an unusable one)
    pub malformed_events: u64,
    /// Event kinds we don't handle
    pub unknown_events: u64,
    /// HTTP events from the backend leg; the client leg is counted instead
    pub server_leg_http_skipped: u64,
    /// HTTP events with a status code outside of 200..=599 (route stats only)
    pub http_status_out_of_range: u64,
    pub route_domain_rejected: u64,
    pub route_host_rejected: u64,
    pub route_parse_failures: u64,
    /// User agent / forwarder keys refused by their caps
    pub route_keys_rejected: u64,
    pub ignored_log_lines: u64,
    pub unknown_gauges: u64,
    pub ignored_counters: u64,
    /// Sum of the deltas of the platform's dropped-message counters
    pub dropped_messages: u64,
}

/**
 * The whole statistics graph of a session: apps, cells and routes plus ingest
 * diagnostics.
 *
 * The live graph is owned by the dispatcher (behind its lock). Snapshots are
 * copies made with `copy_for_snapshot()` which are then finalized and never
 * mutated again.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsGraph {
    pub apps: HashMap<String, AppStats>,
    /// Keyed by the cell's IP
    pub cells: HashMap<String, CellStats>,
    pub routes: RouteTracker,
    pub ingest: IngestCounters,
}

impl StatsGraph {
    pub fn new(route_limits: RouteLimits) -> StatsGraph {
        StatsGraph {
            apps: HashMap::new(),
            cells: HashMap::new(),
            routes: RouteTracker::new(route_limits),
            ingest: IngestCounters::default(),
        }
    }

    /// Get or create an app
    pub fn app_mut(&mut self, app_id: &str, now: DateTime<Utc>) -> &mut AppStats {
        self.apps
            .entry(app_id.to_string())
            .or_insert_with(|| AppStats::new(app_id, now))
    }

    /// Get or create a cell
    pub fn cell_mut(&mut self, ip: &str) -> &mut CellStats {
        self.cells
            .entry(ip.to_string())
            .or_insert_with(|| CellStats::new(ip))
    }

    /**
     * Copy the graph, entity by entity. This is the only thing that runs under the
     * live lock when a snapshot is taken, so it must not do anything but copy:
     * rates, roll-ups and staleness are computed on the copy afterwards.
     */
    pub fn copy_for_snapshot(&self) -> StatsGraph {
        StatsGraph {
            apps: self
                .apps
                .iter()
                .map(|(id, app)| (id.clone(), app.clone()))
                .collect(),
            cells: self
                .cells
                .iter()
                .map(|(ip, cell)| (ip.clone(), cell.clone()))
                .collect(),
            routes: self.routes.clone(),
            ingest: self.ingest.clone(),
        }
    }

    /// Explicit reset: forget everything (routes included), keep the limits
    pub fn clear(&mut self) {
        self.apps.clear();
        self.cells.clear();
        self.routes.clear();
        self.ingest = IngestCounters::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use libfirehose_model::LogMessageType;

    #[test]
    fn test_get_or_create() {
        let now = Utc::now();
        let mut graph = StatsGraph::new(RouteLimits::default());
        graph
            .app_mut("app-1", now)
            .record_non_container_log(LogMessageType::Out);
        graph
            .app_mut("app-1", now)
            .record_non_container_log(LogMessageType::Out);
        graph.cell_mut("10.0.0.1").num_cpus = 4;
        assert_eq!(graph.apps.len(), 1);
        assert_eq!(graph.apps["app-1"].non_container_out_count, 2);
        assert_eq!(graph.cell_mut("10.0.0.1").num_cpus, 4);

        let copy = graph.copy_for_snapshot();
        assert_eq!(copy, graph);

        graph.clear();
        assert!(graph.apps.is_empty());
        assert!(graph.cells.is_empty());
        assert_ne!(copy, graph);
    }
}
