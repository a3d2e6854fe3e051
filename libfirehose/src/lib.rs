pub mod config;
pub mod dispatcher;
pub mod history;
pub mod log_source;
pub mod rate_counters;
pub mod route_tracker;
pub mod session;
pub mod snapshot;
pub mod stats_graph;

// reshare the commonly used identifiers in this namespace
pub use config::{ConfigError, HistoryConfig, RouteLimits, StatsConfig};
pub use dispatcher::EventDispatcher;
pub use history::{EventRateHistory, HistoryRecorder, HistoryTier};
pub use route_tracker::{RouteError, RouteSummary, RouteTracker};
pub use session::FirehoseSession;
pub use snapshot::{SnapshotManager, StatsSnapshot};
pub use stats_graph::{IngestCounters, StatsGraph, StreamId};
