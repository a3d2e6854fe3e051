use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use common::rate_limit::SimpleRateLimiter;
use libfirehose_model::{
    app_stats::ContainerMetricSample,
    cell_stats::CellField,
    envelope::{ContainerMetric, CounterEvent, HttpStartStop, LogMessage, ValueMetric},
    Envelope, Event, EventError,
};
#[cfg(not(test))]
use log::{debug, warn};
use tokio::time::Duration;

#[cfg(test)]
use std::{println as debug, println as warn}; // Workaround to use prinltn! for logs.

use crate::{
    config::StatsConfig,
    log_source::{parse_crash_report, policy_for_source, LogSourcePolicy},
    rate_counters::EventRateCounters,
    route_tracker::RouteError,
    stats_graph::{StatsGraph, StreamId},
};

/// Counter events through which the platform reports firehose messages it dropped
pub const DROPPED_MESSAGE_COUNTERS: [&str; 3] = [
    "TruncatingBuffer.DroppedMessages",
    "doppler_proxy.slow_consumer",
    "DopplerServer.TruncatingBuffer.totalDroppedMessages",
];

/// Per-event diagnostics are logged at most this often (per kind)
const DIAGNOSTIC_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Diagnostics {
    malformed: SimpleRateLimiter,
    route_errors: SimpleRateLimiter,
    cardinality: SimpleRateLimiter,
    dropped_messages: SimpleRateLimiter,
}

impl Diagnostics {
    fn new() -> Diagnostics {
        Diagnostics {
            malformed: SimpleRateLimiter::new(DIAGNOSTIC_LOG_INTERVAL),
            route_errors: SimpleRateLimiter::new(DIAGNOSTIC_LOG_INTERVAL),
            cardinality: SimpleRateLimiter::new(DIAGNOSTIC_LOG_INTERVAL),
            dropped_messages: SimpleRateLimiter::new(DIAGNOSTIC_LOG_INTERVAL),
        }
    }
}

/// Everything guarded by the live lock
#[derive(Debug)]
pub struct LiveState {
    pub graph: StatsGraph,
    diagnostics: Diagnostics,
}

impl LiveState {
    pub fn new(graph: StatsGraph) -> LiveState {
        LiveState {
            graph,
            diagnostics: Diagnostics::new(),
        }
    }
}

pub type SharedLiveState = Arc<Mutex<LiveState>>;

/// Lock the live state. A panic while holding the lock must not stop the session,
/// so a poisoned lock is simply taken over.
pub fn lock_live(live: &Mutex<LiveState>) -> MutexGuard<'_, LiveState> {
    live.lock().unwrap_or_else(|poisoned| {
        warn!("Live statistics lock was poisoned; continuing with its current state");
        poisoned.into_inner()
    })
}

/**
 * The ingestion dispatcher: applies one envelope at a time to the live statistics
 * graph.
 *
 * Cheap to clone; every firehose stream's ingest task gets its own clone. The lock is
 * held for exactly one envelope. Nothing in here blocks or does I/O, and nothing
 * ever fails the caller: bad events are counted in `IngestCounters` and dropped.
 */
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    live: SharedLiveState,
    counters: Arc<EventRateCounters>,
    route_tracking_enabled: bool,
    max_crash_records: usize,
    max_instance_index: usize,
}

impl EventDispatcher {
    pub fn new(config: &StatsConfig) -> EventDispatcher {
        EventDispatcher {
            live: Arc::new(Mutex::new(LiveState::new(StatsGraph::new(
                config.route_limits,
            )))),
            counters: Arc::new(EventRateCounters::new()),
            route_tracking_enabled: config.route_tracking_enabled,
            max_crash_records: config.max_crash_records,
            max_instance_index: config.max_instance_index,
        }
    }

    pub fn live_state(&self) -> &SharedLiveState {
        &self.live
    }

    pub fn counters(&self) -> &Arc<EventRateCounters> {
        &self.counters
    }

    /// Run `f` with the live graph locked, e.g., to register routes
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut StatsGraph) -> R) -> R {
        f(&mut lock_live(&self.live).graph)
    }

    /// Reset the live graph and the event counters
    pub fn clear(&self) {
        lock_live(&self.live).graph.clear();
        self.counters.reset();
    }

    pub fn process(&self, stream_id: StreamId, env: &Envelope) {
        self.process_with_time(stream_id, env, Utc::now())
    }

    pub fn process_with_time(&self, stream_id: StreamId, env: &Envelope, now: DateTime<Utc>) {
        self.counters.record(env.event_type());
        let mut guard = lock_live(&self.live);
        let state = &mut *guard;
        *state
            .graph
            .ingest
            .processed_by_stream
            .entry(stream_id)
            .or_insert(0) += 1;
        let res = match &env.event {
            Event::HttpStartStop(http) => self.handle_http(state, http, now),
            Event::ContainerMetric(metric) => self.handle_container_metric(state, env, metric, now),
            Event::LogMessage(log) => self.handle_log(state, env, log, now),
            Event::ValueMetric(gauge) => self.handle_value_metric(state, env, gauge, now),
            Event::CounterEvent(counter) => self.handle_counter(state, env, counter),
            Event::Unknown => {
                state.graph.ingest.unknown_events += 1;
                Ok(())
            }
        };
        if let Err(e) = res {
            state.graph.ingest.malformed_events += 1;
            if let Some(suppressed) = state.diagnostics.malformed.check_update_with_suppressed() {
                debug!(
                    "Dropping malformed {} event from stream {} (origin {}): {} ({} similar suppressed)",
                    env.event_type(),
                    stream_id,
                    env.origin,
                    e,
                    suppressed
                );
            }
        }
    }

    /// Containers live in index-addressed vectors; refuse indexes that would blow them up
    fn check_instance_index(&self, instance_index: usize) -> Result<usize, EventError> {
        if instance_index > self.max_instance_index {
            return Err(EventError::InvalidField {
                field: "instance_index",
                value: instance_index.to_string(),
            });
        }
        Ok(instance_index)
    }

    fn handle_http(
        &self,
        state: &mut LiveState,
        http: &HttpStartStop,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        if !http.is_client_observed() {
            state.graph.ingest.server_leg_http_skipped += 1;
            return Ok(());
        }
        // Route attribution first and independent of the app-level accounting: a bad
        // URI must not cost us the app counters, a missing app id must not cost us the
        // route counters.
        if self.route_tracking_enabled {
            let app_id = http.application_id.as_deref().unwrap_or_default();
            match state.graph.routes.track_http(http, app_id, now) {
                Ok(0) => (),
                Ok(rejected) => {
                    state.graph.ingest.route_keys_rejected += rejected as u64;
                    if let Some(suppressed) =
                        state.diagnostics.cardinality.check_update_with_suppressed()
                    {
                        debug!(
                            "User agent/forwarder cap reached for {} ({} similar suppressed)",
                            http.uri, suppressed
                        );
                    }
                }
                Err(e) => {
                    let ingest = &mut state.graph.ingest;
                    match &e {
                        RouteError::DomainLimit { .. } => ingest.route_domain_rejected += 1,
                        RouteError::HostLimit { .. } => ingest.route_host_rejected += 1,
                        RouteError::UriParse { .. } => ingest.route_parse_failures += 1,
                    }
                    if let Some(suppressed) =
                        state.diagnostics.route_errors.check_update_with_suppressed()
                    {
                        warn!("Not tracking route: {} ({} similar suppressed)", e, suppressed);
                    }
                }
            }
        }
        let app_id = http.app_id()?;
        let instance_index = self.check_instance_index(http.instance_index()?)?;
        let recorded = state
            .graph
            .app_mut(app_id, now)
            .traffic_mut(instance_index, now)
            .record(http.latency_nanos(), http.status_code, now);
        if !recorded {
            state.graph.ingest.http_status_out_of_range += 1;
        }
        Ok(())
    }

    fn handle_container_metric(
        &self,
        state: &mut LiveState,
        env: &Envelope,
        metric: &ContainerMetric,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        let app_id = metric.app_id()?;
        let instance_index = self.check_instance_index(metric.instance_index()?)?;
        let sample = ContainerMetricSample {
            cpu_percentage: metric.cpu_percentage,
            memory_bytes: metric.memory_bytes,
            disk_bytes: metric.disk_bytes,
            memory_bytes_quota: metric.memory_bytes_quota,
            disk_bytes_quota: metric.disk_bytes_quota,
        };
        let cell_ip = Some(env.ip.clone()).filter(|ip| !ip.is_empty());
        state
            .graph
            .app_mut(app_id, now)
            .container_mut(instance_index, now)
            .update_metric(sample, cell_ip, now);
        Ok(())
    }

    fn handle_log(
        &self,
        state: &mut LiveState,
        env: &Envelope,
        log: &LogMessage,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        match policy_for_source(&log.source_type) {
            LogSourcePolicy::Ignore => {
                state.graph.ingest.ignored_log_lines += 1;
            }
            LogSourcePolicy::Container => {
                let app_id = log.app_id()?;
                let instance_index = self.check_instance_index(log.source_instance_index()?)?;
                state
                    .graph
                    .app_mut(app_id, now)
                    .container_mut(instance_index, now)
                    .record_log(log.message_type);
            }
            LogSourcePolicy::NonContainer => {
                let app_id = log.app_id()?;
                state
                    .graph
                    .app_mut(app_id, now)
                    .record_non_container_log(log.message_type);
            }
            LogSourcePolicy::CrashReport => {
                let crash = parse_crash_report(&log.message, env.timestamp.unwrap_or(now));
                let app_id = match (log.app_id(), &crash) {
                    (Ok(app_id), _) => app_id,
                    (Err(_), Some(crash)) => crash.app_id.as_str(),
                    (Err(e), None) => return Err(e),
                };
                let app = state.graph.app_mut(app_id, now);
                app.record_non_container_log(log.message_type);
                if let Some(crash) = crash {
                    app.add_crash(crash.record, self.max_crash_records);
                }
            }
        }
        Ok(())
    }

    fn handle_value_metric(
        &self,
        state: &mut LiveState,
        env: &Envelope,
        gauge: &ValueMetric,
        now: DateTime<Utc>,
    ) -> Result<(), EventError> {
        if CellField::from_metric_name(&gauge.name).is_none() {
            state.graph.ingest.unknown_gauges += 1;
            return Ok(());
        }
        if env.ip.is_empty() {
            return Err(EventError::MissingField("ip"));
        }
        let cell = state.graph.cell_mut(&env.ip);
        cell.update_identity(&env.deployment, &env.job, &env.index);
        cell.update_gauge(&gauge.name, gauge.value, &gauge.unit, now);
        Ok(())
    }

    fn handle_counter(
        &self,
        state: &mut LiveState,
        env: &Envelope,
        counter: &CounterEvent,
    ) -> Result<(), EventError> {
        if !DROPPED_MESSAGE_COUNTERS.contains(&counter.name.as_str()) {
            state.graph.ingest.ignored_counters += 1;
            return Ok(());
        }
        state.graph.ingest.dropped_messages =
            state.graph.ingest.dropped_messages.saturating_add(counter.delta);
        if let Some(suppressed) = state
            .diagnostics
            .dropped_messages
            .check_update_with_suppressed()
        {
            warn!(
                "Firehose is dropping messages: {} reports {} dropped ({} total so far, {} similar warnings suppressed)",
                env.origin, counter.delta, state.graph.ingest.dropped_messages, suppressed
            );
        }
        Ok(())
    }
}
