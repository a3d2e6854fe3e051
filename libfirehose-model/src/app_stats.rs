use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{envelope::LogMessageType, traffic_stats::TrafficStats};

/// The last resource sample a container reported
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContainerMetricSample {
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub memory_bytes_quota: u64,
    pub disk_bytes_quota: u64,
}

/// One container instance of an application
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContainerStats {
    pub instance_index: usize,
    /// None until the first container metric arrives (e.g., we only saw its logs)
    pub metric: Option<ContainerMetricSample>,
    /// Time of the last metric sample, or of creation if there was none yet
    pub last_update: DateTime<Utc>,
    /// The cell the last metric came from
    pub cell_ip: Option<String>,
    pub out_count: u64,
    pub err_count: u64,
}

impl ContainerStats {
    pub fn new(instance_index: usize, now: DateTime<Utc>) -> ContainerStats {
        ContainerStats {
            instance_index,
            metric: None,
            last_update: now,
            cell_ip: None,
            out_count: 0,
            err_count: 0,
        }
    }

    pub fn update_metric(
        &mut self,
        sample: ContainerMetricSample,
        cell_ip: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.metric = Some(sample);
        if cell_ip.is_some() {
            self.cell_ip = cell_ip;
        }
        self.last_update = self.last_update.max(now);
    }

    pub fn record_log(&mut self, message_type: LogMessageType) {
        match message_type {
            LogMessageType::Out => self.out_count += 1,
            LogMessageType::Err => self.err_count += 1,
        }
    }

    /// A container is stale once its last update is strictly older than `threshold`
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_update > threshold
    }

    pub fn log_count(&self) -> u64 {
        self.out_count + self.err_count
    }
}

/// A container exit reported by the platform's API
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrashRecord {
    pub instance_index: i64,
    pub crash_time: DateTime<Utc>,
    pub exit_description: String,
}

/**
 * All statistics for one application, keyed by its GUID.
 *
 * Containers and their traffic live in index-addressed sparse vectors that grow to the
 * highest instance index seen. They only shrink on an explicit reset of the whole graph.
 *
 * The fields below `crash_count` are roll-ups that are only valid in a snapshot.
 */
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppStats {
    pub app_id: String,
    pub containers: Vec<Option<ContainerStats>>,
    pub container_traffic: Vec<Option<TrafficStats>>,
    /// Sum of all `container_traffic` entries
    pub total_traffic: TrafficStats,
    /// Log lines from staging and other platform components
    pub non_container_out_count: u64,
    pub non_container_err_count: u64,
    /// Most recent crashes, oldest first
    pub crashes: VecDeque<CrashRecord>,
    /// All crashes ever seen, including those no longer in `crashes`
    pub crash_count: u64,

    pub total_cpu_percentage: f64,
    pub total_memory_bytes: u64,
    pub total_disk_bytes: u64,
    /// Containers that are not stale and have reported a metric
    pub reporting_containers: usize,
    /// Container plus non-container log lines
    pub total_log_count: u64,
}

fn slot_mut<T>(v: &mut Vec<Option<T>>, idx: usize, create: impl FnOnce() -> T) -> &mut T {
    if v.len() <= idx {
        v.resize_with(idx + 1, || None);
    }
    v[idx].get_or_insert_with(create)
}

impl AppStats {
    pub fn new(app_id: &str, now: DateTime<Utc>) -> AppStats {
        AppStats {
            app_id: app_id.to_string(),
            containers: Vec::new(),
            container_traffic: Vec::new(),
            total_traffic: TrafficStats::new(now),
            non_container_out_count: 0,
            non_container_err_count: 0,
            crashes: VecDeque::new(),
            crash_count: 0,
            total_cpu_percentage: 0.0,
            total_memory_bytes: 0,
            total_disk_bytes: 0,
            reporting_containers: 0,
            total_log_count: 0,
        }
    }

    /// Get or create the container with the given instance index
    pub fn container_mut(&mut self, instance_index: usize, now: DateTime<Utc>) -> &mut ContainerStats {
        slot_mut(&mut self.containers, instance_index, || {
            ContainerStats::new(instance_index, now)
        })
    }

    pub fn container(&self, instance_index: usize) -> Option<&ContainerStats> {
        self.containers.get(instance_index).and_then(|c| c.as_ref())
    }

    /// Get or create the traffic stats of the given instance index
    pub fn traffic_mut(&mut self, instance_index: usize, now: DateTime<Utc>) -> &mut TrafficStats {
        slot_mut(&mut self.container_traffic, instance_index, || {
            TrafficStats::new(now)
        })
    }

    pub fn traffic(&self, instance_index: usize) -> Option<&TrafficStats> {
        self.container_traffic
            .get(instance_index)
            .and_then(|t| t.as_ref())
    }

    pub fn live_containers(&self) -> impl Iterator<Item = &ContainerStats> {
        self.containers.iter().flatten()
    }

    pub fn record_non_container_log(&mut self, message_type: LogMessageType) {
        match message_type {
            LogMessageType::Out => self.non_container_out_count += 1,
            LogMessageType::Err => self.non_container_err_count += 1,
        }
    }

    /// Remember a crash, dropping the oldest record once there are `max_records`
    pub fn add_crash(&mut self, record: CrashRecord, max_records: usize) {
        self.crash_count += 1;
        if max_records == 0 {
            return;
        }
        while self.crashes.len() >= max_records {
            self.crashes.pop_front();
        }
        self.crashes.push_back(record);
    }

    /// Compute every TrafficStats' derived fields and sum them up into `total_traffic`
    pub fn finalize_traffic(&mut self, now: DateTime<Utc>) {
        for t in self.container_traffic.iter_mut().flatten() {
            t.finalize(now);
        }
        self.total_traffic = TrafficStats::rollup(self.container_traffic.iter().flatten(), now);
    }

    /// Drop containers whose last update is older than `threshold` from this copy.
    /// Returns the number of containers dropped.
    pub fn evict_stale_containers(&mut self, now: DateTime<Utc>, threshold: chrono::Duration) -> usize {
        let mut evicted = 0;
        for slot in self.containers.iter_mut() {
            if slot.as_ref().is_some_and(|c| c.is_stale(now, threshold)) {
                *slot = None;
                evicted += 1;
            }
        }
        evicted
    }

    /// Recompute the roll-ups that depend on which containers are present
    pub fn recompute_rollups(&mut self) {
        let mut cpu = 0.0;
        let mut mem = 0;
        let mut disk = 0;
        let mut reporting = 0;
        let mut logs = self.non_container_out_count + self.non_container_err_count;
        for c in self.containers.iter().flatten() {
            logs += c.log_count();
            if let Some(m) = &c.metric {
                cpu += m.cpu_percentage;
                mem += m.memory_bytes;
                disk += m.disk_bytes;
                reporting += 1;
            }
        }
        self.total_cpu_percentage = cpu;
        self.total_memory_bytes = mem;
        self.total_disk_bytes = disk;
        self.reporting_containers = reporting;
        self.total_log_count = logs;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration as ChronoDuration;

    fn sample(cpu: f64, mem: u64) -> ContainerMetricSample {
        ContainerMetricSample {
            cpu_percentage: cpu,
            memory_bytes: mem,
            disk_bytes: 2 * mem,
            ..Default::default()
        }
    }

    #[test]
    fn test_sparse_containers() {
        let t0 = Utc::now();
        let mut app = AppStats::new("app-1", t0);
        app.container_mut(3, t0).record_log(LogMessageType::Out);
        assert_eq!(app.containers.len(), 4);
        assert!(app.container(0).is_none());
        assert_eq!(app.container(3).unwrap().out_count, 1);
        // lower indices don't shrink the vector
        app.container_mut(1, t0).record_log(LogMessageType::Err);
        assert_eq!(app.containers.len(), 4);
        assert_eq!(app.live_containers().count(), 2);
        assert_eq!(app.live_containers().next().unwrap().instance_index, 1);
    }

    #[test]
    fn test_staleness() {
        let t0 = Utc::now();
        let threshold = ChronoDuration::seconds(80);
        let mut c = ContainerStats::new(0, t0);
        c.update_metric(sample(1.0, 10), Some("10.0.0.1".to_string()), t0);
        assert!(!c.is_stale(t0 + ChronoDuration::seconds(80), threshold));
        assert!(c.is_stale(t0 + ChronoDuration::seconds(81), threshold));
        // time going backwards never moves last_update back
        c.update_metric(sample(2.0, 10), None, t0 - ChronoDuration::seconds(5));
        assert_eq!(c.last_update, t0);
        assert_eq!(c.cell_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_rollups() {
        let t0 = Utc::now();
        let mut app = AppStats::new("app-1", t0);
        app.container_mut(0, t0).update_metric(sample(10.0, 100), None, t0);
        app.container_mut(2, t0).update_metric(sample(5.5, 50), None, t0);
        // log-only container: present but not reporting
        app.container_mut(1, t0).record_log(LogMessageType::Out);
        app.record_non_container_log(LogMessageType::Err);
        app.recompute_rollups();
        assert_relative_eq!(app.total_cpu_percentage, 15.5);
        assert_eq!(app.total_memory_bytes, 150);
        assert_eq!(app.total_disk_bytes, 300);
        assert_eq!(app.reporting_containers, 2);
        assert_eq!(app.total_log_count, 2);

        let later = t0 + ChronoDuration::seconds(100);
        app.container_mut(2, later).update_metric(sample(5.5, 50), None, later);
        assert_eq!(app.evict_stale_containers(later, ChronoDuration::seconds(80)), 2);
        app.recompute_rollups();
        assert_eq!(app.reporting_containers, 1);
        assert_eq!(app.total_memory_bytes, 50);
        // the non-container line survives, the log-only container is gone
        assert_eq!(app.total_log_count, 1);
    }

    #[test]
    fn test_crash_records_bounded() {
        let t0 = Utc::now();
        let mut app = AppStats::new("app-1", t0);
        for i in 0..5 {
            app.add_crash(
                CrashRecord {
                    instance_index: i,
                    crash_time: t0,
                    exit_description: "out of memory".to_string(),
                },
                3,
            );
        }
        assert_eq!(app.crash_count, 5);
        assert_eq!(
            app.crashes.iter().map(|c| c.instance_index).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn test_finalize_traffic() {
        let t0 = Utc::now();
        let mut app = AppStats::new("app-1", t0);
        app.traffic_mut(0, t0).record(100, 200, t0);
        app.traffic_mut(4, t0).record(300, 404, t0);
        app.traffic_mut(4, t0).record(500, 201, t0);
        app.finalize_traffic(t0);
        assert_eq!(app.total_traffic.http_all_count, 3);
        assert_eq!(app.total_traffic.http_2xx_count, 2);
        assert_eq!(app.total_traffic.http_4xx_count, 1);
        assert_relative_eq!(app.total_traffic.avg_response_l1_time, 300.0);
        assert_relative_eq!(app.traffic(4).unwrap().avg_response_l1_time, 400.0);
    }
}
