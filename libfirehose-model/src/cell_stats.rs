use chrono::{DateTime, Utc};
use serde::Serialize;

/// The capacity gauges a cell reports, by their metric name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellField {
    NumCpus,
    TotalMemory,
    RemainingMemory,
    TotalDisk,
    RemainingDisk,
    TotalContainers,
    RemainingContainers,
    ContainerCount,
}

impl CellField {
    const BY_NAME: [(&'static str, CellField); 8] = [
        ("numCPUS", CellField::NumCpus),
        ("CapacityTotalMemory", CellField::TotalMemory),
        ("CapacityRemainingMemory", CellField::RemainingMemory),
        ("CapacityTotalDisk", CellField::TotalDisk),
        ("CapacityRemainingDisk", CellField::RemainingDisk),
        ("CapacityTotalContainers", CellField::TotalContainers),
        ("CapacityRemainingContainers", CellField::RemainingContainers),
        ("ContainerCount", CellField::ContainerCount),
    ];

    pub fn from_metric_name(name: &str) -> Option<CellField> {
        Self::BY_NAME
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, field)| *field)
    }
}

/// Convert a gauge value to bytes if `unit` is one of KiB/MiB/GiB/TiB.
/// Any other unit (count, bytes, "") is passed through unchanged.
pub fn normalize_unit(value: f64, unit: &str) -> f64 {
    let multiplier: f64 = match unit {
        "KiB" => 1024.,
        "MiB" => 1024. * 1024.,
        "GiB" => 1024. * 1024. * 1024.,
        "TiB" => 1024. * 1024. * 1024. * 1024.,
        _ => 1.,
    };
    value * multiplier
}

/**
 * Capacity of one infrastructure cell, keyed by the cell's IP.
 * Memory and disk values are in bytes. Each gauge just overwrites its field.
 */
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CellStats {
    pub ip: String,
    pub deployment: String,
    pub job: String,
    pub index: String,
    pub num_cpus: u64,
    pub capacity_total_memory: u64,
    pub capacity_remaining_memory: u64,
    pub capacity_total_disk: u64,
    pub capacity_remaining_disk: u64,
    pub capacity_total_containers: u64,
    pub capacity_remaining_containers: u64,
    pub container_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl CellStats {
    pub fn new(ip: &str) -> CellStats {
        CellStats {
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    pub fn update_identity(&mut self, deployment: &str, job: &str, index: &str) {
        if self.deployment != deployment {
            self.deployment = deployment.to_string();
        }
        if self.job != job {
            self.job = job.to_string();
        }
        if self.index != index {
            self.index = index.to_string();
        }
    }

    /// Store a capacity gauge. Returns false if `name` is not a capacity gauge.
    /// Negative values are clamped to zero.
    pub fn update_gauge(&mut self, name: &str, value: f64, unit: &str, now: DateTime<Utc>) -> bool {
        let field = match CellField::from_metric_name(name) {
            Some(f) => f,
            None => return false,
        };
        // `as` saturates and maps NaN to 0
        let value = normalize_unit(value, unit).max(0.).round() as u64;
        use CellField::*;
        let slot = match field {
            NumCpus => &mut self.num_cpus,
            TotalMemory => &mut self.capacity_total_memory,
            RemainingMemory => &mut self.capacity_remaining_memory,
            TotalDisk => &mut self.capacity_total_disk,
            RemainingDisk => &mut self.capacity_remaining_disk,
            TotalContainers => &mut self.capacity_total_containers,
            RemainingContainers => &mut self.capacity_remaining_containers,
            ContainerCount => &mut self.container_count,
        };
        *slot = value;
        self.last_update = Some(now);
        true
    }

    pub fn used_memory(&self) -> u64 {
        self.capacity_total_memory
            .saturating_sub(self.capacity_remaining_memory)
    }

    pub fn used_disk(&self) -> u64 {
        self.capacity_total_disk
            .saturating_sub(self.capacity_remaining_disk)
    }
}
