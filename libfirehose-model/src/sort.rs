use std::{cmp::Ordering, str::FromStr};

use crate::{app_stats::AppStats, cell_stats::CellStats};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SortError {
    #[error("Unknown sort column {0:?}")]
    UnknownColumn(String),
}

/// A column of entity type `T` that knows how to order two rows
pub trait SortColumn<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppColumn {
    AppId,
    ReportingContainers,
    Cpu,
    Memory,
    Disk,
    Req1,
    Req10,
    Req60,
    TotalRequests,
    Http2xx,
    Http3xx,
    Http4xx,
    Http5xx,
    Resp1,
    Resp10,
    Resp60,
    Logs,
    Crashes,
}

impl AppColumn {
    const NAMES: [(&'static str, AppColumn); 18] = [
        ("app-id", AppColumn::AppId),
        ("containers", AppColumn::ReportingContainers),
        ("cpu", AppColumn::Cpu),
        ("memory", AppColumn::Memory),
        ("disk", AppColumn::Disk),
        ("req1", AppColumn::Req1),
        ("req10", AppColumn::Req10),
        ("req60", AppColumn::Req60),
        ("total-req", AppColumn::TotalRequests),
        ("2xx", AppColumn::Http2xx),
        ("3xx", AppColumn::Http3xx),
        ("4xx", AppColumn::Http4xx),
        ("5xx", AppColumn::Http5xx),
        ("resp1", AppColumn::Resp1),
        ("resp10", AppColumn::Resp10),
        ("resp60", AppColumn::Resp60),
        ("logs", AppColumn::Logs),
        ("crashes", AppColumn::Crashes),
    ];

    pub fn column_names() -> impl Iterator<Item = &'static str> {
        Self::NAMES.iter().map(|(n, _)| *n)
    }
}

impl FromStr for AppColumn {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, c)| *c)
            .ok_or_else(|| SortError::UnknownColumn(s.to_string()))
    }
}

impl SortColumn<AppStats> for AppColumn {
    fn compare(&self, a: &AppStats, b: &AppStats) -> Ordering {
        use AppColumn::*;
        let (ta, tb) = (&a.total_traffic, &b.total_traffic);
        let ord = match self {
            AppId => Ordering::Equal,
            ReportingContainers => a.reporting_containers.cmp(&b.reporting_containers),
            Cpu => a.total_cpu_percentage.total_cmp(&b.total_cpu_percentage),
            Memory => a.total_memory_bytes.cmp(&b.total_memory_bytes),
            Disk => a.total_disk_bytes.cmp(&b.total_disk_bytes),
            Req1 => ta.event_l1_rate.cmp(&tb.event_l1_rate),
            Req10 => ta.event_l10_rate.cmp(&tb.event_l10_rate),
            Req60 => ta.event_l60_rate.cmp(&tb.event_l60_rate),
            TotalRequests => ta.http_all_count.cmp(&tb.http_all_count),
            Http2xx => ta.http_2xx_count.cmp(&tb.http_2xx_count),
            Http3xx => ta.http_3xx_count.cmp(&tb.http_3xx_count),
            Http4xx => ta.http_4xx_count.cmp(&tb.http_4xx_count),
            Http5xx => ta.http_5xx_count.cmp(&tb.http_5xx_count),
            Resp1 => ta.avg_response_l1_time.total_cmp(&tb.avg_response_l1_time),
            Resp10 => ta.avg_response_l10_time.total_cmp(&tb.avg_response_l10_time),
            Resp60 => ta.avg_response_l60_time.total_cmp(&tb.avg_response_l60_time),
            Logs => a.total_log_count.cmp(&b.total_log_count),
            Crashes => a.crash_count.cmp(&b.crash_count),
        };
        // stable output for equal rows
        ord.then_with(|| a.app_id.cmp(&b.app_id))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellColumn {
    Ip,
    Cpus,
    TotalMemory,
    UsedMemory,
    RemainingMemory,
    TotalDisk,
    RemainingDisk,
    RemainingContainers,
    ContainerCount,
}

impl CellColumn {
    const NAMES: [(&'static str, CellColumn); 9] = [
        ("ip", CellColumn::Ip),
        ("cpus", CellColumn::Cpus),
        ("total-memory", CellColumn::TotalMemory),
        ("used-memory", CellColumn::UsedMemory),
        ("remaining-memory", CellColumn::RemainingMemory),
        ("total-disk", CellColumn::TotalDisk),
        ("remaining-disk", CellColumn::RemainingDisk),
        ("remaining-containers", CellColumn::RemainingContainers),
        ("containers", CellColumn::ContainerCount),
    ];
}

impl FromStr for CellColumn {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, c)| *c)
            .ok_or_else(|| SortError::UnknownColumn(s.to_string()))
    }
}

impl SortColumn<CellStats> for CellColumn {
    fn compare(&self, a: &CellStats, b: &CellStats) -> Ordering {
        use CellColumn::*;
        let ord = match self {
            Ip => Ordering::Equal,
            Cpus => a.num_cpus.cmp(&b.num_cpus),
            TotalMemory => a.capacity_total_memory.cmp(&b.capacity_total_memory),
            UsedMemory => a.used_memory().cmp(&b.used_memory()),
            RemainingMemory => a
                .capacity_remaining_memory
                .cmp(&b.capacity_remaining_memory),
            TotalDisk => a.capacity_total_disk.cmp(&b.capacity_total_disk),
            RemainingDisk => a.capacity_remaining_disk.cmp(&b.capacity_remaining_disk),
            RemainingContainers => a
                .capacity_remaining_containers
                .cmp(&b.capacity_remaining_containers),
            ContainerCount => a.container_count.cmp(&b.container_count),
        };
        ord.then_with(|| a.ip.cmp(&b.ip))
    }
}

/// A column plus a direction, chosen by the caller (e.g., from a column identifier
/// on the command line)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Comparator<C> {
    pub column: C,
    pub direction: SortDirection,
}

impl<C> Comparator<C> {
    pub fn new(column: C, direction: SortDirection) -> Comparator<C> {
        Comparator { column, direction }
    }

    pub fn compare<T>(&self, a: &T, b: &T) -> Ordering
    where
        C: SortColumn<T>,
    {
        match self.direction {
            SortDirection::Ascending => self.column.compare(a, b),
            SortDirection::Descending => self.column.compare(b, a),
        }
    }

    pub fn sort<T>(&self, rows: &mut [&T])
    where
        C: SortColumn<T>,
    {
        rows.sort_by(|a, b| self.compare(*a, *b));
    }
}
