//! The aggregate system snapshot.
//!
//! Two long-lived instances exist while the sampler runs: a *working*
//! snapshot that the loader mutates every tick, and a *published* snapshot
//! that consumers read. The published instance is brought up to date with
//! [`SystemSnapshot::copy_from`] while the publish lock is held.

mod copy;

pub use copy::reconcile_and_copy;

use crate::config::Config;
use crate::process::{Process, UniqueId};
use crate::series::{CopyMode, MetricSeries};
use crate::toplist::{TopList, TopMetric};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Well-known keys of [`SystemSnapshot::extra`].
pub mod extra {
    pub const OPEN_FILE_DESCRIPTORS: &str = "open_file_descriptors";
    pub const BUFFERS_BYTES: &str = "buffers_bytes";
    pub const CACHED_BYTES: &str = "cached_bytes";
    pub const SWAP_TOTAL_BYTES: &str = "swap_total_bytes";
    pub const SWAP_USED_BYTES: &str = "swap_used_bytes";
    pub const COMMITTED_BYTES: &str = "committed_bytes";
    pub const HANDLE_COUNT: &str = "handle_count";
}

#[derive(Debug, Clone)]
pub struct CoreRecord {
    pub index: usize,
    /// Busy fraction of this logical core.
    pub usage: MetricSeries<f32>,
    /// Cleared for good once the platform reports no ticks for this core.
    pub usage_supported: bool,
}

impl CoreRecord {
    pub fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            usage: MetricSeries::new(capacity, 0.0),
            usage_supported: true,
        }
    }

    pub fn copy_from(&mut self, source: &Self, mode: CopyMode) {
        self.index = source.index;
        self.usage_supported = source.usage_supported;
        self.usage.copy_from(&source.usage, mode);
    }
}

/// Which disk counters the platform provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSupport {
    pub transfer: bool,
    pub active_time: bool,
    pub queue_depth: bool,
}

impl Default for DiskSupport {
    fn default() -> Self {
        Self {
            transfer: true,
            active_time: true,
            queue_depth: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiskRecord {
    pub index: usize,
    pub name: String,
    pub model: String,
    /// First non-empty mount point of the disk's partitions.
    pub mount_point: String,
    pub capacity_bytes: u64,
    pub read_bytes_per_sec: MetricSeries<u64>,
    pub write_bytes_per_sec: MetricSeries<u64>,
    /// Fraction of wall time the device had I/O in flight.
    pub active_fraction: MetricSeries<f32>,
    pub queue_depth: MetricSeries<u64>,
    pub support: DiskSupport,
}

impl DiskRecord {
    pub fn new(index: usize, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            index,
            name: name.into(),
            model: String::new(),
            mount_point: String::new(),
            capacity_bytes: 0,
            read_bytes_per_sec: MetricSeries::new(capacity, 0),
            write_bytes_per_sec: MetricSeries::new(capacity, 0),
            active_fraction: MetricSeries::new(capacity, 0.0),
            queue_depth: MetricSeries::new(capacity, 0),
            support: DiskSupport::default(),
        }
    }

    pub fn copy_from(&mut self, source: &Self, mode: CopyMode) {
        self.index = source.index;
        self.name.clone_from(&source.name);
        self.model.clone_from(&source.model);
        self.mount_point.clone_from(&source.mount_point);
        self.capacity_bytes = source.capacity_bytes;
        self.support = source.support;
        self.read_bytes_per_sec
            .copy_from(&source.read_bytes_per_sec, mode);
        self.write_bytes_per_sec
            .copy_from(&source.write_bytes_per_sec, mode);
        self.active_fraction.copy_from(&source.active_fraction, mode);
        self.queue_depth.copy_from(&source.queue_depth, mode);
    }
}

#[derive(Debug, Clone)]
pub struct NetworkRecord {
    pub index: usize,
    pub name: String,
    pub mac: String,
    pub ipv4: Vec<String>,
    /// Compacted (`::`) textual IPv6 addresses.
    pub ipv6: Vec<String>,
    pub received_bytes_per_sec: MetricSeries<u64>,
    pub sent_bytes_per_sec: MetricSeries<u64>,
    pub counters_supported: bool,
}

impl NetworkRecord {
    pub fn new(index: usize, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            index,
            name: name.into(),
            mac: String::new(),
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            received_bytes_per_sec: MetricSeries::new(capacity, 0),
            sent_bytes_per_sec: MetricSeries::new(capacity, 0),
            counters_supported: true,
        }
    }

    pub fn copy_from(&mut self, source: &Self, mode: CopyMode) {
        self.index = source.index;
        self.name.clone_from(&source.name);
        self.mac.clone_from(&source.mac);
        self.ipv4.clone_from(&source.ipv4);
        self.ipv6.clone_from(&source.ipv6);
        self.counters_supported = source.counters_supported;
        self.received_bytes_per_sec
            .copy_from(&source.received_bytes_per_sec, mode);
        self.sent_bytes_per_sec
            .copy_from(&source.sent_bytes_per_sec, mode);
    }
}

#[derive(Debug, Clone)]
pub struct GpuRecord {
    pub index: usize,
    pub name: String,
    pub vendor: String,
    pub memory_total_bytes: Option<u64>,
    /// Busy fraction of the GPU.
    pub utilization: MetricSeries<f32>,
    pub memory_used_bytes: MetricSeries<u64>,
    pub temperature_celsius: MetricSeries<f32>,
    pub utilization_supported: bool,
    pub memory_supported: bool,
    pub temperature_supported: bool,
}

impl GpuRecord {
    pub fn new(index: usize, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            index,
            name: name.into(),
            vendor: String::new(),
            memory_total_bytes: None,
            utilization: MetricSeries::new(capacity, 0.0),
            memory_used_bytes: MetricSeries::new(capacity, 0),
            temperature_celsius: MetricSeries::new(capacity, 0.0),
            utilization_supported: true,
            memory_supported: true,
            temperature_supported: true,
        }
    }

    pub fn copy_from(&mut self, source: &Self, mode: CopyMode) {
        self.index = source.index;
        self.name.clone_from(&source.name);
        self.vendor.clone_from(&source.vendor);
        self.memory_total_bytes = source.memory_total_bytes;
        self.utilization_supported = source.utilization_supported;
        self.memory_supported = source.memory_supported;
        self.temperature_supported = source.temperature_supported;
        self.utilization.copy_from(&source.utilization, mode);
        self.memory_used_bytes
            .copy_from(&source.memory_used_bytes, mode);
        self.temperature_celsius
            .copy_from(&source.temperature_celsius, mode);
    }
}

#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    capacity: usize,
    /// Number of completed loader updates.
    pub tick: u64,
    /// Wall clock minus OS uptime; wrong after hibernation.
    pub boot_time: Option<DateTime<Utc>>,
    pub uptime: Duration,
    pub sampled_at: Option<DateTime<Utc>>,
    pub last_update_duration: Duration,
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub page_size: u64,
    pub physical_memory_total: u64,
    pub memory_used: MetricSeries<u64>,
    pub memory_available: MetricSeries<u64>,
    /// Busy fraction of the whole machine.
    pub cpu_total: MetricSeries<f32>,
    pub cores: Vec<CoreRecord>,
    pub top_cpu: MetricSeries<TopList>,
    pub top_memory: MetricSeries<TopList>,
    pub processes: Vec<Process>,
    pub dead_processes: Vec<Process>,
    pub disks: Vec<DiskRecord>,
    pub networks: Vec<NetworkRecord>,
    pub gpus: Vec<GpuRecord>,
    /// Platform-specific metrics keyed by name, see [`extra`].
    pub extra: BTreeMap<String, MetricSeries<u64>>,
}

impl SystemSnapshot {
    pub fn new(config: &Config) -> Self {
        Self::with_capacity(config.series_capacity())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tick: 0,
            boot_time: None,
            uptime: Duration::ZERO,
            sampled_at: None,
            last_update_duration: Duration::ZERO,
            logical_cores: 0,
            physical_cores: 0,
            page_size: 0,
            physical_memory_total: 0,
            memory_used: MetricSeries::new(capacity, 0),
            memory_available: MetricSeries::new(capacity, 0),
            cpu_total: MetricSeries::new(capacity, 0.0),
            cores: Vec::new(),
            top_cpu: MetricSeries::new(capacity, TopList::default()),
            top_memory: MetricSeries::new(capacity, TopList::default()),
            processes: Vec::new(),
            dead_processes: Vec::new(),
            disks: Vec::new(),
            networks: Vec::new(),
            gpus: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Capacity of every series owned by this snapshot.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Brings `self` up to date with `source`, see [`reconcile_and_copy`].
    pub fn copy_from(&mut self, source: &SystemSnapshot, mode: CopyMode) {
        reconcile_and_copy(self, source, mode);
    }

    /// Looks a process up in the live list, then in the dead list.
    pub fn find_process(&self, id: UniqueId) -> Option<&Process> {
        self.processes
            .iter()
            .chain(self.dead_processes.iter())
            .find(|p| p.unique_id == id)
    }

    pub fn live_process_by_pid(&self, pid: u32) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn top(&self, metric: TopMetric) -> &MetricSeries<TopList> {
        match metric {
            TopMetric::Cpu => &self.top_cpu,
            TopMetric::Memory => &self.top_memory,
        }
    }

    /// Newest ranked list for `metric`.
    pub fn current_top(&self, metric: TopMetric) -> &TopList {
        self.top(metric).newest()
    }

    /// Average of the newest `ticks` ranked lists.
    pub fn smoothed_top(&self, metric: TopMetric, ticks: usize, n: usize) -> TopList {
        let series = self.top(metric);
        let available = (series.written().min(series.capacity() as u64)) as usize;
        let count = ticks.min(available);
        if count == 0 {
            return TopList::default();
        }
        let end = series.capacity() - 1;
        let lists: Vec<TopList> = series
            .range_iter(end + 1 - count, end)
            .map(|iter| iter.collect())
            .unwrap_or_default();
        TopList::average_of(&lists, n)
    }

    /// Interpolation between the two newest ranked lists.
    pub fn interpolated_top(&self, metric: TopMetric, factor: f64, n: usize) -> TopList {
        let series = self.top(metric);
        let capacity = series.capacity();
        if series.written() < 2 || capacity < 2 {
            return series.newest().clone();
        }
        match (series.get(capacity - 2), series.get(capacity - 1)) {
            (Some(previous), Some(latest)) => TopList::weighted_average_of(previous, latest, factor, n),
            _ => series.newest().clone(),
        }
    }

    /// Series for a platform-specific metric, created on first use.
    pub fn extra_series_mut(&mut self, name: &str) -> &mut MetricSeries<u64> {
        let capacity = self.capacity;
        self.extra
            .entry(name.to_string())
            .or_insert_with(|| MetricSeries::new(capacity, 0))
    }
}
