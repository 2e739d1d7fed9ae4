//! Platform-agnostic metrics interface and implementations.
//!
//! Each operating system provides a [`PlatformMetrics`] backend that answers
//! raw questions (which pids exist, how many ticks has the CPU spent, how
//! many bytes went through an interface). The shared bookkeeping on top of
//! those answers lives in [`loader::MetricsLoader`], and the periodic
//! driving and publishing in [`sampler::Sampler`].

use crate::process::{ProcessCpuTicks, ProcessStatus};
use crate::types::{Result, TaskscopeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod loader;
pub mod sampler;

#[cfg(target_os = "linux")]
pub mod gpu;

#[cfg(unix)]
pub mod interfaces;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(windows)]
pub mod windows;

/// Static hardware facts read once at initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareInfo {
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub physical_memory_total: u64,
    pub page_size: u64,
}

/// Attributes that are expensive to read and rarely change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStaticInfo {
    pub name: String,
    pub path: String,
    pub command_line: String,
    pub description: String,
    pub user_name: String,
    pub parent_pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
}

/// Attributes sampled every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessDynamicInfo {
    pub private_working_set: u64,
    /// Cumulative CPU time, in the same unit as [`CpuTicks`].
    pub cpu: ProcessCpuTicks,
    pub status: ProcessStatus,
    /// OS start time in platform units. A different value for a known pid
    /// means the pid was recycled.
    pub start_ticks: Option<u64>,
}

/// Cumulative busy and idle ticks of one CPU (or of all of them).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub busy: u64,
    pub idle: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }

    /// Busy fraction since `previous`, or `None` when nothing elapsed or the
    /// counters went backwards.
    pub fn busy_fraction_since(&self, previous: &CpuTicks) -> Option<f32> {
        if self.busy < previous.busy || self.idle < previous.idle {
            return None;
        }
        let total = self.total() - previous.total();
        if total == 0 {
            return None;
        }
        Some(((self.busy - previous.busy) as f64 / total as f64) as f32)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalCpuTicks {
    /// Sum over all logical cores.
    pub aggregate: CpuTicks,
    pub per_core: Vec<CpuTicks>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryTotals {
    pub total: u64,
    pub available: u64,
}

impl MemoryTotals {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }
}

/// Result of reading a single hardware counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterRead<T> {
    Value(T),
    /// The hardware or driver does not expose this counter.
    Unsupported,
}

impl<T> CounterRead<T> {
    pub fn value(self) -> Option<T> {
        match self {
            CounterRead::Value(v) => Some(v),
            CounterRead::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInfo {
    /// Kernel device name, e.g. `sda` or `nvme0n1`.
    pub name: String,
    pub model: String,
    pub mount_points: Vec<String>,
    pub capacity_bytes: u64,
}

/// Cumulative disk counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskCounters {
    pub bytes_read: CounterRead<u64>,
    pub bytes_written: CounterRead<u64>,
    /// Milliseconds the device had I/O in flight.
    pub io_time_ms: CounterRead<u64>,
    /// Instantaneous number of requests in flight.
    pub queue_depth: CounterRead<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInterfaceInfo {
    pub name: String,
    pub mac: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
}

/// Cumulative byte counters of one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: String,
    pub vendor: String,
    pub memory_total_bytes: Option<u64>,
    /// Backend-specific handle, e.g. the sysfs device directory.
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuCounters {
    /// Busy fraction, 0.0..=1.0.
    pub utilization: CounterRead<f32>,
    pub memory_used_bytes: CounterRead<u64>,
    pub temperature_celsius: CounterRead<f32>,
}

/// Trait defining the raw metric sources of one operating system.
///
/// Calls may fail with [`TaskscopeError::NotFound`] (the process or device
/// vanished), [`TaskscopeError::PermissionDenied`],
/// [`TaskscopeError::Unsupported`] or [`TaskscopeError::Transient`]; the
/// loader decides how each is tolerated.
#[async_trait]
pub trait PlatformMetrics: Send + Sync {
    async fn hardware_info(&self) -> Result<HardwareInfo>;

    /// Time since the OS booted.
    async fn uptime(&self) -> Result<Duration>;

    async fn enumerate_processes(&self) -> Result<Vec<u32>>;

    async fn read_process_static_info(&self, pid: u32) -> Result<ProcessStaticInfo>;

    async fn read_process_dynamic_info(&self, pid: u32) -> Result<ProcessDynamicInfo>;

    async fn read_global_cpu_ticks(&self) -> Result<GlobalCpuTicks>;

    async fn read_memory_totals(&self) -> Result<MemoryTotals>;

    async fn enumerate_disks(&self) -> Result<Vec<DiskInfo>>;

    async fn read_disk_counters(&self, disk: &DiskInfo) -> Result<DiskCounters>;

    async fn enumerate_network_interfaces(&self) -> Result<Vec<NetworkInterfaceInfo>>;

    async fn read_network_counters(
        &self,
        interface: &NetworkInterfaceInfo,
    ) -> Result<NetworkCounters>;

    /// GPUs reachable through a vendor extension. Empty when there is none.
    async fn enumerate_gpus(&self) -> Result<Vec<GpuInfo>> {
        Ok(Vec::new())
    }

    async fn read_gpu_counters(&self, gpu: &GpuInfo) -> Result<GpuCounters> {
        Err(TaskscopeError::Unsupported(format!(
            "no GPU counters for {}",
            gpu.name
        )))
    }

    /// Platform-specific metrics as `(name, value)` pairs.
    async fn read_extra_metrics(&self) -> Result<Vec<(&'static str, u64)>> {
        Ok(Vec::new())
    }
}

/// Creates the metrics backend of the current platform.
///
/// # Errors
/// * `TaskscopeError::UnsupportedPlatform` - no backend for this OS
pub fn create_platform() -> Result<Box<dyn PlatformMetrics>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxMetrics::new()?))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::MacOSMetrics::new()?))
    }

    #[cfg(windows)]
    {
        Ok(Box::new(windows::WindowsMetrics::new()?))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        Err(TaskscopeError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ))
    }
}
