//! Per-tick bookkeeping shared by every platform backend.
//!
//! [`MetricsLoader`] turns the raw answers of a [`PlatformMetrics`] backend
//! into series appends on a [`SystemSnapshot`]: it diffs cumulative
//! counters, reconciles the enumerated pid set against the known process
//! list, retires dead processes after the retention window and tracks
//! which hardware counters turned out to be unsupported.

use super::{
    CounterRead, DiskCounters, DiskInfo, GlobalCpuTicks, GpuCounters, GpuInfo, NetworkCounters,
    NetworkInterfaceInfo, PlatformMetrics, ProcessDynamicInfo,
};
use crate::config::Config;
use crate::process::{Process, UniqueId, UniqueIdAllocator};
use crate::snapshot::{CoreRecord, DiskRecord, GpuRecord, NetworkRecord, SystemSnapshot};
use crate::toplist::{TopList, TopMetric};
use crate::types::{Result, TaskscopeError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    /// Hardware topology captured, no update yet.
    Initialized,
    Updating,
}

pub struct MetricsLoader {
    platform: Box<dyn PlatformMetrics>,
    config: Config,
    state: LoaderState,
    ids: UniqueIdAllocator,
    previous_cpu: Option<GlobalCpuTicks>,
    disks: Vec<DiskInfo>,
    previous_disk: Vec<Option<Reading<DiskCounters>>>,
    networks: Vec<NetworkInterfaceInfo>,
    previous_network: Vec<Option<Reading<NetworkCounters>>>,
    gpus: Vec<GpuInfo>,
}

/// Last successful counter reading of a device and when it was taken.
#[derive(Debug, Clone, Copy)]
struct Reading<T> {
    counters: T,
    at: DateTime<Utc>,
}

impl MetricsLoader {
    pub fn new(platform: Box<dyn PlatformMetrics>, config: Config) -> Self {
        Self {
            platform,
            config,
            state: LoaderState::Uninitialized,
            ids: UniqueIdAllocator::default(),
            previous_cpu: None,
            disks: Vec::new(),
            previous_disk: Vec::new(),
            networks: Vec::new(),
            previous_network: Vec::new(),
            gpus: Vec::new(),
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Reads static hardware facts and sizes every sub-record of `snapshot`.
    ///
    /// Boot time is wall clock minus OS uptime, so it is wrong after the
    /// machine hibernated.
    pub async fn init(&mut self, snapshot: &mut SystemSnapshot) -> Result<()> {
        self.init_at(snapshot, Utc::now()).await
    }

    pub async fn init_at(&mut self, snapshot: &mut SystemSnapshot, now: DateTime<Utc>) -> Result<()> {
        let capacity = snapshot.capacity();
        let hardware = self.platform.hardware_info().await?;
        snapshot.logical_cores = hardware.logical_cores;
        snapshot.physical_cores = hardware.physical_cores;
        snapshot.physical_memory_total = hardware.physical_memory_total;
        snapshot.page_size = hardware.page_size;

        match self.platform.uptime().await {
            Ok(uptime) => {
                snapshot.uptime = uptime;
                snapshot.boot_time = chrono::Duration::from_std(uptime)
                    .ok()
                    .map(|since_boot| now - since_boot);
            }
            Err(e) => warn!("Failed to read uptime: {}", e),
        }

        snapshot.cores = (0..hardware.logical_cores)
            .map(|index| CoreRecord::new(index, capacity))
            .collect();

        self.disks = self.platform.enumerate_disks().await.unwrap_or_else(|e| {
            warn!("Failed to enumerate disks: {}", e);
            Vec::new()
        });
        snapshot.disks = self
            .disks
            .iter()
            .enumerate()
            .map(|(index, disk)| {
                let mut record = DiskRecord::new(index, disk.name.clone(), capacity);
                record.model.clone_from(&disk.model);
                record.capacity_bytes = disk.capacity_bytes;
                record.mount_point = first_mount_point(&disk.mount_points);
                record
            })
            .collect();
        self.previous_disk = vec![None; self.disks.len()];

        self.networks = self
            .platform
            .enumerate_network_interfaces()
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to enumerate network interfaces: {}", e);
                Vec::new()
            });
        snapshot.networks = self
            .networks
            .iter()
            .enumerate()
            .map(|(index, interface)| {
                let mut record = NetworkRecord::new(index, interface.name.clone(), capacity);
                record.mac.clone_from(&interface.mac);
                record.ipv4.clone_from(&interface.ipv4);
                record.ipv6.clone_from(&interface.ipv6);
                record
            })
            .collect();
        self.previous_network = vec![None; self.networks.len()];

        self.gpus = self.platform.enumerate_gpus().await.unwrap_or_else(|e| {
            warn!("Failed to enumerate GPUs: {}", e);
            Vec::new()
        });
        snapshot.gpus = self
            .gpus
            .iter()
            .enumerate()
            .map(|(index, gpu)| {
                let mut record = GpuRecord::new(index, gpu.name.clone(), capacity);
                record.vendor.clone_from(&gpu.vendor);
                record.memory_total_bytes = gpu.memory_total_bytes;
                record
            })
            .collect();

        info!(
            cores = snapshot.logical_cores,
            disks = snapshot.disks.len(),
            networks = snapshot.networks.len(),
            gpus = snapshot.gpus.len(),
            "hardware topology captured"
        );
        self.state = LoaderState::Initialized;
        Ok(())
    }

    pub async fn update(&mut self, snapshot: &mut SystemSnapshot) -> Result<()> {
        self.update_at(snapshot, Utc::now()).await
    }

    /// One sampling tick with an explicit wall-clock time.
    pub async fn update_at(&mut self, snapshot: &mut SystemSnapshot, now: DateTime<Utc>) -> Result<()> {
        if self.state == LoaderState::Uninitialized {
            return Err(TaskscopeError::NotInitialized);
        }
        let started = Instant::now();

        if let Ok(uptime) = self.platform.uptime().await {
            snapshot.uptime = uptime;
        }

        let aggregate_cpu_delta = self.update_cpu(snapshot).await;

        if let Err(e) = self.update_processes(snapshot, now, aggregate_cpu_delta).await {
            warn!("Process enumeration failed: {}", e);
        }
        self.purge_dead(snapshot, now);

        self.update_disks(snapshot, now).await;
        self.update_networks(snapshot, now).await;

        if snapshot.tick >= 1 {
            let n = self.config.top_list_size;
            let top_cpu = TopList::compute(&snapshot.processes, n, TopMetric::Cpu);
            let top_memory = TopList::compute(&snapshot.processes, n, TopMetric::Memory);
            snapshot.top_cpu.add_value(top_cpu);
            snapshot.top_memory.add_value(top_memory);
        }

        self.update_gpus(snapshot).await;
        self.update_memory(snapshot).await;

        snapshot.tick += 1;
        snapshot.sampled_at = Some(now);
        snapshot.last_update_duration = started.elapsed();
        self.state = LoaderState::Updating;
        Ok(())
    }

    /// Seconds between a device's previous reading and `now`. A reading
    /// skipped by a transient failure widens the interval accordingly.
    fn seconds_since(&self, previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        previous
            .and_then(|at| (now - at).to_std().ok())
            .filter(|elapsed| !elapsed.is_zero())
            .unwrap_or_else(|| self.config.update_interval())
            .as_secs_f64()
    }

    /// Appends total and per-core utilization and returns the aggregate
    /// tick delta used for process usage.
    async fn update_cpu(&mut self, snapshot: &mut SystemSnapshot) -> Option<u64> {
        let ticks = match self.platform.read_global_cpu_ticks().await {
            Ok(ticks) => ticks,
            Err(e) => {
                warn!("Failed to read CPU ticks: {}", e);
                return None;
            }
        };

        for (index, core) in snapshot.cores.iter_mut().enumerate() {
            if core.usage_supported && ticks.per_core.get(index).is_none() {
                debug!(core = index, "no per-core ticks, marking core usage unsupported");
                core.usage_supported = false;
            }
        }

        let Some(previous) = self.previous_cpu.replace(ticks.clone()) else {
            snapshot.cpu_total.add_value(0.0);
            for core in snapshot.cores.iter_mut().filter(|core| core.usage_supported) {
                core.usage.add_value(0.0);
            }
            return None;
        };

        if let Some(usage) = ticks.aggregate.busy_fraction_since(&previous.aggregate) {
            snapshot.cpu_total.add_value(usage);
        }
        for (index, core) in snapshot.cores.iter_mut().enumerate() {
            if !core.usage_supported {
                continue;
            }
            let usage = ticks
                .per_core
                .get(index)
                .zip(previous.per_core.get(index))
                .and_then(|(current, before)| current.busy_fraction_since(before));
            if let Some(usage) = usage {
                core.usage.add_value(usage);
            }
        }

        ticks
            .aggregate
            .total()
            .checked_sub(previous.aggregate.total())
    }

    async fn update_processes(
        &mut self,
        snapshot: &mut SystemSnapshot,
        now: DateTime<Utc>,
        aggregate_cpu_delta: Option<u64>,
    ) -> Result<()> {
        let enumerated = self.platform.enumerate_processes().await?;
        let present: HashSet<u32> = enumerated.iter().copied().collect();
        let capacity = snapshot.capacity();

        let mut live = Vec::with_capacity(enumerated.len());
        for mut process in std::mem::take(&mut snapshot.processes) {
            if present.contains(&process.pid) {
                live.push(process);
            } else {
                debug!(pid = process.pid, id = %process.unique_id, "process exited");
                process.mark_dead(now);
                snapshot.dead_processes.push(process);
            }
        }

        let known: HashSet<u32> = live.iter().map(|p| p.pid).collect();
        for &pid in &enumerated {
            if !known.contains(&pid) {
                live.push(Process::new(self.ids.next_id(), pid, capacity));
            }
        }

        let cores = snapshot.logical_cores;
        for process in &mut live {
            let info = match self.platform.read_process_dynamic_info(process.pid).await {
                Ok(info) => info,
                Err(e) => {
                    // NotFound here is an exit race, the next enumeration settles it
                    debug!(pid = process.pid, "Failed to read process counters: {}", e);
                    continue;
                }
            };

            if pid_was_reused(process, &info) {
                debug!(pid = process.pid, id = %process.unique_id, "pid reused by a new process");
                let mut replacement = Process::new(self.ids.next_id(), process.pid, capacity);
                std::mem::swap(process, &mut replacement);
                replacement.mark_dead(now);
                snapshot.dead_processes.push(replacement);
            }

            apply_dynamic_info(process, &info, aggregate_cpu_delta, cores);

            if !process.has_read_once {
                match self.platform.read_process_static_info(process.pid).await {
                    Ok(info) => {
                        process.file_name = info.name;
                        process.file_path = info.path;
                        process.command_line = info.command_line;
                        process.description = info.description;
                        process.user_name = info.user_name;
                        process.parent_pid = info.parent_pid;
                        process.start_time = info.start_time;
                        process.has_read_once = true;
                    }
                    Err(e) => {
                        debug!(pid = process.pid, "Failed to read process details, retrying next tick: {}", e);
                    }
                }
            }
        }

        let by_pid: HashMap<u32, UniqueId> = live.iter().map(|p| (p.pid, p.unique_id)).collect();
        for process in &mut live {
            if process.parent_unique_id.is_none() {
                process.parent_unique_id = process
                    .parent_pid
                    .and_then(|ppid| by_pid.get(&ppid).copied())
                    .filter(|&parent| parent != process.unique_id);
            }
        }

        snapshot.processes = live;
        Ok(())
    }

    fn purge_dead(&self, snapshot: &mut SystemSnapshot, now: DateTime<Utc>) {
        let keep = self.config.dead_process_keep_time;
        let before = snapshot.dead_processes.len();
        snapshot
            .dead_processes
            .retain(|p| !p.retention_elapsed(now, keep));
        let purged = before - snapshot.dead_processes.len();
        if purged > 0 {
            debug!(purged, "dead processes left the retention window");
        }
    }

    async fn update_disks(&mut self, snapshot: &mut SystemSnapshot, now: DateTime<Utc>) {
        for (index, disk) in self.disks.iter().enumerate() {
            let Some(record) = snapshot.disks.get_mut(index) else {
                debug_assert!(false, "disk records out of sync with topology");
                continue;
            };
            match self.platform.read_disk_counters(disk).await {
                Ok(counters) => {
                    let previous = self.previous_disk[index].replace(Reading { counters, at: now });
                    let seconds = self.seconds_since(previous.map(|p| p.at), now);
                    apply_disk_counters(record, previous.map(|p| p.counters).as_ref(), &counters, seconds);
                }
                Err(TaskscopeError::NotFound(_)) => {
                    // device gone: hold the last reading
                    let read = *record.read_bytes_per_sec.newest();
                    let written = *record.write_bytes_per_sec.newest();
                    let active = *record.active_fraction.newest();
                    let queue = *record.queue_depth.newest();
                    record.read_bytes_per_sec.add_value(read);
                    record.write_bytes_per_sec.add_value(written);
                    record.active_fraction.add_value(active);
                    record.queue_depth.add_value(queue);
                }
                Err(TaskscopeError::Unsupported(_)) => {
                    record.support.transfer = false;
                    record.support.active_time = false;
                    record.support.queue_depth = false;
                }
                Err(e) => debug!(disk = %disk.name, "Failed to read disk counters: {}", e),
            }
        }
    }

    async fn update_networks(&mut self, snapshot: &mut SystemSnapshot, now: DateTime<Utc>) {
        for (index, interface) in self.networks.iter().enumerate() {
            let Some(record) = snapshot.networks.get_mut(index) else {
                debug_assert!(false, "network records out of sync with topology");
                continue;
            };
            if !record.counters_supported {
                continue;
            }
            match self.platform.read_network_counters(interface).await {
                Ok(counters) => {
                    let previous = self.previous_network[index].replace(Reading { counters, at: now });
                    let seconds = self.seconds_since(previous.map(|p| p.at), now);
                    let (received, sent) = match previous.map(|p| p.counters) {
                        Some(previous) => (
                            rate(previous.bytes_received, counters.bytes_received, seconds),
                            rate(previous.bytes_sent, counters.bytes_sent, seconds),
                        ),
                        None => (0, 0),
                    };
                    record.received_bytes_per_sec.add_value(received);
                    record.sent_bytes_per_sec.add_value(sent);
                }
                Err(TaskscopeError::NotFound(_)) => {
                    let received = *record.received_bytes_per_sec.newest();
                    let sent = *record.sent_bytes_per_sec.newest();
                    record.received_bytes_per_sec.add_value(received);
                    record.sent_bytes_per_sec.add_value(sent);
                }
                Err(TaskscopeError::Unsupported(_)) => record.counters_supported = false,
                Err(e) => debug!(interface = %interface.name, "Failed to read interface counters: {}", e),
            }
        }
    }

    /// Reads every GPU first; one hard failure abandons the whole GPU
    /// update for this tick.
    async fn update_gpus(&mut self, snapshot: &mut SystemSnapshot) {
        if self.gpus.is_empty() {
            return;
        }
        let mut readings: Vec<GpuCounters> = Vec::with_capacity(self.gpus.len());
        for gpu in &self.gpus {
            match self.platform.read_gpu_counters(gpu).await {
                Ok(counters) => readings.push(counters),
                Err(TaskscopeError::Unsupported(_)) => readings.push(GpuCounters {
                    utilization: CounterRead::Unsupported,
                    memory_used_bytes: CounterRead::Unsupported,
                    temperature_celsius: CounterRead::Unsupported,
                }),
                Err(e) => {
                    warn!(gpu = %gpu.name, "GPU update skipped this tick: {}", e);
                    return;
                }
            }
        }

        for (record, counters) in snapshot.gpus.iter_mut().zip(readings) {
            if record.utilization_supported {
                match counters.utilization {
                    CounterRead::Value(v) => record.utilization.add_value(v),
                    CounterRead::Unsupported => record.utilization_supported = false,
                }
            }
            if record.memory_supported {
                match counters.memory_used_bytes {
                    CounterRead::Value(v) => record.memory_used_bytes.add_value(v),
                    CounterRead::Unsupported => record.memory_supported = false,
                }
            }
            if record.temperature_supported {
                match counters.temperature_celsius {
                    CounterRead::Value(v) => record.temperature_celsius.add_value(v),
                    CounterRead::Unsupported => record.temperature_supported = false,
                }
            }
        }
    }

    async fn update_memory(&mut self, snapshot: &mut SystemSnapshot) {
        match self.platform.read_memory_totals().await {
            Ok(totals) => {
                snapshot.memory_used.add_value(totals.used());
                snapshot.memory_available.add_value(totals.available);
            }
            Err(e) => warn!("Failed to read memory totals: {}", e),
        }
        match self.platform.read_extra_metrics().await {
            Ok(metrics) => {
                for (name, value) in metrics {
                    snapshot.extra_series_mut(name).add_value(value);
                }
            }
            Err(e) => debug!("Failed to read platform metrics: {}", e),
        }
    }
}

fn pid_was_reused(process: &Process, info: &ProcessDynamicInfo) -> bool {
    matches!(
        (process.os_start_ticks, info.start_ticks),
        (Some(known), Some(current)) if known != current
    )
}

fn apply_dynamic_info(
    process: &mut Process,
    info: &ProcessDynamicInfo,
    aggregate_cpu_delta: Option<u64>,
    cores: usize,
) {
    process.status = info.status;
    process.os_start_ticks = info.start_ticks;
    process.private_working_set.add_value(info.private_working_set);
    process.record_cpu_ticks(info.cpu, aggregate_cpu_delta, cores);
}

fn apply_disk_counters(
    record: &mut DiskRecord,
    previous: Option<&DiskCounters>,
    current: &DiskCounters,
    seconds: f64,
) {
    match (current.bytes_read, current.bytes_written) {
        (CounterRead::Value(read), CounterRead::Value(written)) if record.support.transfer => {
            let (read_rate, write_rate) = match previous {
                Some(DiskCounters {
                    bytes_read: CounterRead::Value(before_read),
                    bytes_written: CounterRead::Value(before_written),
                    ..
                }) => (
                    rate(*before_read, read, seconds),
                    rate(*before_written, written, seconds),
                ),
                _ => (0, 0),
            };
            record.read_bytes_per_sec.add_value(read_rate);
            record.write_bytes_per_sec.add_value(write_rate);
        }
        (CounterRead::Value(_), CounterRead::Value(_)) => {}
        _ => record.support.transfer = false,
    }

    match current.io_time_ms {
        CounterRead::Value(now) if record.support.active_time => {
            let fraction = match previous.map(|p| p.io_time_ms) {
                Some(CounterRead::Value(before)) if seconds > 0.0 => {
                    (now.saturating_sub(before) as f64 / (seconds * 1000.0)).clamp(0.0, 1.0)
                }
                _ => 0.0,
            };
            record.active_fraction.add_value(fraction as f32);
        }
        CounterRead::Value(_) => {}
        CounterRead::Unsupported => record.support.active_time = false,
    }

    match current.queue_depth {
        CounterRead::Value(depth) if record.support.queue_depth => {
            record.queue_depth.add_value(depth)
        }
        CounterRead::Value(_) => {}
        CounterRead::Unsupported => record.support.queue_depth = false,
    }
}

/// Bytes per second between two cumulative readings. Counters that went
/// backwards (wrapped or reset) count as no traffic.
fn rate(before: u64, now: u64, seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (now.saturating_sub(before) as f64 / seconds).round() as u64
}

/// First non-empty mount point with trailing separators stripped. A bare
/// root (`/`) is kept as is.
pub fn first_mount_point(mount_points: &[String]) -> String {
    mount_points
        .iter()
        .map(|raw| {
            let trimmed = raw.trim_end_matches(['/', '\\']);
            if trimmed.is_empty() {
                raw.chars().next().map(String::from).unwrap_or_default()
            } else {
                trimmed.to_string()
            }
        })
        .find(|mount| !mount.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{CpuTicks, HardwareInfo, MemoryTotals, ProcessStaticInfo};
    use crate::process::{ProcessCpuTicks, ProcessStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone)]
    struct FakeProcess {
        ticks: ProcessCpuTicks,
        memory: u64,
        start_ticks: u64,
        static_failures: u32,
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Transient,
        Unsupported,
    }

    impl Fault {
        fn error(self) -> TaskscopeError {
            match self {
                Fault::Transient => TaskscopeError::Transient("device busy".to_string()),
                Fault::Unsupported => TaskscopeError::Unsupported("no counters".to_string()),
            }
        }
    }

    #[derive(Default)]
    struct FakeState {
        processes: BTreeMap<u32, FakeProcess>,
        cpu: GlobalCpuTicks,
        disk: Option<DiskCounters>,
        disk_fault: Option<Fault>,
        network: Option<NetworkCounters>,
        network_fault: Option<Fault>,
        gpu: Option<Result<GpuCounters>>,
    }

    #[derive(Clone, Default)]
    struct FakePlatform {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakePlatform {
        fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }

        fn spawn(&self, pid: u32, start_ticks: u64) {
            self.with(|s| {
                s.processes.insert(
                    pid,
                    FakeProcess {
                        ticks: ProcessCpuTicks::default(),
                        memory: pid as u64 * 1024,
                        start_ticks,
                        static_failures: 0,
                    },
                );
            });
        }

        fn exit(&self, pid: u32) {
            self.with(|s| s.processes.remove(&pid));
        }

        fn advance_cpu(&self, busy: u64, idle: u64) {
            self.with(|s| {
                s.cpu.aggregate.busy += busy;
                s.cpu.aggregate.idle += idle;
                for core in &mut s.cpu.per_core {
                    core.busy += busy / 4;
                    core.idle += idle / 4;
                }
            });
        }
    }

    #[async_trait]
    impl PlatformMetrics for FakePlatform {
        async fn hardware_info(&self) -> Result<HardwareInfo> {
            Ok(HardwareInfo {
                logical_cores: 4,
                physical_cores: 2,
                physical_memory_total: 16 << 30,
                page_size: 4096,
            })
        }

        async fn uptime(&self) -> Result<Duration> {
            Ok(Duration::from_secs(3600))
        }

        async fn enumerate_processes(&self) -> Result<Vec<u32>> {
            Ok(self.with(|s| s.processes.keys().copied().collect()))
        }

        async fn read_process_static_info(&self, pid: u32) -> Result<ProcessStaticInfo> {
            self.with(|s| {
                let process = s
                    .processes
                    .get_mut(&pid)
                    .ok_or_else(|| TaskscopeError::NotFound(format!("{pid}")))?;
                if process.static_failures > 0 {
                    process.static_failures -= 1;
                    return Err(TaskscopeError::Transient("still starting".to_string()));
                }
                Ok(ProcessStaticInfo {
                    name: format!("proc{pid}"),
                    path: format!("/usr/bin/proc{pid}"),
                    command_line: format!("proc{pid} --flag"),
                    user_name: "alice".to_string(),
                    parent_pid: Some(1),
                    ..Default::default()
                })
            })
        }

        async fn read_process_dynamic_info(&self, pid: u32) -> Result<ProcessDynamicInfo> {
            self.with(|s| {
                let process = s
                    .processes
                    .get(&pid)
                    .ok_or_else(|| TaskscopeError::NotFound(format!("{pid}")))?;
                Ok(ProcessDynamicInfo {
                    private_working_set: process.memory,
                    cpu: process.ticks,
                    status: ProcessStatus::Running,
                    start_ticks: Some(process.start_ticks),
                })
            })
        }

        async fn read_global_cpu_ticks(&self) -> Result<GlobalCpuTicks> {
            Ok(self.with(|s| s.cpu.clone()))
        }

        async fn read_memory_totals(&self) -> Result<MemoryTotals> {
            Ok(MemoryTotals {
                total: 16 << 30,
                available: 4 << 30,
            })
        }

        async fn enumerate_disks(&self) -> Result<Vec<DiskInfo>> {
            Ok(vec![DiskInfo {
                name: "sda".to_string(),
                model: "Fake SSD".to_string(),
                mount_points: vec![String::new(), "/data/".to_string()],
                capacity_bytes: 1 << 40,
            }])
        }

        async fn read_disk_counters(&self, disk: &DiskInfo) -> Result<DiskCounters> {
            self.with(|s| match s.disk_fault {
                Some(fault) => Err(fault.error()),
                None => s.disk.ok_or_else(|| TaskscopeError::NotFound(disk.name.clone())),
            })
        }

        async fn enumerate_network_interfaces(&self) -> Result<Vec<NetworkInterfaceInfo>> {
            Ok(vec![NetworkInterfaceInfo {
                name: "eth0".to_string(),
                mac: "00:11:22:33:44:55".to_string(),
                ipv4: vec!["10.0.0.2".to_string()],
                ipv6: vec!["fe80::1".to_string()],
            }])
        }

        async fn read_network_counters(
            &self,
            interface: &NetworkInterfaceInfo,
        ) -> Result<NetworkCounters> {
            self.with(|s| match s.network_fault {
                Some(fault) => Err(fault.error()),
                None => s
                    .network
                    .ok_or_else(|| TaskscopeError::NotFound(interface.name.clone())),
            })
        }

        async fn enumerate_gpus(&self) -> Result<Vec<GpuInfo>> {
            Ok(vec![GpuInfo {
                name: "Fake GPU".to_string(),
                vendor: "AMD".to_string(),
                memory_total_bytes: Some(8 << 30),
                location: "/fake".to_string(),
            }])
        }

        async fn read_gpu_counters(&self, _gpu: &GpuInfo) -> Result<GpuCounters> {
            self.with(|s| match &s.gpu {
                Some(Ok(counters)) => Ok(*counters),
                Some(Err(_)) => Err(TaskscopeError::Transient("driver hung".to_string())),
                None => Err(TaskscopeError::Unsupported("no gpu".to_string())),
            })
        }

        async fn read_extra_metrics(&self) -> Result<Vec<(&'static str, u64)>> {
            Ok(vec![("open_file_descriptors", 321)])
        }
    }

    fn config(keep_secs: u64, top: usize) -> Config {
        Config::new(1.0, 10, Duration::from_secs(keep_secs), top).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    async fn setup(keep_secs: u64, top: usize) -> (FakePlatform, MetricsLoader, SystemSnapshot) {
        let fake = FakePlatform::default();
        fake.with(|s| s.cpu.per_core = vec![CpuTicks::default(); 4]);
        let config = config(keep_secs, top);
        let mut snapshot = SystemSnapshot::new(&config);
        let mut loader = MetricsLoader::new(Box::new(fake.clone()), config);
        loader.init_at(&mut snapshot, t(0)).await.unwrap();
        (fake, loader, snapshot)
    }

    fn live_id(snapshot: &SystemSnapshot, pid: u32) -> UniqueId {
        snapshot.live_process_by_pid(pid).unwrap().unique_id
    }

    #[tokio::test]
    async fn test_update_before_init_fails() {
        let config = config(60, 5);
        let mut snapshot = SystemSnapshot::new(&config);
        let mut loader = MetricsLoader::new(Box::new(FakePlatform::default()), config);

        assert_eq!(loader.state(), LoaderState::Uninitialized);
        let result = loader.update_at(&mut snapshot, t(0)).await;
        assert!(matches!(result, Err(TaskscopeError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_init_captures_topology() {
        let (_, loader, snapshot) = setup(60, 5).await;

        assert_eq!(loader.state(), LoaderState::Initialized);
        assert_eq!(snapshot.logical_cores, 4);
        assert_eq!(snapshot.physical_cores, 2);
        assert_eq!(snapshot.cores.len(), 4);
        assert_eq!(snapshot.boot_time, Some(t(-3600)));
        assert_eq!(snapshot.disks.len(), 1);
        assert_eq!(snapshot.disks[0].mount_point, "/data");
        assert_eq!(snapshot.networks[0].ipv6, vec!["fe80::1"]);
        assert_eq!(snapshot.gpus[0].vendor, "AMD");
    }

    #[tokio::test]
    async fn test_cpu_total_first_tick_is_zero() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.advance_cpu(500, 500);

        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        assert_eq!(snapshot.cpu_total.written(), 1);
        assert_eq!(*snapshot.cpu_total.newest(), 0.0);
        assert_eq!(loader.state(), LoaderState::Updating);

        fake.advance_cpu(1000, 3000);
        loader.update_at(&mut snapshot, t(2)).await.unwrap();
        assert_eq!(*snapshot.cpu_total.newest(), 0.25);
        assert_eq!(*snapshot.cores[0].usage.newest(), 0.25);
    }

    #[tokio::test]
    async fn test_process_cpu_usage_from_counter_deltas() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.spawn(42, 7);
        fake.with(|s| {
            s.processes.get_mut(&42).unwrap().ticks = ProcessCpuTicks {
                user: 100,
                system: 50,
            }
        });
        loader.update_at(&mut snapshot, t(1)).await.unwrap();

        let process = snapshot.live_process_by_pid(42).unwrap();
        assert_eq!(process.cpu_usage.written(), 0);
        assert_eq!(process.private_working_set.written(), 1);
        assert!(process.has_read_once);
        assert_eq!(process.file_name, "proc42");

        // 4 cores, 1000 ticks elapsed per core
        fake.advance_cpu(2000, 2000);
        fake.with(|s| {
            s.processes.get_mut(&42).unwrap().ticks = ProcessCpuTicks {
                user: 150,
                system: 80,
            }
        });
        loader.update_at(&mut snapshot, t(2)).await.unwrap();

        let process = snapshot.live_process_by_pid(42).unwrap();
        assert_eq!(process.cpu_usage.written(), 1);
        assert!((process.cpu_usage.newest() - 0.02).abs() < 1e-6);
        assert_eq!(*process.cpu_time.newest(), 80);
    }

    #[tokio::test]
    async fn test_process_cpu_usage_appended_every_tick() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.spawn(42, 7);

        for tick in 1..=4 {
            fake.advance_cpu(2000, 2000);
            fake.with(|s| {
                let process = s.processes.get_mut(&42).unwrap();
                process.ticks.user += 30;
                process.ticks.system += 10;
            });
            loader.update_at(&mut snapshot, t(tick)).await.unwrap();
        }

        let process = snapshot.live_process_by_pid(42).unwrap();
        assert_eq!(process.cpu_usage.written(), 3);
        assert_eq!(process.cpu_time.written(), 3);
        assert_eq!(process.private_working_set.written(), 4);
        // 40 of 1000 per-core ticks, spread over 4 cores
        let usages: Vec<f32> = process.cpu_usage.iter().copied().collect();
        assert!(usages[usages.len() - 3..]
            .iter()
            .all(|usage| (usage - 0.01).abs() < 1e-6));
    }

    #[tokio::test]
    async fn test_missing_per_core_ticks_mark_cores_unsupported() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.with(|s| s.cpu.per_core.truncate(2));

        for tick in 1..=3 {
            fake.advance_cpu(900, 100);
            loader.update_at(&mut snapshot, t(tick)).await.unwrap();
        }

        assert!((snapshot.cpu_total.newest() - 0.9).abs() < 1e-6);
        for core in &snapshot.cores[..2] {
            assert!(core.usage_supported);
            assert_eq!(core.usage.written(), 3);
            assert!((core.usage.newest() - 0.9).abs() < 1e-6);
        }
        for core in &snapshot.cores[2..] {
            assert!(!core.usage_supported);
            assert_eq!(core.usage.written(), 0);
        }
    }

    #[tokio::test]
    async fn test_no_per_core_ticks_at_all() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.with(|s| s.cpu.per_core.clear());

        fake.advance_cpu(500, 500);
        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        fake.advance_cpu(500, 500);
        loader.update_at(&mut snapshot, t(2)).await.unwrap();

        assert_eq!(*snapshot.cpu_total.newest(), 0.5);
        assert!(snapshot.cores.iter().all(|core| !core.usage_supported));
        assert!(snapshot.cores.iter().all(|core| core.usage.written() == 0));
    }

    #[tokio::test]
    async fn test_unsupported_network_counters_are_never_read_again() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.with(|s| s.network_fault = Some(Fault::Unsupported));
        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        assert!(!snapshot.networks[0].counters_supported);
        assert_eq!(snapshot.networks[0].received_bytes_per_sec.written(), 0);

        fake.with(|s| {
            s.network_fault = None;
            s.network = Some(NetworkCounters {
                bytes_received: 100,
                bytes_sent: 100,
            });
        });
        loader.update_at(&mut snapshot, t(2)).await.unwrap();
        assert!(!snapshot.networks[0].counters_supported);
        assert_eq!(snapshot.networks[0].received_bytes_per_sec.written(), 0);
    }

    #[tokio::test]
    async fn test_transient_device_failure_skips_one_tick() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        let disk = |read: u64| DiskCounters {
            bytes_read: CounterRead::Value(read),
            bytes_written: CounterRead::Value(0),
            io_time_ms: CounterRead::Value(0),
            queue_depth: CounterRead::Value(1),
        };
        let network = |received: u64| NetworkCounters {
            bytes_received: received,
            bytes_sent: 0,
        };
        fake.with(|s| {
            s.disk = Some(disk(1000));
            s.network = Some(network(500));
        });
        loader.update_at(&mut snapshot, t(0)).await.unwrap();

        fake.with(|s| {
            s.disk_fault = Some(Fault::Transient);
            s.network_fault = Some(Fault::Transient);
        });
        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        let disk_record = &snapshot.disks[0];
        assert_eq!(disk_record.read_bytes_per_sec.written(), 1);
        assert_eq!(disk_record.queue_depth.written(), 1);
        assert!(disk_record.support.transfer);
        assert_eq!(snapshot.networks[0].received_bytes_per_sec.written(), 1);
        assert!(snapshot.networks[0].counters_supported);

        // the rate spans both ticks since the last good reading
        fake.with(|s| {
            s.disk_fault = None;
            s.network_fault = None;
            s.disk = Some(disk(7000));
            s.network = Some(network(3500));
        });
        loader.update_at(&mut snapshot, t(3)).await.unwrap();
        assert_eq!(snapshot.disks[0].read_bytes_per_sec.written(), 2);
        assert_eq!(*snapshot.disks[0].read_bytes_per_sec.newest(), 2000);
        assert_eq!(snapshot.networks[0].received_bytes_per_sec.written(), 2);
        assert_eq!(*snapshot.networks[0].received_bytes_per_sec.newest(), 1000);
    }

    #[tokio::test]
    async fn test_identity_is_kept_and_never_resurrected() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.spawn(10, 1);
        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        let first = live_id(&snapshot, 10);

        loader.update_at(&mut snapshot, t(2)).await.unwrap();
        assert_eq!(live_id(&snapshot, 10), first);

        fake.exit(10);
        loader.update_at(&mut snapshot, t(3)).await.unwrap();
        assert!(snapshot.live_process_by_pid(10).is_none());
        let dead = snapshot.find_process(first).unwrap();
        assert_eq!(dead.status, ProcessStatus::Dead);
        assert_eq!(dead.death_time, Some(t(3)));

        fake.spawn(10, 1);
        loader.update_at(&mut snapshot, t(4)).await.unwrap();
        let second = live_id(&snapshot, 10);
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_pid_reuse_within_one_tick() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.spawn(10, 1);
        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        let first = live_id(&snapshot, 10);

        fake.spawn(10, 99);
        loader.update_at(&mut snapshot, t(2)).await.unwrap();

        assert_ne!(live_id(&snapshot, 10), first);
        assert!(snapshot.dead_processes.iter().any(|p| p.unique_id == first));
    }

    #[tokio::test]
    async fn test_dead_process_retention_window() {
        let (fake, mut loader, mut snapshot) = setup(30, 5).await;
        fake.spawn(10, 1);
        loader.update_at(&mut snapshot, t(0)).await.unwrap();
        fake.exit(10);
        loader.update_at(&mut snapshot, t(100)).await.unwrap();
        assert_eq!(snapshot.dead_processes.len(), 1);

        loader.update_at(&mut snapshot, t(129)).await.unwrap();
        assert_eq!(snapshot.dead_processes.len(), 1);

        loader.update_at(&mut snapshot, t(131)).await.unwrap();
        assert!(snapshot.dead_processes.is_empty());
    }

    #[tokio::test]
    async fn test_static_read_failure_is_retried() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.spawn(10, 1);
        fake.with(|s| s.processes.get_mut(&10).unwrap().static_failures = 1);

        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        let process = snapshot.live_process_by_pid(10).unwrap();
        assert!(!process.has_read_once);
        assert!(process.file_name.is_empty());

        loader.update_at(&mut snapshot, t(2)).await.unwrap();
        let process = snapshot.live_process_by_pid(10).unwrap();
        assert!(process.has_read_once);
        assert_eq!(process.user_name, "alice");
    }

    #[tokio::test]
    async fn test_parent_unique_id_resolved() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.spawn(1, 1);
        fake.spawn(20, 2);
        loader.update_at(&mut snapshot, t(1)).await.unwrap();

        let init = live_id(&snapshot, 1);
        let child = snapshot.live_process_by_pid(20).unwrap();
        assert_eq!(child.parent_unique_id, Some(init));
        // pid 1 reports itself as parent
        assert_eq!(snapshot.live_process_by_pid(1).unwrap().parent_unique_id, None);
    }

    #[tokio::test]
    async fn test_top_list_size_invariant() {
        let (fake, mut loader, mut snapshot) = setup(60, 2).await;
        for pid in [5, 6, 7] {
            fake.spawn(pid, pid as u64);
        }

        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        assert_eq!(snapshot.top_cpu.written(), 0);

        for tick in 2..5 {
            loader.update_at(&mut snapshot, t(tick)).await.unwrap();
            assert_eq!(snapshot.top_cpu.newest().len(), 2);
            assert_eq!(snapshot.top_memory.newest().len(), 2);
        }
        // largest working set first
        let top_memory = snapshot.top_memory.newest();
        assert_eq!(top_memory.entries()[0].process, live_id(&snapshot, 7));

        fake.exit(5);
        fake.exit(6);
        loader.update_at(&mut snapshot, t(5)).await.unwrap();
        assert_eq!(snapshot.top_cpu.newest().len(), 1);
    }

    #[tokio::test]
    async fn test_gpu_unsupported_counter() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.with(|s| {
            s.gpu = Some(Ok(GpuCounters {
                utilization: CounterRead::Unsupported,
                memory_used_bytes: CounterRead::Value(1 << 30),
                temperature_celsius: CounterRead::Value(61.0),
            }))
        });

        loader.update_at(&mut snapshot, t(1)).await.unwrap();
        let gpu = &snapshot.gpus[0];
        assert!(!gpu.utilization_supported);
        assert_eq!(gpu.utilization.written(), 0);
        assert!(gpu.memory_supported);
        assert_eq!(*gpu.memory_used_bytes.newest(), 1 << 30);
        assert_eq!(*gpu.temperature_celsius.newest(), 61.0);

        // a later value does not revive the counter
        fake.with(|s| {
            s.gpu = Some(Ok(GpuCounters {
                utilization: CounterRead::Value(0.5),
                memory_used_bytes: CounterRead::Value(2 << 30),
                temperature_celsius: CounterRead::Value(62.0),
            }))
        });
        loader.update_at(&mut snapshot, t(2)).await.unwrap();
        let gpu = &snapshot.gpus[0];
        assert!(!gpu.utilization_supported);
        assert_eq!(gpu.utilization.written(), 0);
        assert_eq!(gpu.memory_used_bytes.written(), 2);
    }

    #[tokio::test]
    async fn test_gpu_hard_failure_skips_tick() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        fake.with(|s| {
            s.gpu = Some(Err(TaskscopeError::Transient(String::new())));
        });
        loader.update_at(&mut snapshot, t(1)).await.unwrap();

        let gpu = &snapshot.gpus[0];
        assert!(gpu.utilization_supported && gpu.memory_supported && gpu.temperature_supported);
        assert_eq!(gpu.memory_used_bytes.written(), 0);
        assert_eq!(snapshot.tick, 1);
    }

    #[tokio::test]
    async fn test_disk_and_network_rates() {
        let (fake, mut loader, mut snapshot) = setup(60, 5).await;
        let disk = |read: u64, io: u64| DiskCounters {
            bytes_read: CounterRead::Value(read),
            bytes_written: CounterRead::Value(0),
            io_time_ms: CounterRead::Value(io),
            queue_depth: CounterRead::Unsupported,
        };
        fake.with(|s| {
            s.disk = Some(disk(1000, 0));
            s.network = Some(NetworkCounters {
                bytes_received: 500,
                bytes_sent: 100,
            });
        });
        loader.update_at(&mut snapshot, t(0)).await.unwrap();
        assert_eq!(*snapshot.disks[0].read_bytes_per_sec.newest(), 0);
        assert!(!snapshot.disks[0].support.queue_depth);

        fake.with(|s| {
            s.disk = Some(disk(5000, 1000));
            s.network = Some(NetworkCounters {
                bytes_received: 2500,
                bytes_sent: 100,
            });
        });
        loader.update_at(&mut snapshot, t(2)).await.unwrap();
        assert_eq!(*snapshot.disks[0].read_bytes_per_sec.newest(), 2000);
        assert_eq!(*snapshot.disks[0].active_fraction.newest(), 0.5);
        assert_eq!(*snapshot.networks[0].received_bytes_per_sec.newest(), 1000);
        assert_eq!(*snapshot.networks[0].sent_bytes_per_sec.newest(), 0);

        // unplugged: previous value is repeated
        fake.with(|s| {
            s.disk = None;
            s.network = None;
        });
        loader.update_at(&mut snapshot, t(3)).await.unwrap();
        assert_eq!(snapshot.disks[0].read_bytes_per_sec.written(), 3);
        assert_eq!(*snapshot.disks[0].read_bytes_per_sec.newest(), 2000);
        assert_eq!(*snapshot.networks[0].received_bytes_per_sec.newest(), 1000);
    }

    #[tokio::test]
    async fn test_memory_and_extras() {
        let (_, mut loader, mut snapshot) = setup(60, 5).await;
        loader.update_at(&mut snapshot, t(1)).await.unwrap();

        assert_eq!(*snapshot.memory_used.newest(), 12 << 30);
        assert_eq!(*snapshot.memory_available.newest(), 4 << 30);
        assert_eq!(*snapshot.extra["open_file_descriptors"].newest(), 321);
        assert_eq!(snapshot.sampled_at, Some(t(1)));
    }

    #[test]
    fn test_first_mount_point() {
        let mounts = |m: &[&str]| m.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(first_mount_point(&mounts(&["", "/home/", "/boot"])), "/home");
        assert_eq!(first_mount_point(&mounts(&["/"])), "/");
        assert_eq!(first_mount_point(&mounts(&["C:\\"])), "C:");
        assert_eq!(first_mount_point(&[]), "");
    }
}
