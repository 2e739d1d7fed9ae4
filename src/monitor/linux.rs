use crate::monitor::gpu::DrmGpuReader;
use crate::monitor::interfaces;
use crate::monitor::{
    CounterRead, CpuTicks, DiskCounters, DiskInfo, GlobalCpuTicks, GpuCounters, GpuInfo,
    HardwareInfo, MemoryTotals, NetworkCounters, NetworkInterfaceInfo, PlatformMetrics,
    ProcessDynamicInfo, ProcessStaticInfo,
};
use crate::process::{ProcessCpuTicks, ProcessStatus};
use crate::snapshot::extra;
use crate::types::{Result, TaskscopeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use procfs::process::Process;
use procfs::{Current, CurrentSI, CpuTime, KernelStats, Meminfo, ProcError};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

const SECTOR_SIZE: u64 = 512;

pub struct LinuxMetrics {
    clock_ticks: u64,
    page_size: u64,
    boot_time_secs: u64,
    gpus: DrmGpuReader,
}

impl LinuxMetrics {
    pub fn new() -> Result<Self> {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let stats = KernelStats::current().map_err(|e| proc_error("/proc/stat", e))?;

        Ok(LinuxMetrics {
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
            boot_time_secs: stats.btime,
            gpus: DrmGpuReader::default(),
        })
    }

    fn open(&self, pid: u32) -> Result<Process> {
        Process::new(pid as i32).map_err(|e| proc_error(&format!("process {pid}"), e))
    }

    fn start_time(&self, start_ticks: u64) -> Option<DateTime<Utc>> {
        let secs = self.boot_time_secs + start_ticks / self.clock_ticks;
        DateTime::from_timestamp(secs as i64, 0)
    }
}

fn proc_error(context: &str, err: ProcError) -> TaskscopeError {
    match err {
        ProcError::NotFound(_) => TaskscopeError::NotFound(format!("{context} not found")),
        ProcError::PermissionDenied(_) => {
            TaskscopeError::PermissionDenied(format!("Cannot access {context}"))
        }
        other => TaskscopeError::Transient(format!("Failed to read {context}: {other}")),
    }
}

fn status_from_state(state: char) -> ProcessStatus {
    match state {
        'R' => ProcessStatus::Running,
        'S' | 'I' => ProcessStatus::Sleeping,
        'D' => ProcessStatus::Waiting,
        'Z' => ProcessStatus::Zombie,
        'T' | 't' => ProcessStatus::Suspended,
        'X' | 'x' => ProcessStatus::Dead,
        _ => ProcessStatus::Sleeping,
    }
}

fn cpu_ticks(time: &CpuTime) -> CpuTicks {
    let busy = time.user
        + time.nice
        + time.system
        + time.irq.unwrap_or(0)
        + time.softirq.unwrap_or(0)
        + time.steal.unwrap_or(0);
    CpuTicks {
        busy,
        idle: time.idle + time.iowait.unwrap_or(0),
    }
}

fn read_file(path: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| TaskscopeError::from_io(path, e))
}

/// Parses `/proc/uptime`: seconds since boot, then idle seconds.
fn parse_uptime(content: &str) -> Result<Duration> {
    content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| TaskscopeError::Parse(format!("unexpected /proc/uptime: {content:?}")))
}

/// Counts distinct `(physical id, core id)` pairs in `/proc/cpuinfo`.
fn count_physical_cores(cpuinfo: &str) -> usize {
    let mut cores = HashSet::new();
    let mut physical_id = "";
    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "physical id" => physical_id = value.trim(),
            "core id" => {
                cores.insert((physical_id.to_string(), value.trim().to_string()));
            }
            _ => {}
        }
    }
    cores.len()
}

/// Finds `name` in `/proc/net/dev` content.
fn parse_net_dev(content: &str, name: &str) -> Option<NetworkCounters> {
    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() != name {
            continue;
        }
        let parts: Vec<&str> = counters.split_whitespace().collect();
        if parts.len() < 9 {
            return None;
        }
        return Some(NetworkCounters {
            bytes_received: parts[0].parse().unwrap_or(0),
            bytes_sent: parts[8].parse().unwrap_or(0),
        });
    }
    None
}

/// Finds `name` in `/proc/diskstats` content.
fn parse_diskstats(content: &str, name: &str) -> Option<DiskCounters> {
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 || parts[2] != name {
            continue;
        }
        let field = |i: usize| parts[i].parse::<u64>().unwrap_or(0);
        return Some(DiskCounters {
            bytes_read: CounterRead::Value(field(5) * SECTOR_SIZE),
            bytes_written: CounterRead::Value(field(9) * SECTOR_SIZE),
            io_time_ms: CounterRead::Value(field(12)),
            queue_depth: CounterRead::Value(field(11)),
        });
    }
    None
}

/// Mount points of `/dev/<disk>` and its partitions, in `/proc/mounts` order.
fn parse_mounts(content: &str, disk: &str) -> Vec<String> {
    let device = format!("/dev/{disk}");
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let rest = source.strip_prefix(&device)?;
            is_partition_suffix(rest).then(|| target.replace("\\040", " "))
        })
        .collect()
}

/// Whether `rest` turns a disk name into one of its partitions: nothing
/// (the whole disk), `N` (`sda1`) or `pN` (`nvme0n1p1`).
fn is_partition_suffix(rest: &str) -> bool {
    let digits = rest.strip_prefix('p').unwrap_or(rest);
    rest.is_empty() || (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn is_virtual_block_device(name: &str) -> bool {
    ["loop", "ram", "zram", "dm-", "sr", "fd"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

#[async_trait]
impl PlatformMetrics for LinuxMetrics {
    async fn hardware_info(&self) -> Result<HardwareInfo> {
        let stats = KernelStats::current().map_err(|e| proc_error("/proc/stat", e))?;
        let meminfo = Meminfo::current().map_err(|e| proc_error("/proc/meminfo", e))?;
        let logical_cores = stats.cpu_time.len().max(1);
        let physical_cores = read_file("/proc/cpuinfo")
            .map(|content| count_physical_cores(&content))
            .unwrap_or(0);

        Ok(HardwareInfo {
            logical_cores,
            physical_cores: if physical_cores == 0 {
                logical_cores
            } else {
                physical_cores
            },
            physical_memory_total: meminfo.mem_total,
            page_size: self.page_size,
        })
    }

    async fn uptime(&self) -> Result<Duration> {
        parse_uptime(&read_file("/proc/uptime")?)
    }

    async fn enumerate_processes(&self) -> Result<Vec<u32>> {
        let all = procfs::process::all_processes()
            .map_err(|e| proc_error("/proc", e))?;
        // a process can vanish between readdir and open
        Ok(all.flatten().map(|p| p.pid() as u32).collect())
    }

    async fn read_process_static_info(&self, pid: u32) -> Result<ProcessStaticInfo> {
        let process = self.open(pid)?;
        let context = format!("process {pid}");
        let stat = process.stat().map_err(|e| proc_error(&context, e))?;
        let cmdline = process.cmdline().map_err(|e| proc_error(&context, e))?;
        let uid = process.uid().map_err(|e| proc_error(&context, e))?;

        // kernel threads and foreign processes have no readable exe link
        let path = process
            .exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stat.comm.clone());

        let user_name = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| uid.to_string());

        Ok(ProcessStaticInfo {
            name,
            path,
            command_line: cmdline.join(" "),
            description: String::new(),
            user_name,
            parent_pid: (stat.ppid > 0).then_some(stat.ppid as u32),
            start_time: self.start_time(stat.starttime),
        })
    }

    async fn read_process_dynamic_info(&self, pid: u32) -> Result<ProcessDynamicInfo> {
        let process = self.open(pid)?;
        let context = format!("process {pid}");
        let stat = process.stat().map_err(|e| proc_error(&context, e))?;
        let statm = process.statm().map_err(|e| proc_error(&context, e))?;

        Ok(ProcessDynamicInfo {
            private_working_set: statm.resident.saturating_sub(statm.shared) * self.page_size,
            cpu: ProcessCpuTicks {
                user: stat.utime,
                system: stat.stime,
            },
            status: status_from_state(stat.state),
            start_ticks: Some(stat.starttime),
        })
    }

    async fn read_global_cpu_ticks(&self) -> Result<GlobalCpuTicks> {
        let stats = KernelStats::current().map_err(|e| proc_error("/proc/stat", e))?;
        Ok(GlobalCpuTicks {
            aggregate: cpu_ticks(&stats.total),
            per_core: stats.cpu_time.iter().map(cpu_ticks).collect(),
        })
    }

    async fn read_memory_totals(&self) -> Result<MemoryTotals> {
        let meminfo = Meminfo::current().map_err(|e| proc_error("/proc/meminfo", e))?;
        let available = meminfo
            .mem_available
            .unwrap_or(meminfo.mem_free + meminfo.buffers + meminfo.cached);
        Ok(MemoryTotals {
            total: meminfo.mem_total,
            available,
        })
    }

    async fn enumerate_disks(&self) -> Result<Vec<DiskInfo>> {
        let mounts = read_file("/proc/mounts").unwrap_or_default();
        let entries = fs::read_dir("/sys/block")
            .map_err(|e| TaskscopeError::from_io("/sys/block", e))?;

        let mut disks = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_virtual_block_device(&name) {
                continue;
            }
            let base = entry.path();
            let sectors = fs::read_to_string(base.join("size"))
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0);
            if sectors == 0 {
                continue;
            }
            let model = fs::read_to_string(base.join("device/model"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            disks.push(DiskInfo {
                mount_points: parse_mounts(&mounts, &name),
                name,
                model,
                capacity_bytes: sectors * SECTOR_SIZE,
            });
        }
        disks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(disks)
    }

    async fn read_disk_counters(&self, disk: &DiskInfo) -> Result<DiskCounters> {
        parse_diskstats(&read_file("/proc/diskstats")?, &disk.name)
            .ok_or_else(|| TaskscopeError::NotFound(format!("disk {}", disk.name)))
    }

    async fn enumerate_network_interfaces(&self) -> Result<Vec<NetworkInterfaceInfo>> {
        interfaces::list_interfaces()
    }

    async fn read_network_counters(
        &self,
        interface: &NetworkInterfaceInfo,
    ) -> Result<NetworkCounters> {
        parse_net_dev(&read_file("/proc/net/dev")?, &interface.name)
            .ok_or_else(|| TaskscopeError::NotFound(format!("interface {}", interface.name)))
    }

    async fn enumerate_gpus(&self) -> Result<Vec<GpuInfo>> {
        self.gpus.enumerate()
    }

    async fn read_gpu_counters(&self, gpu: &GpuInfo) -> Result<GpuCounters> {
        self.gpus.read_counters(gpu)
    }

    async fn read_extra_metrics(&self) -> Result<Vec<(&'static str, u64)>> {
        let meminfo = Meminfo::current().map_err(|e| proc_error("/proc/meminfo", e))?;
        let mut metrics = vec![
            (extra::BUFFERS_BYTES, meminfo.buffers),
            (extra::CACHED_BYTES, meminfo.cached),
            (extra::SWAP_TOTAL_BYTES, meminfo.swap_total),
            (
                extra::SWAP_USED_BYTES,
                meminfo.swap_total.saturating_sub(meminfo.swap_free),
            ),
            (extra::COMMITTED_BYTES, meminfo.committed_as),
        ];
        // allocated, unused, max
        if let Some(open) = read_file("/proc/sys/fs/file-nr")
            .ok()
            .and_then(|s| s.split_whitespace().next()?.parse::<u64>().ok())
        {
            metrics.push((extra::OPEN_FILE_DESCRIPTORS, open));
        }
        Ok(metrics)
    }
}
