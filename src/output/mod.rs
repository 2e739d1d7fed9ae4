use crate::filter::Filter;
use crate::process::{compare, Process, ProcessStatus, SortDirection, SortKey};
use crate::snapshot::SystemSnapshot;
use crate::toplist::{TopList, TopMetric};
use anyhow::Result;
use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
    Csv,
    Quiet,
}

/// How processes are selected and ordered in a report.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub filter: Filter,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub include_dead: bool,
    /// Maximum number of listed processes.
    pub limit: Option<usize>,
    /// Number of recent ranked lists averaged into the top lists; 0 or 1
    /// shows the newest ranking as is.
    pub smoothing: usize,
}

/// Newest values of a snapshot, flattened for rendering.
///
/// Counters the platform does not provide are `None` and serialize as
/// `null`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    pub timestamp: DateTime<Utc>,
    pub samples: u64,
    pub boot_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub last_update_ms: f64,
    pub cpu: CpuReport,
    pub memory: MemoryReport,
    pub live_processes: usize,
    pub dead_processes: usize,
    pub processes: Vec<ProcessReport>,
    pub top_cpu_percent: Vec<TopReport>,
    pub top_memory_bytes: Vec<TopReport>,
    pub disks: Vec<DiskReport>,
    pub networks: Vec<NetworkReport>,
    pub gpus: Vec<GpuReport>,
    pub extra: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuReport {
    pub logical_cores: usize,
    pub physical_cores: usize,
    pub total_percent: f32,
    /// Highest total over the retained history.
    pub peak_percent: f32,
    pub per_core_percent: Vec<Option<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub peak_used_bytes: u64,
    pub available_bytes: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub id: u64,
    pub pid: u32,
    pub parent_id: Option<u64>,
    pub name: String,
    pub user: String,
    pub status: ProcessStatus,
    pub cpu_percent: f32,
    pub private_bytes: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub death_time: Option<DateTime<Utc>>,
    pub command_line: String,
}

impl ProcessReport {
    fn from_process(process: &Process) -> Self {
        Self {
            id: process.unique_id.get(),
            pid: process.pid,
            parent_id: process.parent_unique_id.map(|id| id.get()),
            name: process.display_name(),
            user: process.user_name.clone(),
            status: process.status,
            cpu_percent: process.cpu_usage.newest() * 100.0,
            private_bytes: *process.private_working_set.newest(),
            start_time: process.start_time,
            death_time: process.death_time,
            command_line: process.command_line.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopReport {
    pub id: u64,
    pub pid: Option<u32>,
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub name: String,
    pub model: String,
    pub mount_point: String,
    pub capacity_bytes: u64,
    pub read_bytes_per_sec: Option<u64>,
    pub write_bytes_per_sec: Option<u64>,
    pub active_percent: Option<f32>,
    pub queue_depth: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub name: String,
    pub mac: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub received_bytes_per_sec: Option<u64>,
    pub sent_bytes_per_sec: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpuReport {
    pub name: String,
    pub vendor: String,
    pub memory_total_bytes: Option<u64>,
    pub utilization_percent: Option<f32>,
    pub memory_used_bytes: Option<u64>,
    pub temperature_celsius: Option<f32>,
}

impl SystemReport {
    pub fn from_snapshot(snapshot: &SystemSnapshot, options: &ReportOptions) -> Self {
        let mut selected: Vec<&Process> = snapshot
            .processes
            .iter()
            .chain(
                options
                    .include_dead
                    .then_some(snapshot.dead_processes.iter())
                    .into_iter()
                    .flatten(),
            )
            .filter(|process| options.filter.matches(process))
            .collect();
        selected.sort_by(|a, b| compare(a, b, options.sort, options.direction));
        if let Some(limit) = options.limit {
            selected.truncate(limit);
        }

        Self {
            timestamp: snapshot.sampled_at.unwrap_or_else(Utc::now),
            samples: snapshot.tick,
            boot_time: snapshot.boot_time,
            uptime_secs: snapshot.uptime.as_secs(),
            last_update_ms: snapshot.last_update_duration.as_secs_f64() * 1000.0,
            cpu: CpuReport {
                logical_cores: snapshot.logical_cores,
                physical_cores: snapshot.physical_cores,
                total_percent: snapshot.cpu_total.newest() * 100.0,
                peak_percent: snapshot.cpu_total.max() * 100.0,
                per_core_percent: snapshot
                    .cores
                    .iter()
                    .map(|core| core.usage_supported.then(|| core.usage.newest() * 100.0))
                    .collect(),
            },
            memory: MemoryReport {
                total_bytes: snapshot.physical_memory_total,
                used_bytes: *snapshot.memory_used.newest(),
                peak_used_bytes: *snapshot.memory_used.max(),
                available_bytes: *snapshot.memory_available.newest(),
                page_size: snapshot.page_size,
            },
            live_processes: snapshot.processes.len(),
            dead_processes: snapshot.dead_processes.len(),
            processes: selected.into_iter().map(ProcessReport::from_process).collect(),
            top_cpu_percent: top_report(snapshot, TopMetric::Cpu, 100.0, options.smoothing),
            top_memory_bytes: top_report(snapshot, TopMetric::Memory, 1.0, options.smoothing),
            disks: snapshot
                .disks
                .iter()
                .map(|disk| DiskReport {
                    name: disk.name.clone(),
                    model: disk.model.clone(),
                    mount_point: disk.mount_point.clone(),
                    capacity_bytes: disk.capacity_bytes,
                    read_bytes_per_sec: disk
                        .support
                        .transfer
                        .then(|| *disk.read_bytes_per_sec.newest()),
                    write_bytes_per_sec: disk
                        .support
                        .transfer
                        .then(|| *disk.write_bytes_per_sec.newest()),
                    active_percent: disk
                        .support
                        .active_time
                        .then(|| disk.active_fraction.newest() * 100.0),
                    queue_depth: disk.support.queue_depth.then(|| *disk.queue_depth.newest()),
                })
                .collect(),
            networks: snapshot
                .networks
                .iter()
                .map(|network| NetworkReport {
                    name: network.name.clone(),
                    mac: network.mac.clone(),
                    ipv4: network.ipv4.clone(),
                    ipv6: network.ipv6.clone(),
                    received_bytes_per_sec: network
                        .counters_supported
                        .then(|| *network.received_bytes_per_sec.newest()),
                    sent_bytes_per_sec: network
                        .counters_supported
                        .then(|| *network.sent_bytes_per_sec.newest()),
                })
                .collect(),
            gpus: snapshot
                .gpus
                .iter()
                .map(|gpu| GpuReport {
                    name: gpu.name.clone(),
                    vendor: gpu.vendor.clone(),
                    memory_total_bytes: gpu.memory_total_bytes,
                    utilization_percent: gpu
                        .utilization_supported
                        .then(|| gpu.utilization.newest() * 100.0),
                    memory_used_bytes: gpu
                        .memory_supported
                        .then(|| *gpu.memory_used_bytes.newest()),
                    temperature_celsius: gpu
                        .temperature_supported
                        .then(|| *gpu.temperature_celsius.newest()),
                })
                .collect(),
            extra: snapshot
                .extra
                .iter()
                .map(|(name, series)| (name.clone(), *series.newest()))
                .collect(),
        }
    }
}

fn top_report(
    snapshot: &SystemSnapshot,
    metric: TopMetric,
    scale: f64,
    smoothing: usize,
) -> Vec<TopReport> {
    let ranking = if smoothing > 1 {
        let size = snapshot.top(metric).iter().map(TopList::len).max().unwrap_or(0);
        snapshot.smoothed_top(metric, smoothing, size)
    } else {
        snapshot.current_top(metric).clone()
    };
    ranking
        .entries()
        .iter()
        .map(|entry| {
            let process = snapshot.find_process(entry.process);
            TopReport {
                id: entry.process.get(),
                pid: process.map(|p| p.pid),
                name: process.map(Process::display_name).unwrap_or_default(),
                value: entry.value * scale,
            }
        })
        .collect()
}

fn or_na<T>(value: Option<T>, render: impl FnOnce(T) -> String) -> String {
    value.map(render).unwrap_or_else(|| "n/a".to_string())
}

fn rate(bytes_per_sec: u64) -> String {
    format!("{}/s", ByteSize::b(bytes_per_sec))
}

pub struct OutputFormatter;

impl OutputFormatter {
    pub fn format(report: &SystemReport, format: OutputFormat) -> Result<()> {
        let mut stdout = io::stdout();
        Self::format_to(&mut stdout, report, format)?;
        stdout.flush()?;
        Ok(())
    }

    pub fn format_to(out: &mut dyn Write, report: &SystemReport, format: OutputFormat) -> Result<()> {
        match format {
            OutputFormat::Human => Self::format_human(out, report),
            OutputFormat::Json => Self::format_json(out, report),
            OutputFormat::Csv => Self::format_csv(out, report),
            OutputFormat::Quiet => Self::format_quiet(out, report),
        }
    }

    fn format_human(out: &mut dyn Write, report: &SystemReport) -> Result<()> {
        for line in summary_lines(report) {
            writeln!(out, "{line}")?;
        }

        if !report.disks.is_empty() {
            writeln!(out)?;
            writeln!(out, "Disks:")?;
            for disk in &report.disks {
                writeln!(
                    out,
                    "  {} ({}) read {} write {} active {} queue {}",
                    disk.name,
                    if disk.mount_point.is_empty() { "-" } else { disk.mount_point.as_str() },
                    or_na(disk.read_bytes_per_sec, rate),
                    or_na(disk.write_bytes_per_sec, rate),
                    or_na(disk.active_percent, |p| format!("{p:.1}%")),
                    or_na(disk.queue_depth, |q| q.to_string()),
                )?;
            }
        }

        if !report.networks.is_empty() {
            writeln!(out)?;
            writeln!(out, "Network:")?;
            for network in &report.networks {
                writeln!(
                    out,
                    "  {} rx {} tx {}",
                    network.name,
                    or_na(network.received_bytes_per_sec, rate),
                    or_na(network.sent_bytes_per_sec, rate),
                )?;
            }
        }

        if !report.gpus.is_empty() {
            writeln!(out)?;
            writeln!(out, "GPUs:")?;
            for gpu in &report.gpus {
                writeln!(
                    out,
                    "  {} ({}) util {} memory {} temp {}",
                    gpu.name,
                    gpu.vendor,
                    or_na(gpu.utilization_percent, |p| format!("{p:.1}%")),
                    or_na(gpu.memory_used_bytes, |b| ByteSize::b(b).to_string()),
                    or_na(gpu.temperature_celsius, |t| format!("{t:.1}°C")),
                )?;
            }
        }

        writeln!(out)?;
        writeln!(
            out,
            "Processes ({} live, {} dead):",
            report.live_processes, report.dead_processes
        )?;
        writeln!(
            out,
            "  {:>6} {:>7} {:<24} {:<12} {:<9} {:>6} {:>10}",
            "ID", "PID", "NAME", "USER", "STATUS", "CPU%", "MEMORY"
        )?;
        for process in &report.processes {
            writeln!(
                out,
                "  {:>6} {:>7} {:<24} {:<12} {:<9} {:>6.1} {:>10}",
                process.id,
                process.pid,
                truncate(&process.name, 24),
                truncate(&process.user, 12),
                process.status.as_str(),
                process.cpu_percent,
                ByteSize::b(process.private_bytes).to_string(),
            )?;
        }
        Ok(())
    }

    fn format_json(out: &mut dyn Write, report: &SystemReport) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)?;
        Ok(())
    }

    fn format_csv(out: &mut dyn Write, report: &SystemReport) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        for process in &report.processes {
            wtr.serialize(process)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn format_quiet(out: &mut dyn Write, report: &SystemReport) -> Result<()> {
        writeln!(out, "{:.1}", report.cpu.total_percent)?;
        Ok(())
    }
}

/// Header block shared by the human report and the live view.
fn summary_lines(report: &SystemReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Uptime: {}  Samples: {}  Last update: {:.1}ms",
            humantime::format_duration(Duration::from_secs(report.uptime_secs)),
            report.samples,
            report.last_update_ms
        ),
        format!(
            "CPU: {:.1}% ({} logical / {} physical cores), peak {:.1}%",
            report.cpu.total_percent,
            report.cpu.logical_cores,
            report.cpu.physical_cores,
            report.cpu.peak_percent
        ),
        format!(
            "Memory: {} used / {} ({} available), peak {}",
            ByteSize::b(report.memory.used_bytes),
            ByteSize::b(report.memory.total_bytes),
            ByteSize::b(report.memory.available_bytes),
            ByteSize::b(report.memory.peak_used_bytes)
        ),
    ];

    if !report.cpu.per_core_percent.is_empty() {
        let cores = report
            .cpu
            .per_core_percent
            .iter()
            .map(|usage| or_na(*usage, |p| format!("{p:.0}%")))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("Cores: {cores}"));
    }

    if !report.top_cpu_percent.is_empty() {
        let top = report
            .top_cpu_percent
            .iter()
            .map(|entry| format!("{} {:.1}%", entry.name, entry.value))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Top CPU: {top}"));
    }
    if !report.top_memory_bytes.is_empty() {
        let top = report
            .top_memory_bytes
            .iter()
            .map(|entry| format!("{} {}", entry.name, ByteSize::b(entry.value as u64)))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Top memory: {top}"));
    }
    lines
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

pub struct RealtimeDisplay {
    last_line_count: usize,
    process_rows: usize,
}

impl RealtimeDisplay {
    pub fn new(process_rows: usize) -> Self {
        Self {
            last_line_count: 0,
            process_rows,
        }
    }

    pub fn update(&mut self, report: &SystemReport) -> Result<()> {
        let mut lines = summary_lines(report);
        for process in report.processes.iter().take(self.process_rows) {
            lines.push(format!(
                "  {:>7} {:<24} {:>6.1}% {:>10}",
                process.pid,
                truncate(&process.name, 24),
                process.cpu_percent,
                ByteSize::b(process.private_bytes).to_string()
            ));
        }

        let mut stdout = io::stdout();
        self.clear_lines(&mut stdout)?;
        for line in &lines {
            writeln!(stdout, "{line}")?;
        }
        stdout.flush()?;

        self.last_line_count = lines.len();
        Ok(())
    }

    fn clear_lines(&self, stdout: &mut io::Stdout) -> Result<()> {
        use crossterm::{cursor, terminal, ExecutableCommand};

        for _ in 0..self.last_line_count {
            stdout.execute(cursor::MoveToPreviousLine(1))?;
            stdout.execute(terminal::Clear(terminal::ClearType::CurrentLine))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::UniqueId;
    use crate::snapshot::{CoreRecord, DiskRecord, GpuRecord, NetworkRecord};
    use crate::toplist::TopList;

    fn process(id: u64, pid: u32, name: &str, cpu: f32, memory: u64) -> Process {
        let mut process = Process::new(UniqueId::new(id), pid, 4);
        process.file_name = name.to_string();
        process.user_name = "alice".to_string();
        process.cpu_usage.add_value(cpu);
        process.private_working_set.add_value(memory);
        process
    }

    fn snapshot() -> SystemSnapshot {
        let mut snapshot = SystemSnapshot::with_capacity(4);
        snapshot.tick = 2;
        snapshot.logical_cores = 2;
        snapshot.physical_cores = 1;
        snapshot.physical_memory_total = 8 << 30;
        snapshot.memory_used.add_value(2 << 30);
        snapshot.memory_available.add_value(6 << 30);
        snapshot.cpu_total.add_value(0.25);
        snapshot.processes = vec![
            process(1, 10, "init", 0.01, 1 << 20),
            process(2, 20, "firefox", 0.40, 900 << 20),
            process(3, 30, "bash", 0.05, 4 << 20),
        ];
        let mut dead = process(4, 40, "make", 0.0, 0);
        dead.mark_dead(Utc::now());
        snapshot.dead_processes = vec![dead];

        let top_cpu = TopList::compute(&snapshot.processes, 2, TopMetric::Cpu);
        let top_memory = TopList::compute(&snapshot.processes, 2, TopMetric::Memory);
        snapshot.top_cpu.add_value(top_cpu);
        snapshot.top_memory.add_value(top_memory);

        let mut disk = DiskRecord::new(0, "sda", 4);
        disk.mount_point = "/".to_string();
        disk.read_bytes_per_sec.add_value(4096);
        disk.support.queue_depth = false;
        snapshot.disks.push(disk);

        let mut gpu = GpuRecord::new(0, "card0", 4);
        gpu.vendor = "AMD".to_string();
        gpu.utilization_supported = false;
        gpu.temperature_celsius.add_value(45.0);
        snapshot.gpus.push(gpu);

        let mut core = CoreRecord::new(0, 4);
        core.usage.add_value(0.5);
        let mut unsupported_core = CoreRecord::new(1, 4);
        unsupported_core.usage_supported = false;
        snapshot.cores = vec![core, unsupported_core];

        let mut network = NetworkRecord::new(0, "eth0", 4);
        network.counters_supported = false;
        snapshot.networks.push(network);

        snapshot.extra_series_mut("swap_used_bytes").add_value(1024);
        snapshot
    }

    fn render(report: &SystemReport, format: OutputFormat) -> String {
        let mut buffer = Vec::new();
        OutputFormatter::format_to(&mut buffer, report, format).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_report_sorts_and_limits() {
        let options = ReportOptions {
            limit: Some(2),
            ..Default::default()
        };
        let report = SystemReport::from_snapshot(&snapshot(), &options);
        let pids: Vec<u32> = report.processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![20, 30]);
        assert_eq!(report.live_processes, 3);
        assert_eq!(report.dead_processes, 1);
    }

    #[test]
    fn test_report_applies_filter_and_dead_processes() {
        let options = ReportOptions {
            filter: Filter::compile("!name:fire").unwrap(),
            sort: SortKey::Pid,
            direction: SortDirection::Ascending,
            include_dead: true,
            limit: None,
            ..Default::default()
        };
        let report = SystemReport::from_snapshot(&snapshot(), &options);
        let pids: Vec<u32> = report.processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![10, 30, 40]);
        assert!(report.processes[2].death_time.is_some());
    }

    #[test]
    fn test_top_lists_resolve_processes() {
        let report = SystemReport::from_snapshot(&snapshot(), &ReportOptions::default());
        assert_eq!(report.top_cpu_percent.len(), 2);
        assert_eq!(report.top_cpu_percent[0].name, "firefox");
        assert_eq!(report.top_cpu_percent[0].pid, Some(20));
        assert!((report.top_cpu_percent[0].value - 40.0).abs() < 1e-3);
        assert_eq!(report.top_memory_bytes[0].value, (900u64 << 20) as f64);
    }

    #[test]
    fn test_unsupported_counters_are_null() {
        let report = SystemReport::from_snapshot(&snapshot(), &ReportOptions::default());
        assert_eq!(report.disks[0].read_bytes_per_sec, Some(4096));
        assert_eq!(report.disks[0].queue_depth, None);
        assert_eq!(report.gpus[0].utilization_percent, None);
        assert_eq!(report.gpus[0].temperature_celsius, Some(45.0));

        assert_eq!(report.cpu.per_core_percent, vec![Some(50.0), None]);
        assert_eq!(report.networks[0].received_bytes_per_sec, None);

        let json: serde_json::Value =
            serde_json::from_str(&render(&report, OutputFormat::Json)).unwrap();
        assert!(json["gpus"][0]["utilization_percent"].is_null());
        assert!(json["cpu"]["per_core_percent"][1].is_null());
        assert!(json["networks"][0]["sent_bytes_per_sec"].is_null());
        assert_eq!(json["extra"]["swap_used_bytes"], 1024);
        assert_eq!(json["processes"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_format_human() {
        let report = SystemReport::from_snapshot(&snapshot(), &ReportOptions::default());
        let text = render(&report, OutputFormat::Human);
        assert!(text.contains("CPU: 25.0% (2 logical / 1 physical cores), peak 25.0%"));
        assert!(text.contains("Cores: 50% n/a"));
        assert!(text.contains("eth0 rx n/a tx n/a"));
        assert!(text.contains("Processes (3 live, 1 dead):"));
        assert!(text.contains("firefox"));
        assert!(text.contains("queue n/a"));
        assert!(text.contains("util n/a"));
    }

    #[test]
    fn test_report_carries_history_peaks() {
        let mut snapshot = snapshot();
        snapshot.memory_used.add_value(3 << 30);
        snapshot.memory_used.add_value(1 << 30);
        snapshot.cpu_total.add_value(0.75);
        snapshot.cpu_total.add_value(0.10);

        let report = SystemReport::from_snapshot(&snapshot, &ReportOptions::default());
        assert_eq!(report.memory.used_bytes, 1 << 30);
        assert_eq!(report.memory.peak_used_bytes, 3 << 30);
        assert!((report.cpu.total_percent - 10.0).abs() < 1e-3);
        assert!((report.cpu.peak_percent - 75.0).abs() < 1e-3);
    }

    #[test]
    fn test_smoothing_averages_recent_rankings() {
        let mut snapshot = snapshot();
        snapshot.processes[2].cpu_usage.add_value(0.6);
        let spike = TopList::compute(&snapshot.processes, 2, TopMetric::Cpu);
        snapshot.top_cpu.add_value(spike);

        let newest = SystemReport::from_snapshot(&snapshot, &ReportOptions::default());
        assert_eq!(newest.top_cpu_percent[0].name, "bash");

        let options = ReportOptions {
            smoothing: 2,
            ..Default::default()
        };
        let smoothed = SystemReport::from_snapshot(&snapshot, &options);
        assert_eq!(smoothed.top_cpu_percent.len(), 2);
        assert_eq!(smoothed.top_cpu_percent[0].name, "firefox");
        assert!((smoothed.top_cpu_percent[1].value - 32.5).abs() < 1e-3);
    }

    #[test]
    fn test_format_csv() {
        let report = SystemReport::from_snapshot(&snapshot(), &ReportOptions::default());
        let text = render(&report, OutputFormat::Csv);
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,pid,parent_id,name,user,status,cpu_percent,private_bytes,start_time,death_time,command_line")
        );
        assert!(lines.next().unwrap().starts_with("2,20,,firefox,alice,running,"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_format_quiet() {
        let report = SystemReport::from_snapshot(&snapshot(), &ReportOptions::default());
        assert_eq!(render(&report, OutputFormat::Quiet), "25.0\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-process-name", 10), "a-very-...");
    }
}
