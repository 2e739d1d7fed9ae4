//! Process model: identity, lifecycle status, per-process metric history
//! and the sort keys used by consumers.
//!
//! An OS pid is recycled by the operating system and is therefore not an
//! identity. Every process observed by the sampler receives a
//! [`UniqueId`] that is never reused; equality and hashing of
//! [`Process`] are defined by that id alone.

pub mod control;

use crate::series::{CopyMode, MetricSeries};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

/// System-assigned process identity, never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId(u64);

impl UniqueId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing unique ids, starting at 1.
#[derive(Debug, Default)]
pub struct UniqueIdAllocator {
    last: u64,
}

impl UniqueIdAllocator {
    pub fn next_id(&mut self) -> UniqueId {
        self.last += 1;
        UniqueId(self.last)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Running,
    Sleeping,
    Waiting,
    Zombie,
    Suspended,
    Dead,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::Waiting => "waiting",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Suspended => "suspended",
            ProcessStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(ProcessStatus::Running),
            "sleeping" => Ok(ProcessStatus::Sleeping),
            "waiting" => Ok(ProcessStatus::Waiting),
            "zombie" => Ok(ProcessStatus::Zombie),
            "suspended" | "stopped" => Ok(ProcessStatus::Suspended),
            "dead" => Ok(ProcessStatus::Dead),
            other => Err(format!("unknown process status '{other}'")),
        }
    }
}

/// Cumulative CPU time a process has spent, in the platform's tick unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessCpuTicks {
    pub user: u64,
    pub system: u64,
}

impl ProcessCpuTicks {
    pub fn total(&self) -> u64 {
        self.user + self.system
    }
}

/// Fraction of the whole machine a process used between two observations.
///
/// `aggregate_cpu_delta` is the tick count all cores together spent over
/// the same interval; dividing it by `core_count` gives the per-core
/// elapsed time. Returns `None` when the counters went backwards or no
/// time elapsed.
pub fn cpu_usage_fraction(
    previous: ProcessCpuTicks,
    current: ProcessCpuTicks,
    aggregate_cpu_delta: u64,
    core_count: usize,
) -> Option<f32> {
    if current.user < previous.user || current.system < previous.system {
        return None;
    }
    if aggregate_cpu_delta == 0 || core_count == 0 {
        return None;
    }
    let per_core_delta = aggregate_cpu_delta as f64 / core_count as f64;
    let busy = (current.user - previous.user) + (current.system - previous.system);
    Some((busy as f64 / per_core_delta / core_count as f64) as f32)
}

#[derive(Clone)]
pub struct Process {
    pub unique_id: UniqueId,
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub parent_unique_id: Option<UniqueId>,
    pub file_name: String,
    pub file_path: String,
    pub command_line: String,
    pub description: String,
    pub user_name: String,
    pub status: ProcessStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub death_time: Option<DateTime<Utc>>,
    /// CPU ticks consumed during each tick.
    pub cpu_time: MetricSeries<u64>,
    /// Fraction of the machine (0.0..=1.0) used during each tick.
    pub cpu_usage: MetricSeries<f32>,
    /// Private working set in bytes.
    pub private_working_set: MetricSeries<u64>,
    /// Set once the expensive one-time attributes were read successfully.
    pub has_read_once: bool,
    pub(crate) last_cpu_ticks: Option<ProcessCpuTicks>,
    /// OS start time in platform units, used to detect pid reuse.
    pub(crate) os_start_ticks: Option<u64>,
}

impl Process {
    pub fn new(unique_id: UniqueId, pid: u32, capacity: usize) -> Self {
        Self {
            unique_id,
            pid,
            parent_pid: None,
            parent_unique_id: None,
            file_name: String::new(),
            file_path: String::new(),
            command_line: String::new(),
            description: String::new(),
            user_name: String::new(),
            status: ProcessStatus::Running,
            start_time: None,
            death_time: None,
            cpu_time: MetricSeries::new(capacity, 0),
            cpu_usage: MetricSeries::new(capacity, 0.0),
            private_working_set: MetricSeries::new(capacity, 0),
            has_read_once: false,
            last_cpu_ticks: None,
            os_start_ticks: None,
        }
    }

    /// Name to show for the process, falling back to the pid.
    pub fn display_name(&self) -> String {
        if self.file_name.is_empty() {
            format!("pid:{}", self.pid)
        } else {
            self.file_name.clone()
        }
    }

    pub fn is_dead(&self) -> bool {
        self.status == ProcessStatus::Dead
    }

    pub fn mark_dead(&mut self, now: DateTime<Utc>) {
        self.status = ProcessStatus::Dead;
        self.death_time = Some(now);
    }

    /// Whether a dead process has outlived the retention window at `now`.
    pub fn retention_elapsed(&self, now: DateTime<Utc>, keep_time: Duration) -> bool {
        let Some(death) = self.death_time else {
            return false;
        };
        match (now - death).to_std() {
            Ok(since_death) => since_death >= keep_time,
            Err(_) => false,
        }
    }

    /// Feeds new cumulative CPU counters.
    ///
    /// The first observation only records the counters. Later observations
    /// append the tick delta and the usage fraction, provided the counters
    /// did not go backwards.
    pub fn record_cpu_ticks(
        &mut self,
        ticks: ProcessCpuTicks,
        aggregate_cpu_delta: Option<u64>,
        core_count: usize,
    ) -> Option<f32> {
        let previous = self.last_cpu_ticks.replace(ticks)?;
        let usage = cpu_usage_fraction(previous, ticks, aggregate_cpu_delta?, core_count)?;
        self.cpu_time.add_value(ticks.total() - previous.total());
        self.cpu_usage.add_value(usage);
        Some(usage)
    }

    /// Mirrors another record of the same process into this one.
    pub fn copy_from(&mut self, source: &Process, mode: CopyMode) {
        debug_assert_eq!(self.unique_id, source.unique_id);
        self.pid = source.pid;
        self.parent_pid = source.parent_pid;
        self.parent_unique_id = source.parent_unique_id;
        self.status = source.status;
        self.start_time = source.start_time;
        self.death_time = source.death_time;
        self.last_cpu_ticks = source.last_cpu_ticks;
        self.os_start_ticks = source.os_start_ticks;
        // one-time attributes only change until the first successful read
        if !self.has_read_once || mode == CopyMode::Full {
            self.file_name.clone_from(&source.file_name);
            self.file_path.clone_from(&source.file_path);
            self.command_line.clone_from(&source.command_line);
            self.description.clone_from(&source.description);
            self.user_name.clone_from(&source.user_name);
            self.has_read_once = source.has_read_once;
        }
        self.cpu_time.copy_from(&source.cpu_time, mode);
        self.cpu_usage.copy_from(&source.cpu_usage, mode);
        self.private_working_set
            .copy_from(&source.private_working_set, mode);
    }
}

impl PartialEq for Process {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for Process {}

impl Hash for Process {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_id.hash(state);
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("unique_id", &self.unique_id)
            .field("pid", &self.pid)
            .field("file_name", &self.file_name)
            .field("status", &self.status)
            .field("cpu_usage", self.cpu_usage.newest())
            .field("private_working_set", self.private_working_set.newest())
            .finish()
    }
}

/// Column a process list can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    UniqueId,
    Pid,
    Name,
    User,
    #[default]
    CpuUsage,
    Memory,
    StartTime,
    DeathTime,
    Status,
    Path,
    CommandLine,
    Description,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "id" | "unique-id" => Ok(SortKey::UniqueId),
            "pid" => Ok(SortKey::Pid),
            "name" => Ok(SortKey::Name),
            "user" => Ok(SortKey::User),
            "cpu" => Ok(SortKey::CpuUsage),
            "mem" | "memory" => Ok(SortKey::Memory),
            "start" => Ok(SortKey::StartTime),
            "death" => Ok(SortKey::DeathTime),
            "status" => Ok(SortKey::Status),
            "path" => Ok(SortKey::Path),
            "cmd" | "command-line" => Ok(SortKey::CommandLine),
            "desc" | "description" => Ok(SortKey::Description),
            other => Err(format!("unknown sort key '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Orders two processes by `key`; ties fall back to the unique id so the
/// order is total.
pub fn compare(a: &Process, b: &Process, key: SortKey, direction: SortDirection) -> Ordering {
    let ordering = match key {
        SortKey::UniqueId => a.unique_id.cmp(&b.unique_id),
        SortKey::Pid => a.pid.cmp(&b.pid),
        SortKey::Name => compare_text(&a.file_name, &b.file_name),
        SortKey::User => compare_text(&a.user_name, &b.user_name),
        SortKey::CpuUsage => a.cpu_usage.newest().total_cmp(b.cpu_usage.newest()),
        SortKey::Memory => a
            .private_working_set
            .newest()
            .cmp(b.private_working_set.newest()),
        SortKey::StartTime => a.start_time.cmp(&b.start_time),
        SortKey::DeathTime => a.death_time.cmp(&b.death_time),
        SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
        SortKey::Path => compare_text(&a.file_path, &b.file_path),
        SortKey::CommandLine => compare_text(&a.command_line, &b.command_line),
        SortKey::Description => compare_text(&a.description, &b.description),
    }
    .then_with(|| a.unique_id.cmp(&b.unique_id));

    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
