use anyhow::Result;
use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;
use taskscope::config::Config;
use taskscope::filter::Filter;
use taskscope::output::OutputFormat;
use taskscope::process::control::ControlAction;
use taskscope::process::{SortDirection, SortKey};
use tracing::Level;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `None` disables logging entirely.
    pub fn level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "taskscope",
    version,
    about = "Sample processes, CPU, memory, disks, network and GPUs",
    long_about = "Taskscope samples the system at a fixed rate and keeps a rolling history of every metric.\n\n\
                  Without --watch it collects a few samples and prints one report of the newest values."
)]
pub struct Cli {
    #[arg(
        short = 'r',
        long = "rate",
        value_name = "HZ",
        default_value = "1.0",
        help = "Samples per second",
        value_parser = parse_rate
    )]
    pub rate: f64,

    #[arg(
        long = "buffer",
        value_name = "SECONDS",
        default_value = "60",
        help = "Seconds of history kept for every metric"
    )]
    pub buffer: usize,

    #[arg(
        long = "keep-dead",
        value_name = "DURATION",
        default_value = "60",
        help = "How long exited processes stay visible (e.g., 60, 90s, 2m)",
        value_parser = parse_keep_time
    )]
    pub keep_dead: Duration,

    #[arg(
        short = 'n',
        long = "top",
        value_name = "N",
        default_value = "10",
        help = "Size of the top CPU and memory lists"
    )]
    pub top: usize,

    #[arg(
        short = 's',
        long = "samples",
        value_name = "COUNT",
        help = "Number of samples to collect (default: 2, unlimited with --watch)",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub samples: Option<u64>,

    #[arg(
        short = 'j',
        long = "json",
        help = "Output in JSON format",
        conflicts_with_all = &["csv", "quiet"]
    )]
    pub json: bool,

    #[arg(
        short = 'c',
        long = "csv",
        help = "Output the process table in CSV format",
        conflicts_with_all = &["json", "quiet"]
    )]
    pub csv: bool,

    #[arg(
        short = 'q',
        long = "quiet",
        help = "Only output total CPU usage in percent",
        conflicts_with_all = &["json", "csv"]
    )]
    pub quiet: bool,

    #[arg(
        short = 'w',
        long = "watch",
        help = "Refresh the summary in place on every sample",
        conflicts_with_all = &["json", "csv", "quiet"]
    )]
    pub watch: bool,

    #[arg(
        short = 'f',
        long = "filter",
        value_name = "QUERY",
        help = "Only list matching processes (e.g., 'name:firefox | cpu>5')",
        value_parser = parse_filter
    )]
    pub filter: Option<Filter>,

    #[arg(
        long = "sort",
        value_name = "KEY",
        default_value = "cpu",
        help = "Sort processes by id, pid, name, user, cpu, mem, start, death, status, path, cmd or desc",
        value_parser = parse_sort
    )]
    pub sort: SortKey,

    #[arg(long = "ascending", help = "Sort in ascending order", action = ArgAction::SetTrue)]
    pub ascending: bool,

    #[arg(
        long = "limit",
        value_name = "ROWS",
        default_value = "20",
        help = "Maximum number of processes listed in human output"
    )]
    pub limit: usize,

    #[arg(
        long = "smooth",
        value_name = "SAMPLES",
        default_value = "1",
        help = "Average the top CPU and memory lists over the last SAMPLES rankings"
    )]
    pub smooth: usize,

    #[arg(long = "dead", help = "Also list exited processes still in retention")]
    pub dead: bool,

    #[arg(long = "log-level", value_enum, default_value = "warn", help = "Log level")]
    pub log_level: LogLevel,

    #[arg(
        long = "kill",
        value_name = "PID",
        help = "Kill a process and exit",
        conflicts_with_all = &["suspend", "resume"]
    )]
    pub kill: Option<u32>,

    #[arg(
        long = "suspend",
        value_name = "PID",
        help = "Suspend a process and exit",
        conflicts_with_all = &["kill", "resume"]
    )]
    pub suspend: Option<u32>,

    #[arg(
        long = "resume",
        value_name = "PID",
        help = "Resume a suspended process and exit",
        conflicts_with_all = &["kill", "suspend"]
    )]
    pub resume: Option<u32>,
}

fn parse_rate(s: &str) -> Result<f64> {
    let rate: f64 = s.parse()?;
    if !rate.is_finite() || rate <= 0.0 {
        anyhow::bail!("Rate must be a positive number of samples per second");
    }
    Ok(rate)
}

/// Accepts plain seconds or a humantime duration.
fn parse_keep_time(s: &str) -> Result<Duration> {
    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(s)
        .map_err(|_| anyhow::anyhow!("Invalid duration. Use formats like: 60, 90s, 2m, 1h"))
}

fn parse_filter(s: &str) -> Result<Filter> {
    Ok(Filter::compile(s)?)
}

fn parse_sort(s: &str) -> Result<SortKey> {
    s.parse::<SortKey>().map_err(anyhow::Error::msg)
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.csv {
            OutputFormat::Csv
        } else if self.quiet {
            OutputFormat::Quiet
        } else {
            OutputFormat::Human
        }
    }

    pub fn config(&self) -> Result<Config> {
        Ok(Config::new(self.rate, self.buffer, self.keep_dead, self.top)?)
    }

    pub fn sort_direction(&self) -> SortDirection {
        if self.ascending {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        }
    }

    /// Samples to collect before exiting; `None` runs until interrupted.
    pub fn sample_limit(&self) -> Option<u64> {
        match (self.samples, self.watch) {
            (Some(samples), _) => Some(samples),
            (None, true) => None,
            (None, false) => Some(2),
        }
    }

    pub fn control_request(&self) -> Option<(ControlAction, u32)> {
        self.kill
            .map(|pid| (ControlAction::Kill, pid))
            .or_else(|| self.suspend.map(|pid| (ControlAction::Suspend, pid)))
            .or_else(|| self.resume.map(|pid| (ControlAction::Resume, pid)))
    }
}
