mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, LogLevel};
use taskscope::monitor::{self, sampler::{Sampler, SnapshotConsumer}};
use taskscope::output::{OutputFormat, OutputFormatter, RealtimeDisplay, ReportOptions, SystemReport};
use taskscope::process;
use taskscope::snapshot::SystemSnapshot;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(args.log_level)?;

    if let Some((action, pid)) = args.control_request() {
        process::control::perform(action, pid)
            .with_context(|| format!("Failed to {} process {pid}", action.as_str()))?;
        if args.output_format() != OutputFormat::Quiet {
            println!("{} {pid}: ok", action.as_str());
        }
        return Ok(());
    }

    let config = args.config()?;
    let platform = monitor::create_platform()?;
    let sampler = Sampler::new(platform, config);
    let handle = sampler.handle();

    let options = ReportOptions {
        filter: args.filter.clone().unwrap_or_default(),
        sort: args.sort,
        direction: args.sort_direction(),
        include_dead: args.dead,
        limit: (args.output_format() == OutputFormat::Human).then_some(args.limit),
        smoothing: args.smooth,
    };

    let consumer: Box<dyn SnapshotConsumer> = if args.watch {
        Box::new(WatchConsumer::new(options.clone(), args.sample_limit()))
    } else {
        Box::new(HeadlessConsumer::new(args.sample_limit()))
    };

    let task = sampler.start(consumer);

    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping sampler");
            interrupt.stop();
        }
    });

    task.await??;

    if !args.watch {
        let report = handle
            .published()
            .read(|snapshot| SystemReport::from_snapshot(snapshot, &options))
            .await;
        OutputFormatter::format(&report, args.output_format())?;
    }

    Ok(())
}

/// Initializes the tracing subscriber; logs go to stderr so stdout stays
/// machine-readable.
fn setup_logging(log_level: LogLevel) -> Result<()> {
    let Some(level) = log_level.level() else {
        return Ok(());
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Stops the sampler after a fixed number of published samples.
struct HeadlessConsumer {
    published: u64,
    limit: Option<u64>,
}

impl HeadlessConsumer {
    fn new(limit: Option<u64>) -> Self {
        Self {
            published: 0,
            limit,
        }
    }
}

impl SnapshotConsumer for HeadlessConsumer {
    fn init(&mut self, _snapshot: &SystemSnapshot) {}

    fn update(&mut self, _snapshot: &SystemSnapshot) {
        self.published += 1;
    }

    fn has_terminated(&self) -> bool {
        self.limit.is_some_and(|limit| self.published >= limit)
    }
}

/// Redraws the live view on every published sample.
struct WatchConsumer {
    display: RealtimeDisplay,
    options: ReportOptions,
    counter: HeadlessConsumer,
    failed: bool,
}

impl WatchConsumer {
    fn new(options: ReportOptions, limit: Option<u64>) -> Self {
        Self {
            display: RealtimeDisplay::new(options.limit.unwrap_or(10)),
            options,
            counter: HeadlessConsumer::new(limit),
            failed: false,
        }
    }

    fn redraw(&mut self, snapshot: &SystemSnapshot) {
        let report = SystemReport::from_snapshot(snapshot, &self.options);
        if let Err(e) = self.display.update(&report) {
            warn!("Failed to draw live view: {}", e);
            self.failed = true;
        }
    }
}

impl SnapshotConsumer for WatchConsumer {
    fn init(&mut self, snapshot: &SystemSnapshot) {
        self.redraw(snapshot);
    }

    fn update(&mut self, snapshot: &SystemSnapshot) {
        self.counter.update(snapshot);
        self.redraw(snapshot);
    }

    fn has_terminated(&self) -> bool {
        self.failed || self.counter.has_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_consumer_counts_updates() {
        let snapshot = SystemSnapshot::with_capacity(1);
        let mut consumer = HeadlessConsumer::new(Some(2));
        consumer.init(&snapshot);
        assert!(!consumer.has_terminated());
        consumer.update(&snapshot);
        consumer.update(&snapshot);
        assert!(consumer.has_terminated());

        let unlimited = HeadlessConsumer::new(None);
        assert!(!unlimited.has_terminated());
    }
}
