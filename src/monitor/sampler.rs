//! Background sampling loop and the published snapshot slot.
//!
//! The sampler task owns the working snapshot. After every loader update it
//! takes the publish lock, delta-copies the working snapshot into the
//! published one and hands it to the consumer before releasing the lock.
//! `tokio::sync::Mutex` queues waiters in FIFO order, so neither the
//! sampler nor a reading consumer can be starved.
//!
//! Scheduling sleeps `period - elapsed` after each update. Under sustained
//! overload the loop falls behind and never catches up; accumulated drift
//! is not compensated.

use super::loader::MetricsLoader;
use super::PlatformMetrics;
use crate::config::Config;
use crate::series::CopyMode;
use crate::snapshot::SystemSnapshot;
use crate::types::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Receiver of published snapshots, typically a UI.
///
/// Both callbacks run while the publish lock is held and must not block
/// for long.
pub trait SnapshotConsumer: Send {
    fn init(&mut self, snapshot: &SystemSnapshot);

    fn update(&mut self, snapshot: &SystemSnapshot);

    /// Checked once at the top of every iteration.
    fn has_terminated(&self) -> bool;
}

/// The consumer-visible snapshot behind the fair publish lock.
#[derive(Clone)]
pub struct SharedSnapshot {
    inner: Arc<Mutex<SystemSnapshot>>,
}

impl SharedSnapshot {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Runs `f` while holding the publish lock. Copy out what is needed and
    /// return quickly; the sampler waits meanwhile.
    pub async fn read<R>(&self, f: impl FnOnce(&SystemSnapshot) -> R) -> R {
        let guard = self.inner.lock().await;
        f(&guard)
    }

    /// Like [`SharedSnapshot::read`] for synchronous consumer threads.
    ///
    /// # Panics
    /// When called from within an async execution context.
    pub fn blocking_read<R>(&self, f: impl FnOnce(&SystemSnapshot) -> R) -> R {
        let guard = self.inner.blocking_lock();
        f(&guard)
    }

    async fn publish(
        &self,
        working: &SystemSnapshot,
        mode: CopyMode,
        consumer: &mut dyn SnapshotConsumer,
        first: bool,
    ) {
        let mut published = self.inner.lock().await;
        published.copy_from(working, mode);
        if first {
            consumer.init(&published);
        } else {
            consumer.update(&published);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Sampling,
    Sleeping,
    Publishing,
    Stopped,
}

/// Cloneable view on a running sampler.
#[derive(Clone)]
pub struct SamplerHandle {
    running: Arc<AtomicBool>,
    state: Arc<std::sync::Mutex<SamplerState>>,
    published: SharedSnapshot,
}

impl SamplerHandle {
    /// Requests termination; honored at the top of the next iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> SamplerState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(SamplerState::Stopped)
    }

    pub fn published(&self) -> SharedSnapshot {
        self.published.clone()
    }
}

pub struct Sampler {
    loader: MetricsLoader,
    working: SystemSnapshot,
    period: Duration,
    handle: SamplerHandle,
}

impl Sampler {
    pub fn new(platform: Box<dyn PlatformMetrics>, config: Config) -> Self {
        let working = SystemSnapshot::new(&config);
        let published = SharedSnapshot::new(SystemSnapshot::new(&config));
        Self {
            period: config.update_interval(),
            loader: MetricsLoader::new(platform, config),
            working,
            handle: SamplerHandle {
                running: Arc::new(AtomicBool::new(true)),
                state: Arc::new(std::sync::Mutex::new(SamplerState::Idle)),
                published,
            },
        }
    }

    pub fn handle(&self) -> SamplerHandle {
        self.handle.clone()
    }

    fn set_state(&self, state: SamplerState) {
        if let Ok(mut current) = self.handle.state.lock() {
            *current = state;
        }
    }

    /// Spawns the sampling loop on the current runtime.
    pub fn start(self, consumer: Box<dyn SnapshotConsumer>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(consumer))
    }

    /// Initializes the loader, publishes the initial snapshot and loops
    /// until stopped or the consumer terminates.
    ///
    /// Only initialization errors are returned; update errors are logged
    /// and the loop carries on.
    pub async fn run(mut self, mut consumer: Box<dyn SnapshotConsumer>) -> Result<()> {
        let result = self.run_inner(consumer.as_mut()).await;
        self.set_state(SamplerState::Stopped);
        result
    }

    async fn run_inner(&mut self, consumer: &mut dyn SnapshotConsumer) -> Result<()> {
        self.loader.init(&mut self.working).await?;
        self.handle
            .published
            .publish(&self.working, CopyMode::Full, consumer, true)
            .await;
        info!(period_ms = self.period.as_millis() as u64, "sampler started");

        loop {
            if !self.handle.running.load(Ordering::SeqCst) || consumer.has_terminated() {
                info!(ticks = self.working.tick, "sampler stopped");
                return Ok(());
            }

            self.set_state(SamplerState::Sampling);
            let started = Instant::now();
            if let Err(e) = self.loader.update(&mut self.working).await {
                warn!("Metrics update failed: {}", e);
            }
            let elapsed = started.elapsed();
            debug!(tick = self.working.tick, elapsed_ms = elapsed.as_millis() as u64, "sampled");

            self.set_state(SamplerState::Sleeping);
            time::sleep(self.period.saturating_sub(elapsed)).await;

            self.set_state(SamplerState::Publishing);
            self.handle
                .published
                .publish(&self.working, CopyMode::Delta, consumer, false)
                .await;
        }
    }
}
