//! Taskscope system sampler library.
//!
//! Samples processes, CPU, memory, disks, network interfaces and GPUs at a
//! fixed rate into rolling per-metric histories, and publishes the result
//! as a double-buffered [`snapshot::SystemSnapshot`].
//!
//! ```no_run
//! use taskscope::config::Config;
//! use taskscope::monitor::{create_platform, sampler::{Sampler, SnapshotConsumer}};
//! use taskscope::snapshot::SystemSnapshot;
//!
//! struct PrintTotal;
//!
//! impl SnapshotConsumer for PrintTotal {
//!     fn init(&mut self, _snapshot: &SystemSnapshot) {}
//!     fn update(&mut self, snapshot: &SystemSnapshot) {
//!         println!("{:.1}%", snapshot.cpu_total.newest() * 100.0);
//!     }
//!     fn has_terminated(&self) -> bool {
//!         false
//!     }
//! }
//!
//! # async fn run() -> taskscope::types::Result<()> {
//! let sampler = Sampler::new(create_platform()?, Config::default());
//! sampler.run(Box::new(PrintTotal)).await
//! # }
//! ```

pub mod config;
pub mod filter;
pub mod monitor;
pub mod output;
pub mod process;
pub mod series;
pub mod snapshot;
pub mod toplist;
pub mod types;
