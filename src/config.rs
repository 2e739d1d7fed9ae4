//! Sampling configuration.
//!
//! A [`Config`] is built once at startup (normally from the command line)
//! and handed by reference to the loader, the sampler and every
//! [`MetricSeries`](crate::series::MetricSeries) constructor.

use crate::types::{Result, TaskscopeError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_UPDATE_RATE: f64 = 1.0;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 60;
pub const DEFAULT_DEAD_PROCESS_KEEP_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_TOP_LIST_SIZE: usize = 10;
/// Upper bound on `max_buffer_size * update_rate`; every process owns
/// several series of this length.
pub const MAX_SERIES_CAPACITY: usize = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Samples per second.
    pub update_rate: f64,
    /// Combined with `update_rate` to size every metric series.
    pub max_buffer_size: usize,
    /// How long a dead process stays in the dead list.
    #[serde(with = "duration_secs")]
    pub dead_process_keep_time: Duration,
    /// Number of entries in each top list.
    pub top_list_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_rate: DEFAULT_UPDATE_RATE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            dead_process_keep_time: DEFAULT_DEAD_PROCESS_KEEP_TIME,
            top_list_size: DEFAULT_TOP_LIST_SIZE,
        }
    }
}

impl Config {
    pub fn new(
        update_rate: f64,
        max_buffer_size: usize,
        dead_process_keep_time: Duration,
        top_list_size: usize,
    ) -> Result<Self> {
        let config = Self {
            update_rate,
            max_buffer_size,
            dead_process_keep_time,
            top_list_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.update_rate.is_finite() || self.update_rate <= 0.0 {
            return Err(TaskscopeError::InvalidConfig(format!(
                "update rate must be a positive number, got {}",
                self.update_rate
            )));
        }
        if Duration::try_from_secs_f64(1.0 / self.update_rate).is_err() {
            return Err(TaskscopeError::InvalidConfig(format!(
                "update rate {} gives an interval too long to schedule",
                self.update_rate
            )));
        }
        if self.max_buffer_size == 0 {
            return Err(TaskscopeError::InvalidConfig(
                "measurement buffer size must be at least 1".to_string(),
            ));
        }
        let slots = self.max_buffer_size as f64 * self.update_rate;
        if slots > MAX_SERIES_CAPACITY as f64 {
            return Err(TaskscopeError::InvalidConfig(format!(
                "buffer of {} s at {} Hz needs {slots:.0} slots per series, the limit is {MAX_SERIES_CAPACITY}",
                self.max_buffer_size, self.update_rate
            )));
        }
        if self.top_list_size == 0 {
            return Err(TaskscopeError::InvalidConfig(
                "top list size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Capacity shared by every metric series: `max_buffer_size * update_rate`.
    pub fn series_capacity(&self) -> usize {
        let capacity = (self.max_buffer_size as f64 * self.update_rate).round();
        if capacity.is_finite() && capacity >= 1.0 {
            capacity as usize
        } else {
            1
        }
    }

    /// Target duration of one sampling tick. An unvalidated rate falls
    /// back to the default interval.
    pub fn update_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.update_rate)
            .unwrap_or_else(|_| Duration::from_secs_f64(1.0 / DEFAULT_UPDATE_RATE))
    }
}

/// Serializes the retention time as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
