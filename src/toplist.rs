//! Ranked top-N process lists and their temporal smoothing.
//!
//! Entries reference processes by [`UniqueId`] only, so a top list never
//! keeps a process alive past its retention window.

use crate::process::{Process, UniqueId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Share of a list's total that a process missing from that list is assumed
/// to have consumed when lists are merged.
pub const ABSENT_SHARE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopMetric {
    /// Newest CPU usage fraction.
    Cpu,
    /// Newest private working set in bytes.
    Memory,
}

impl TopMetric {
    pub fn extract(&self, process: &Process) -> f64 {
        match self {
            TopMetric::Cpu => *process.cpu_usage.newest() as f64,
            TopMetric::Memory => *process.private_working_set.newest() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopEntry {
    pub value: f64,
    pub process: UniqueId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopList {
    entries: Vec<TopEntry>,
}

impl TopList {
    /// Ranks `processes` by `metric`, keeping at most `n` entries.
    ///
    /// Sorting is stable: equal values keep their enumeration order.
    pub fn compute(processes: &[Process], n: usize, metric: TopMetric) -> Self {
        let entries = processes
            .iter()
            .map(|p| TopEntry {
                value: metric.extract(p),
                process: p.unique_id,
            })
            .collect();
        Self::ranked(entries, n)
    }

    /// Merges raw lists collected over several ticks into one averaged list.
    pub fn average_of(lists: &[TopList], n: usize) -> Self {
        if lists.is_empty() {
            return Self::default();
        }
        let ids = union_in_order(lists.iter());
        let count = lists.len() as f64;
        let entries = ids
            .into_iter()
            .map(|id| {
                let sum: f64 = lists.iter().map(|list| list.value_or_imputed(id)).sum();
                TopEntry {
                    value: sum / count,
                    process: id,
                }
            })
            .collect();
        Self::ranked(entries, n)
    }

    /// Interpolates between two captured lists; `factor` 0.0 yields `first`,
    /// 1.0 yields `second`.
    pub fn weighted_average_of(first: &TopList, second: &TopList, factor: f64, n: usize) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        let ids = union_in_order([first, second].into_iter());
        let entries = ids
            .into_iter()
            .map(|id| {
                let from = first.value_or_imputed(id);
                let to = second.value_or_imputed(id);
                TopEntry {
                    value: from + (to - from) * factor,
                    process: id,
                }
            })
            .collect();
        Self::ranked(entries, n)
    }

    pub fn entries(&self) -> &[TopEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all ranked values.
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.value).sum()
    }

    pub fn value_of(&self, id: UniqueId) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.process == id)
            .map(|e| e.value)
    }

    fn value_or_imputed(&self, id: UniqueId) -> f64 {
        self.value_of(id)
            .unwrap_or_else(|| ABSENT_SHARE * self.total())
    }

    fn ranked(mut entries: Vec<TopEntry>, n: usize) -> Self {
        entries.sort_by(|a, b| b.value.total_cmp(&a.value));
        entries.truncate(n);
        Self { entries }
    }
}

fn union_in_order<'a>(lists: impl Iterator<Item = &'a TopList>) -> Vec<UniqueId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for list in lists {
        for entry in &list.entries {
            if seen.insert(entry.process) {
                ids.push(entry.process);
            }
        }
    }
    ids
}
