//! Fixed-capacity ring buffer holding the rolling history of one metric.
//!
//! Every slot is pre-filled with a default value, so `newest()` and
//! `oldest()` are defined from construction on. Appends overwrite the
//! oldest slot; the buffer never grows or shrinks.
//!
//! Besides the write cursor the buffer counts how many samples were ever
//! written. Two buffers that mirror each other can therefore be synchronized
//! with a [`CopyMode::Delta`] copy that only moves the slots written since
//! the destination last caught up.

use crate::types::{Result, TaskscopeError};
use std::fmt;

/// How much of a source is transferred when mirroring it into a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Overwrite everything.
    Full,
    /// Only what changed since the last synchronization.
    Delta,
}

#[derive(Clone, PartialEq)]
pub struct MetricSeries<T> {
    data: Vec<T>,
    /// Next slot to be written, which is also the oldest slot.
    cursor: usize,
    /// Total number of samples ever appended.
    written: u64,
}

impl<T: Clone> MetricSeries<T> {
    /// Creates a buffer of `capacity` slots (at least one) filled with `default`.
    pub fn new(capacity: usize, default: T) -> Self {
        Self {
            data: vec![default; capacity.max(1)],
            cursor: 0,
            written: 0,
        }
    }

    pub fn add_value(&mut self, value: T) {
        self.data[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.data.len();
        self.written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of samples appended since construction.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn newest(&self) -> &T {
        let capacity = self.data.len();
        &self.data[(self.cursor + capacity - 1) % capacity]
    }

    pub fn oldest(&self) -> &T {
        &self.data[self.cursor]
    }

    /// Value at logical index `index`, where 0 is the oldest slot.
    pub fn get(&self, index: usize) -> Option<&T> {
        (index < self.data.len()).then(|| &self.data[(self.cursor + index) % self.data.len()])
    }

    /// All slots from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (head, tail) = self.data.split_at(self.cursor);
        tail.iter().chain(head.iter())
    }

    /// Lazily yields the logical slots `start..=end` (0 is the oldest).
    ///
    /// Each call produces a fresh iterator starting at `start`.
    pub fn range_iter(&self, start: usize, end: usize) -> Result<RangeIter<'_, T>> {
        if end < start || end >= self.data.len() {
            return Err(TaskscopeError::OutOfRange {
                start,
                end,
                capacity: self.data.len(),
            });
        }
        Ok(RangeIter {
            series: self,
            next: start,
            end,
        })
    }

    /// Mirrors `source` into `self`.
    ///
    /// A delta copy only moves the slots written since `self` was last
    /// synchronized; it degrades to a full copy whenever the two buffers can
    /// no longer be aligned that way. Both modes leave `self` equal to
    /// `source`.
    pub fn copy_from(&mut self, source: &Self, mode: CopyMode) {
        if mode == CopyMode::Full || !self.delta_compatible(source) {
            self.full_copy(source);
            return;
        }

        let pending = (source.written - self.written) as usize;
        if pending == 0 {
            return;
        }

        let capacity = self.data.len();
        let start = self.cursor;
        let first = pending.min(capacity - start);
        self.data[start..start + first].clone_from_slice(&source.data[start..start + first]);
        let rest = pending - first;
        if rest > 0 {
            self.data[..rest].clone_from_slice(&source.data[..rest]);
        }

        self.cursor = source.cursor;
        self.written = source.written;
    }

    fn delta_compatible(&self, source: &Self) -> bool {
        self.data.len() == source.data.len()
            && self.written <= source.written
            && source.written - self.written <= self.data.len() as u64
    }

    fn full_copy(&mut self, source: &Self) {
        self.data.clone_from(&source.data);
        self.cursor = source.cursor;
        self.written = source.written;
    }
}

impl<T: Clone + PartialOrd> MetricSeries<T> {
    /// Largest value over the whole buffer, default-filled slots included.
    pub fn max(&self) -> &T {
        let mut best = &self.data[0];
        for value in &self.data[1..] {
            if value > best {
                best = value;
            }
        }
        best
    }

    /// Smallest value over the whole buffer, default-filled slots included.
    pub fn min(&self) -> &T {
        let mut best = &self.data[0];
        for value in &self.data[1..] {
            if value < best {
                best = value;
            }
        }
        best
    }
}

impl<T: Clone + Default> Default for MetricSeries<T> {
    fn default() -> Self {
        Self::new(1, T::default())
    }
}

impl<T: fmt::Debug + Clone> fmt::Debug for MetricSeries<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator returned by [`MetricSeries::range_iter`].
pub struct RangeIter<'a, T> {
    series: &'a MetricSeries<T>,
    next: usize,
    end: usize,
}

impl<'a, T: Clone> Iterator for RangeIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.next > self.end {
            return None;
        }
        let value = self.series.get(self.next).cloned();
        self.next += 1;
        value
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end + 1).saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}
