//! Capacity-limited record buffer.

use crate::record::{Record, RECORD_SIZE};

/// Converts a memory budget in bytes into a chunk capacity expressed in
/// records. Returns [`None`] if the budget does not cover a single record.
pub fn chunk_capacity(memory_budget: u64) -> Option<usize> {
    let capacity = (memory_budget / RECORD_SIZE as u64) as usize;
    if capacity == 0 {
        None
    } else {
        Some(capacity)
    }
}

/// In-memory buffer holding at most one chunk worth of records.
pub struct RecordBuffer {
    limit: usize,
    inner: Vec<Record>,
}

impl RecordBuffer {
    pub fn new(limit: usize) -> Self {
        RecordBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }

    /// Adds a record to the buffer.
    pub fn push(&mut self, record: Record) {
        self.inner.push(record);
    }

    /// Returns buffer length.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached its capacity.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    /// Sorts the buffered records ascending and returns them.
    /// Records carry no secondary payload, so an unstable sort suffices.
    pub fn into_sorted(mut self) -> Vec<Record> {
        self.inner.sort_unstable();
        self.inner
    }
}
