//! K-way run merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;

use crate::record::Record;

/// Merges multiple sorted record cursors into a single ascending stream.
/// Time complexity is *m* \* log(*k*) in worst case where *m* is the total
/// number of records, *k* is the number of runs (cursors).
pub struct RunMerger<C>
where
    C: Iterator<Item = io::Result<Record>>,
{
    // binary heap is max-heap by default so values are reversed to make it a
    // min-heap; each entry is the frontier (next unread record, cursor index)
    // of one still-nonexhausted cursor
    frontier: BinaryHeap<(Reverse<Record>, usize)>,
    cursors: Vec<C>,
    primed: bool,
}

impl<C> RunMerger<C>
where
    C: Iterator<Item = io::Result<Record>>,
{
    /// Creates a merger over the given cursors.
    /// Each cursor must yield records in ascending order otherwise the
    /// result is undefined.
    pub fn new<I>(cursors: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let cursors = Vec::from_iter(cursors);
        let frontier = BinaryHeap::with_capacity(cursors.len());

        return RunMerger {
            frontier,
            cursors,
            primed: false,
        };
    }
}

impl<C> Iterator for RunMerger<C>
where
    C: Iterator<Item = io::Result<Record>>,
{
    type Item = io::Result<Record>;

    /// Returns the next record from the cursors in ascending order.
    /// A cursor read error is forwarded as an `Err` item; the caller is
    /// expected to treat it as fatal rather than accept a truncated merge.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            for (idx, cursor) in self.cursors.iter_mut().enumerate() {
                if let Some(record) = cursor.next() {
                    match record {
                        Ok(record) => self.frontier.push((Reverse(record), idx)),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
            self.primed = true;
        }

        let (Reverse(record), idx) = self.frontier.pop()?;
        if let Some(next) = self.cursors[idx].next() {
            match next {
                Ok(next) => self.frontier.push((Reverse(next), idx)),
                Err(err) => return Some(Err(err)),
            }
        }

        return Some(Ok(record));
    }
}
