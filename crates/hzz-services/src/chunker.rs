//! Splitting datasets into contiguous record ranges.
//!
//! With E records and C expected consumers, chunks hold ceil(E / C) records
//! (optionally capped), so a dataset becomes at most C chunks of near-equal
//! size. An empty dataset yields no chunks.

use std::num::NonZeroUsize;
use std::ops::Range;

use hzz_core::records::EventChunk;

use crate::source::{EventTable, SourceError};

/// Records per chunk for a dataset of `total` records.
pub fn chunk_size(total: usize, consumers: NonZeroUsize, max: Option<NonZeroUsize>) -> usize {
    let size = total.div_ceil(consumers.get());
    match max {
        Some(max) => size.min(max.get()),
        None => size,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    consumers: NonZeroUsize,
    max_records: Option<NonZeroUsize>,
}

impl Chunker {
    pub fn new(consumers: NonZeroUsize, max_records: Option<NonZeroUsize>) -> Self {
        Self {
            consumers,
            max_records,
        }
    }

    /// Disjoint ranges covering `0..total` in order.
    pub fn ranges(&self, total: usize) -> Vec<Range<usize>> {
        let size = chunk_size(total, self.consumers, self.max_records);
        if size == 0 {
            return Vec::new();
        }
        (0..total)
            .step_by(size)
            .map(|start| start..(start + size).min(total))
            .collect()
    }

    /// Read `table` chunk by chunk.
    pub fn chunks<'a>(
        &self,
        table: &'a dyn EventTable,
    ) -> impl Iterator<Item = Result<EventChunk, SourceError>> + 'a {
        self.ranges(table.num_entries())
            .into_iter()
            .map(move |range| table.read(range))
    }
}
