//! Resumable pagination over an ordered partition list.
//!
//! A call is described by a [`Cursor`]: skip `start` records of the logical
//! offset space, then collect up to `size` records that pass the predicate.
//! The returned `index_marker` counts the physical records examined during
//! the call, so the next call resumes at `start + index_marker`.
//!
//! The walker advances one partition per [`CursorWalker::step`]:
//!
//! ```text
//!            +-----------+  remaining_size == 0   +-----------+
//!  start --> | Progress  | ---------------------> | Satisfied |
//!            +-----------+                        +-----------+
//!                  | no partitions left
//!                  v
//!            +-----------+
//!            | Exhausted |
//!            +-----------+
//! ```

use crate::filter::{Condition, Predicate, keep_mask};
use crate::partition::{PartitionHandle, PartitionSource};
use crate::types::AssociationRecord;
use crate::{Error, Result};
use tracing::{debug, trace};

/// Default number of records requested per read.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub start: u64,
    pub size: usize,
}

impl Cursor {
    pub fn new(start: u64, size: usize) -> Self {
        Self { start, size }
    }
}

/// Outcome of one walker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A partition was skipped or read and more records are wanted.
    Progress,
    /// The requested page size has been collected.
    Satisfied,
    /// Every partition has been visited.
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<AssociationRecord>,
    pub index_marker: u64,
    /// No record can exist past `start + index_marker`.
    pub exhausted: bool,
}

pub struct CursorWalker<'a> {
    source: &'a dyn PartitionSource,
    partitions: &'a [PartitionHandle],
    predicate: &'a Predicate,
    condition: Option<Condition>,
    chunk_size: usize,
    next: usize,
    remaining_start: u64,
    remaining_size: usize,
    collected: Vec<AssociationRecord>,
    index_marker: u64,
    ended_at_tail: bool,
}

impl<'a> CursorWalker<'a> {
    pub fn new(
        source: &'a dyn PartitionSource,
        partitions: &'a [PartitionHandle],
        predicate: &'a Predicate,
        cursor: Cursor,
        chunk_size: usize,
    ) -> Self {
        let condition = if source.supports_pushdown() {
            predicate.compile()
        } else {
            None
        };
        if let Some(condition) = &condition {
            debug!(%condition, "condition pushed down");
        }
        Self {
            source,
            partitions,
            predicate,
            condition,
            chunk_size: chunk_size.max(1),
            next: 0,
            remaining_start: cursor.start,
            remaining_size: cursor.size,
            collected: Vec::with_capacity(cursor.size.min(DEFAULT_CHUNK_SIZE)),
            index_marker: 0,
            ended_at_tail: false,
        }
    }

    /// Visit the next partition: skip it when the start offset lies past its
    /// end, otherwise read from it until the page is full or it runs out.
    pub fn step(&mut self) -> Result<Step> {
        if self.remaining_size == 0 {
            return Ok(Step::Satisfied);
        }
        let Some(partition) = self.partitions.get(self.next) else {
            return Ok(Step::Exhausted);
        };
        self.next += 1;

        let size = self
            .source
            .partition_size(partition, self.condition.as_ref())?;
        if self.remaining_start >= size {
            trace!(partition = %partition.key, size, "partition skipped");
            self.remaining_start -= size;
            return Ok(Step::Progress);
        }

        let mut offset = self.remaining_start;
        self.remaining_start = 0;
        let before = self.collected.len();
        while offset < size && self.remaining_size > 0 {
            let window = usize::try_from(size - offset).unwrap_or(usize::MAX);
            let limit = window.min(self.chunk_size).min(self.remaining_size);
            let slice = self
                .source
                .read_partition(partition, offset, limit, self.condition.as_ref())?;
            if slice.consumed == 0 {
                return Err(Error::Inconsistent(format!(
                    "{} reports {} records but nothing was read at offset {}",
                    partition.key, size, offset
                )));
            }

            let consumed = if self.condition.is_some() {
                self.remaining_size = self.remaining_size.saturating_sub(slice.records.len());
                self.collected.extend(slice.records);
                slice.consumed
            } else {
                self.keep(slice.records)
            };
            offset += consumed;
            self.index_marker += consumed;
        }
        debug!(
            partition = %partition.key,
            kept = self.collected.len() - before,
            index_marker = self.index_marker,
            "partition read"
        );

        if self.remaining_size == 0 {
            self.ended_at_tail = offset >= size && self.next == self.partitions.len();
            Ok(Step::Satisfied)
        } else {
            Ok(Step::Progress)
        }
    }

    /// Filter a raw batch in order, stopping at the record that fills the page.
    /// Returns how many records were examined.
    fn keep(&mut self, records: Vec<AssociationRecord>) -> u64 {
        let mask = keep_mask(&records, self.predicate);
        let mut examined = 0;
        for (record, keep) in records.into_iter().zip(mask) {
            examined += 1;
            if keep {
                self.collected.push(record);
                self.remaining_size -= 1;
                if self.remaining_size == 0 {
                    break;
                }
            }
        }
        examined
    }

    pub fn run(mut self) -> Result<Page> {
        let exhausted = loop {
            match self.step()? {
                Step::Progress => continue,
                Step::Satisfied => break self.ended_at_tail,
                Step::Exhausted => break true,
            }
        };
        debug!(
            records = self.collected.len(),
            index_marker = self.index_marker,
            exhausted,
            "page collected"
        );
        Ok(Page {
            records: self.collected,
            index_marker: self.index_marker,
            exhausted,
        })
    }
}

/// Read and filter one whole partition in a single pass.
pub fn scan_partition(
    source: &dyn PartitionSource,
    partition: &PartitionHandle,
    predicate: &Predicate,
    chunk_size: usize,
) -> Result<Page> {
    let condition = if source.supports_pushdown() {
        predicate.compile()
    } else {
        None
    };
    let size = source.partition_size(partition, condition.as_ref())?;
    let mut page = Page {
        exhausted: true,
        ..Default::default()
    };
    while page.index_marker < size {
        let slice =
            source.read_partition(partition, page.index_marker, chunk_size.max(1), condition.as_ref())?;
        if slice.consumed == 0 {
            return Err(Error::Inconsistent(format!(
                "{} reports {} records but nothing was read at offset {}",
                partition.key, size, page.index_marker
            )));
        }
        page.index_marker += slice.consumed;
        if condition.is_some() {
            page.records.extend(slice.records);
        } else {
            let mask = keep_mask(&slice.records, predicate);
            page.records.extend(
                slice
                    .records
                    .into_iter()
                    .zip(mask)
                    .filter_map(|(record, keep)| keep.then_some(record)),
            );
        }
    }
    Ok(page)
}
