//! Genomic block arithmetic.
//!
//! Records are grouped into fixed-size blocks per chromosome. A block is
//! keyed by its floor, `floor(position / block_size) * block_size`.

use crate::types::BpInterval;

/// Default block width in base pairs.
pub const BLOCK_SIZE: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    block_size: u64,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
        }
    }
}

impl BlockLayout {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Block floor for a position.
    pub fn block_floor(&self, position: u64) -> u64 {
        (position / self.block_size) * self.block_size
    }

    /// Inclusive range of block floors that may hold records in `interval`.
    ///
    /// The low side is widened by one block; callers trim to the exact
    /// interval after reading.
    pub fn block_range(&self, interval: &BpInterval) -> (u64, Option<u64>) {
        let low = interval
            .lower
            .map(|lo| self.block_floor(lo).saturating_sub(self.block_size))
            .unwrap_or(0);
        let high = interval.upper.map(|hi| self.block_floor(hi));
        (low, high)
    }

    /// Whether a block floor falls within the widened range for `interval`.
    pub fn block_in_range(&self, floor: u64, interval: &BpInterval) -> bool {
        let (low, high) = self.block_range(interval);
        floor >= low && high.is_none_or(|h| floor <= h)
    }
}
