//! Partition index and reader abstraction.
//!
//! Every storage backend exposes the same three operations to the cursor
//! walker: enumerate the partitions a query may touch, report a partition's
//! record count, and read a contiguous slice of it. The walker never branches
//! on backend type.
//!
//! # Implementations
//!
//! - [`BlockStore`](crate::storage::BlockStore) - block tree, no pushdown
//! - [`TableStore`](crate::storage::TableStore) - chunked per-dataset tables, pushdown
//! - [`CollectionStore`](crate::storage::CollectionStore) - per-study documents, pushdown

use crate::Result;
use crate::filter::Condition;
use crate::types::{AssociationRecord, BpInterval, Chromosome};
use std::fmt;
use std::path::PathBuf;

/// Selection key of one physical partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionKey {
    /// One load group of a genomic block.
    Block {
        chromosome: Chromosome,
        floor: u64,
        uuid: String,
    },
    /// One per-dataset table within a chromosome directory.
    Table {
        chromosome: Chromosome,
        dataset_id: String,
    },
    /// One per-study document collection.
    Collection { study_id: String },
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Block {
                chromosome,
                floor,
                uuid,
            } => write!(f, "/{}/{}/{}", chromosome, floor, uuid),
            PartitionKey::Table {
                chromosome,
                dataset_id,
            } => write!(f, "/{}/{}", chromosome, dataset_id),
            PartitionKey::Collection { study_id } => write!(f, "study_{}", study_id),
        }
    }
}

/// A partition as returned by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHandle {
    pub key: PartitionKey,
    /// Physical location, when the backend is file based.
    pub path: Option<PathBuf>,
    /// Declared pre-filter record count.
    pub size: u64,
}

/// Which partitions a query may touch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub chromosome: Option<Chromosome>,
    pub bp_interval: Option<BpInterval>,
    /// Dataset or study partitions resolved through the metadata lookup.
    pub partitions: Option<Vec<String>>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn chromosome(chromosome: Chromosome, bp_interval: Option<BpInterval>) -> Self {
        Self {
            chromosome: Some(chromosome),
            bp_interval,
            partitions: None,
        }
    }

    /// Chromosome scope when one is known, the whole dataset otherwise.
    pub fn chromosome_or_all(chromosome: Option<Chromosome>, bp_interval: Option<BpInterval>) -> Self {
        match chromosome {
            Some(chromosome) => Self::chromosome(chromosome, bp_interval),
            None => Self::all(),
        }
    }

    pub fn partitions(ids: Vec<String>, chromosome: Option<Chromosome>) -> Self {
        Self {
            chromosome,
            bp_interval: None,
            partitions: Some(ids),
        }
    }
}

/// Records read from one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionSlice {
    pub records: Vec<AssociationRecord>,
    /// Physical records iterated to produce `records`.
    pub consumed: u64,
}

/// How records are grouped into partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Keyed by chromosome and block floor.
    Block,
    /// Keyed by study or dataset id.
    File,
}

/// Storage backend seen by the cursor walker.
pub trait PartitionSource: Send + Sync {
    /// Ordered, stable list of partitions in scope.
    fn list_partitions(&self, scope: &Scope) -> Result<Vec<PartitionHandle>>;

    /// Records in the partition as the walker sees them: matching records
    /// when a condition is pushed down, all records otherwise.
    fn partition_size(
        &self,
        partition: &PartitionHandle,
        condition: Option<&Condition>,
    ) -> Result<u64>;

    /// Read up to `limit` records starting at `offset` in the same row space
    /// as [`partition_size`](Self::partition_size).
    fn read_partition(
        &self,
        partition: &PartitionHandle,
        offset: u64,
        limit: usize,
        condition: Option<&Condition>,
    ) -> Result<PartitionSlice>;

    /// Whether conditions are evaluated during the read.
    fn supports_pushdown(&self) -> bool;

    fn layout(&self) -> Layout;

    /// Position of a gene or molecular trait from the partition's secondary
    /// lookup table, for backends that keep one.
    fn genomic_context(&self, _partition: &PartitionHandle, _feature: &str) -> Result<Option<u64>> {
        Ok(None)
    }
}
