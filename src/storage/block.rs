//! Block-partitioned association store.
//!
//! ```text
//! <root>/
//! └── <chromosome>/
//!     ├── attrs.json                 # {"size": sum of block sizes}
//!     └── <block_floor>/
//!         ├── attrs.json             # {"size": sum of load group sizes}
//!         └── <load_uuid>/
//!             ├── attrs.json         # {"size": records in the group}
//!             └── records.jsonl
//! ```
//!
//! Each load group is one partition. Reads return raw rows; filtering is
//! left to the cursor walker.
//!
//! Record files are append-only, so the byte offset of a line never moves.
//! The store remembers where the last read of each file stopped and resumes
//! from there when the next read starts at or after that line.

use super::jsonl::{self, LinePosition, SizeAttrs};
use crate::block::BlockLayout;
use crate::filter::Condition;
use crate::partition::{Layout, PartitionHandle, PartitionKey, PartitionSlice, PartitionSource, Scope};
use crate::types::{AssociationRecord, Chromosome};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const RECORDS_FILE: &str = "records.jsonl";

#[derive(Debug, Clone)]
pub struct BlockStore {
    root: PathBuf,
    layout: BlockLayout,
    read_positions: Arc<Mutex<HashMap<PathBuf, LinePosition>>>,
}

impl BlockStore {
    pub fn new(root: PathBuf, layout: BlockLayout) -> Self {
        Self {
            root,
            layout,
            read_positions: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    pub fn chromosome_dir(&self, chromosome: Chromosome) -> PathBuf {
        self.root.join(chromosome.to_string())
    }

    pub fn block_dir(&self, chromosome: Chromosome, floor: u64) -> PathBuf {
        self.chromosome_dir(chromosome).join(floor.to_string())
    }

    pub fn group_dir(&self, chromosome: Chromosome, floor: u64, uuid: &str) -> PathBuf {
        self.block_dir(chromosome, floor).join(uuid)
    }

    /// Chromosomes present in the store, in natural order.
    pub fn chromosomes(&self) -> Result<Vec<Chromosome>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut chromosomes: Vec<Chromosome> = subdirectories(&self.root)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        chromosomes.sort();
        Ok(chromosomes)
    }

    /// Declared chromosome size, from its attribute file.
    pub fn chromosome_size(&self, chromosome: Chromosome) -> Result<u64> {
        let dir = self.chromosome_dir(chromosome);
        if !dir.exists() {
            return Err(Error::NotFound(format!("chromosome {}", chromosome)));
        }
        Ok(jsonl::read_attrs(&dir)?.unwrap_or_default().size)
    }

    /// Block floors stored for a chromosome, ascending.
    pub fn blocks(&self, chromosome: Chromosome) -> Result<Vec<u64>> {
        let mut floors: Vec<u64> = subdirectories(&self.chromosome_dir(chromosome))?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        floors.sort_unstable();
        Ok(floors)
    }

    /// Load groups of a block with their declared sizes, ordered by uuid.
    pub fn groups(&self, chromosome: Chromosome, floor: u64) -> Result<Vec<(String, u64)>> {
        let block_dir = self.block_dir(chromosome, floor);
        let mut uuids = subdirectories(&block_dir)?;
        uuids.sort();
        uuids
            .into_iter()
            .map(|uuid| {
                let size = jsonl::read_attrs(&block_dir.join(&uuid))?
                    .unwrap_or_default()
                    .size;
                Ok((uuid, size))
            })
            .collect()
    }

    /// Whether a load group already holds a record of `study` at `position`'s block.
    pub fn group_contains_study(
        &self,
        chromosome: Chromosome,
        position: u64,
        uuid: &str,
        study: &str,
    ) -> Result<bool> {
        let floor = self.layout.block_floor(position);
        let path = self.group_dir(chromosome, floor, uuid).join(RECORDS_FILE);
        if !path.exists() {
            return Ok(false);
        }
        let records: Vec<AssociationRecord> = jsonl::read_all(&path)?;
        Ok(records.iter().any(|r| r.study_id == study))
    }

    /// Recount every load group and check the declared sizes bottom-up.
    pub fn verify(&self) -> Result<()> {
        for chromosome in self.chromosomes()? {
            let mut chromosome_total = 0;
            for floor in self.blocks(chromosome)? {
                let mut block_total = 0;
                for (uuid, declared) in self.groups(chromosome, floor)? {
                    let path = self.group_dir(chromosome, floor, &uuid).join(RECORDS_FILE);
                    let actual = jsonl::count_records(&path)?;
                    if actual != declared {
                        return Err(Error::Inconsistent(format!(
                            "/{}/{}/{} declares {} records but holds {}",
                            chromosome, floor, uuid, declared, actual
                        )));
                    }
                    block_total += actual;
                }
                let declared = jsonl::read_attrs(&self.block_dir(chromosome, floor))?
                    .unwrap_or_default()
                    .size;
                if declared != block_total {
                    return Err(Error::Inconsistent(format!(
                        "block /{}/{} declares {} records but its groups hold {}",
                        chromosome, floor, declared, block_total
                    )));
                }
                chromosome_total += block_total;
            }
            let declared = self.chromosome_size(chromosome)?;
            if declared != chromosome_total {
                return Err(Error::Inconsistent(format!(
                    "chromosome {} declares {} records but its blocks hold {}",
                    chromosome, declared, chromosome_total
                )));
            }
        }
        Ok(())
    }

    /// Recompute block and chromosome sizes after a load touched `floors`.
    pub(crate) fn refresh_sizes(&self, chromosome: Chromosome, floors: &[u64]) -> Result<()> {
        for &floor in floors {
            let size: u64 = self.groups(chromosome, floor)?.iter().map(|(_, s)| s).sum();
            jsonl::write_attrs(&self.block_dir(chromosome, floor), SizeAttrs { size })?;
        }
        let mut size = 0;
        for floor in self.blocks(chromosome)? {
            size += jsonl::read_attrs(&self.block_dir(chromosome, floor))?
                .unwrap_or_default()
                .size;
        }
        jsonl::write_attrs(&self.chromosome_dir(chromosome), SizeAttrs { size })?;
        debug!(%chromosome, size, "chromosome size refreshed");
        Ok(())
    }
}

impl PartitionSource for BlockStore {
    fn list_partitions(&self, scope: &Scope) -> Result<Vec<PartitionHandle>> {
        if scope.partitions.is_some() {
            return Err(Error::InvalidInput(
                "block store is not partitioned by study or dataset".to_string(),
            ));
        }

        let chromosomes = match scope.chromosome {
            Some(chromosome) => {
                if !self.chromosome_dir(chromosome).exists() {
                    return Err(Error::NotFound(format!("chromosome {}", chromosome)));
                }
                vec![chromosome]
            }
            None => self.chromosomes()?,
        };

        let mut partitions = Vec::new();
        for chromosome in chromosomes {
            for floor in self.blocks(chromosome)? {
                if let Some(bp) = &scope.bp_interval {
                    if !self.layout.block_in_range(floor, bp) {
                        continue;
                    }
                }
                for (uuid, size) in self.groups(chromosome, floor)? {
                    let path = self.group_dir(chromosome, floor, &uuid).join(RECORDS_FILE);
                    partitions.push(PartitionHandle {
                        key: PartitionKey::Block {
                            chromosome,
                            floor,
                            uuid,
                        },
                        path: Some(path),
                        size,
                    });
                }
            }
        }
        debug!(count = partitions.len(), "block partitions in scope");
        Ok(partitions)
    }

    fn partition_size(&self, partition: &PartitionHandle, _: Option<&Condition>) -> Result<u64> {
        Ok(partition.size)
    }

    fn read_partition(
        &self,
        partition: &PartitionHandle,
        offset: u64,
        limit: usize,
        _: Option<&Condition>,
    ) -> Result<PartitionSlice> {
        let path = partition
            .path
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("block partition {} has no path", partition.key)))?;
        let available = partition.size.saturating_sub(offset);
        let wanted = usize::try_from(available).unwrap_or(usize::MAX).min(limit);
        if wanted == 0 {
            return Ok(PartitionSlice::default());
        }

        let from = self
            .read_positions
            .lock()
            .get(path)
            .copied()
            .filter(|p| p.line <= offset)
            .unwrap_or_default();
        let (records, end): (Vec<AssociationRecord>, _) =
            jsonl::read_slice_from(path, from, offset, wanted)?;
        self.read_positions.lock().insert(path.clone(), end);
        if records.len() < wanted {
            return Err(Error::Inconsistent(format!(
                "{} declares {} records but ended after {}",
                partition.key,
                partition.size,
                offset + records.len() as u64
            )));
        }
        let consumed = records.len() as u64;
        Ok(PartitionSlice { records, consumed })
    }

    fn supports_pushdown(&self) -> bool {
        false
    }

    fn layout(&self) -> Layout {
        Layout::Block
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
