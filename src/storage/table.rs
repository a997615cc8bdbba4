//! Per-dataset chunked tables with predicate pushdown.
//!
//! ```text
//! <root>/
//! └── <chromosome>/
//!     └── <dataset_id>/
//!         ├── sumstats.jsonl          # rows sorted by position
//!         ├── chunks.json             # table index: chunk offsets and position ranges
//!         └── genomic_context.jsonl   # gene / molecular trait -> position
//! ```
//!
//! Conditions are evaluated while the table is scanned, so offsets and sizes
//! are expressed in matching rows. Chunks whose position range cannot satisfy
//! the condition are skipped without being read.

use super::jsonl;
use crate::filter::Condition;
use crate::partition::{Layout, PartitionHandle, PartitionKey, PartitionSlice, PartitionSource, Scope};
use crate::types::{AssociationRecord, BpInterval, Chromosome};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SUMSTATS_FILE: &str = "sumstats.jsonl";
pub const INDEX_FILE: &str = "chunks.json";
pub const GENOMIC_CONTEXT_FILE: &str = "genomic_context.jsonl";

/// Table index written alongside the rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIndex {
    pub dataset_id: String,
    pub uuid: String,
    pub size: u64,
    pub chunks: Vec<ChunkEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Byte offset of the chunk's first row.
    pub offset: u64,
    pub rows: u64,
    pub min_position: u64,
    pub max_position: u64,
}

impl ChunkEntry {
    fn overlaps(&self, bounds: &BpInterval) -> bool {
        bounds.lower.is_none_or(|lo| self.max_position >= lo)
            && bounds.upper.is_none_or(|hi| self.min_position <= hi)
    }
}

/// Row of the genomic context lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomicContextEntry {
    pub feature: String,
    pub chromosome: Chromosome,
    pub position: u64,
}

#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_dir(&self, chromosome: Chromosome, dataset_id: &str) -> PathBuf {
        self.root.join(chromosome.to_string()).join(dataset_id)
    }

    pub fn read_index(&self, dir: &Path) -> Result<Option<TableIndex>> {
        match fs::read(dir.join(INDEX_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn chromosomes(&self) -> Result<Vec<Chromosome>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut chromosomes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(chromosome) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                chromosomes.push(chromosome);
            }
        }
        chromosomes.sort();
        Ok(chromosomes)
    }

    fn index_for(&self, partition: &PartitionHandle) -> Result<(PathBuf, TableIndex)> {
        let dir = partition
            .path
            .clone()
            .ok_or_else(|| Error::Internal(format!("table {} has no path", partition.key)))?;
        let index = self
            .read_index(&dir)?
            .ok_or_else(|| Error::MissingPartition(dir.join(INDEX_FILE)))?;
        Ok((dir, index))
    }

    /// Visit matching rows in table order, skipping chunks the condition rules out.
    fn scan<F>(&self, partition: &PartitionHandle, condition: &Condition, mut visit: F) -> Result<()>
    where
        F: FnMut(AssociationRecord) -> ControlFlow<()>,
    {
        let (dir, index) = self.index_for(partition)?;
        let bounds = condition.position_bounds();
        let mut reader = BufReader::new(jsonl::open_partition(&dir.join(SUMSTATS_FILE))?);
        let mut line = String::new();
        let mut pruned = 0;

        for chunk in &index.chunks {
            if !chunk.overlaps(&bounds) {
                pruned += 1;
                continue;
            }
            reader.seek(SeekFrom::Start(chunk.offset))?;
            for _ in 0..chunk.rows {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    return Err(Error::Inconsistent(format!(
                        "{} chunk at byte {} ended early",
                        partition.key, chunk.offset
                    )));
                }
                let record: AssociationRecord = serde_json::from_str(&line)?;
                if condition.eval(&record) && visit(record).is_break() {
                    return Ok(());
                }
            }
        }
        debug!(partition = %partition.key, pruned, "table scan finished");
        Ok(())
    }

    /// Unfiltered read, seeking straight to the chunk holding `offset`.
    fn read_rows(&self, partition: &PartitionHandle, offset: u64, limit: usize) -> Result<Vec<AssociationRecord>> {
        let (dir, index) = self.index_for(partition)?;
        let mut reader = BufReader::new(jsonl::open_partition(&dir.join(SUMSTATS_FILE))?);
        let mut records = Vec::new();
        let mut skip = offset;
        let mut line = String::new();

        for chunk in &index.chunks {
            if records.len() >= limit {
                break;
            }
            if skip >= chunk.rows {
                skip -= chunk.rows;
                continue;
            }
            reader.seek(SeekFrom::Start(chunk.offset))?;
            for row in 0..chunk.rows {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    return Err(Error::Inconsistent(format!(
                        "{} chunk at byte {} ended early",
                        partition.key, chunk.offset
                    )));
                }
                if row < skip {
                    continue;
                }
                records.push(serde_json::from_str(&line)?);
                if records.len() >= limit {
                    break;
                }
            }
            skip = 0;
        }
        Ok(records)
    }
}

impl PartitionSource for TableStore {
    fn list_partitions(&self, scope: &Scope) -> Result<Vec<PartitionHandle>> {
        let chromosomes = match scope.chromosome {
            Some(chromosome) => {
                if !self.root.join(chromosome.to_string()).exists() {
                    return Err(Error::NotFound(format!("chromosome {}", chromosome)));
                }
                vec![chromosome]
            }
            None => self.chromosomes()?,
        };
        let wanted: Option<HashSet<&str>> = scope
            .partitions
            .as_ref()
            .map(|ids| ids.iter().map(String::as_str).collect());

        let mut partitions = Vec::new();
        for chromosome in chromosomes {
            let chromosome_dir = self.root.join(chromosome.to_string());
            let mut datasets = Vec::new();
            for entry in fs::read_dir(&chromosome_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if wanted.as_ref().is_none_or(|w| w.contains(name)) {
                        datasets.push(name.to_string());
                    }
                }
            }
            datasets.sort();

            for dataset_id in datasets {
                let dir = chromosome_dir.join(&dataset_id);
                let Some(index) = self.read_index(&dir)? else {
                    continue;
                };
                partitions.push(PartitionHandle {
                    key: PartitionKey::Table {
                        chromosome,
                        dataset_id,
                    },
                    path: Some(dir),
                    size: index.size,
                });
            }
        }

        if wanted.is_some() && partitions.is_empty() {
            return Err(Error::NotFound(format!(
                "no tables for datasets {:?}",
                scope.partitions.as_deref().unwrap_or_default()
            )));
        }
        debug!(count = partitions.len(), "table partitions in scope");
        Ok(partitions)
    }

    fn partition_size(&self, partition: &PartitionHandle, condition: Option<&Condition>) -> Result<u64> {
        let Some(condition) = condition else {
            return Ok(partition.size);
        };
        let mut count = 0;
        self.scan(partition, condition, |_| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }

    fn read_partition(
        &self,
        partition: &PartitionHandle,
        offset: u64,
        limit: usize,
        condition: Option<&Condition>,
    ) -> Result<PartitionSlice> {
        if limit == 0 {
            return Ok(PartitionSlice::default());
        }
        let records = match condition {
            None => self.read_rows(partition, offset, limit)?,
            Some(condition) => {
                let mut records = Vec::new();
                let mut skipped = 0;
                self.scan(partition, condition, |record| {
                    if skipped < offset {
                        skipped += 1;
                        return ControlFlow::Continue(());
                    }
                    records.push(record);
                    if records.len() >= limit {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                })?;
                records
            }
        };
        let consumed = records.len() as u64;
        Ok(PartitionSlice { records, consumed })
    }

    fn supports_pushdown(&self) -> bool {
        true
    }

    fn layout(&self) -> Layout {
        Layout::File
    }

    fn genomic_context(&self, partition: &PartitionHandle, feature: &str) -> Result<Option<u64>> {
        let Some(dir) = &partition.path else {
            return Ok(None);
        };
        let path = dir.join(GENOMIC_CONTEXT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let entries: Vec<GenomicContextEntry> = jsonl::read_all(&path)?;
        Ok(entries
            .into_iter()
            .find(|e| e.feature == feature)
            .map(|e| e.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Predicate;
    use crate::loader::TableWriter;
    use crate::types::PvalueInterval;
    use tempfile::TempDir;

    fn chr1() -> Chromosome {
        Chromosome::autosome(1).unwrap()
    }

    fn records(dataset: &str) -> Vec<AssociationRecord> {
        (0..50u64)
            .map(|i| {
                let pvalue = if (25..35).contains(&i) { 0.1 } else { 0.00001 };
                let mut r = AssociationRecord::new(chr1(), 1_000 + i * 10, pvalue, "QTS1");
                r.dataset_id = Some(dataset.to_string());
                r.gene_id = Some(format!("ENSG{:02}", i / 10));
                r
            })
            .collect()
    }

    fn store() -> (TempDir, TableStore) {
        let dir = TempDir::new().unwrap();
        let writer = TableWriter::new(dir.path().to_path_buf(), 8);
        writer.write("QTD2", "u1", records("QTD2")).unwrap();
        writer.write("QTD1", "u1", records("QTD1")).unwrap();
        let store = TableStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn test_tables_listed_by_dataset() {
        let (_dir, store) = store();
        let partitions = store.list_partitions(&Scope::all()).unwrap();
        let keys: Vec<String> = partitions.iter().map(|p| p.key.to_string()).collect();
        assert_eq!(keys, vec!["/1/QTD1", "/1/QTD2"]);
        assert_eq!(partitions[0].size, 50);

        let narrowed = store
            .list_partitions(&Scope::partitions(vec!["QTD2".into()], None))
            .unwrap();
        assert_eq!(narrowed.len(), 1);

        let missing = store.list_partitions(&Scope::partitions(vec!["QTD9".into()], None));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_unfiltered_read_crosses_chunks() {
        let (_dir, store) = store();
        let partition = &store.list_partitions(&Scope::all()).unwrap()[0];
        let slice = store.read_partition(partition, 6, 5, None).unwrap();
        let positions: Vec<u64> = slice.records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1_060, 1_070, 1_080, 1_090, 1_100]);
        assert_eq!(slice.consumed, 5);

        let tail = store.read_partition(partition, 48, 5, None).unwrap();
        assert_eq!(tail.records.len(), 2);
    }

    #[test]
    fn test_pushdown_counts_and_reads_matches() {
        let (_dir, store) = store();
        let partition = &store.list_partitions(&Scope::all()).unwrap()[0];
        let predicate = Predicate {
            pvalue_interval: Some(PvalueInterval::new(Some(0.00005), Some(0.1)).unwrap()),
            ..Default::default()
        };
        let condition = predicate.compile().unwrap();
        assert_eq!(store.partition_size(partition, Some(&condition)).unwrap(), 10);

        let slice = store
            .read_partition(partition, 4, 20, Some(&condition))
            .unwrap();
        assert_eq!(slice.records.len(), 6);
        assert_eq!(slice.consumed, 6);
        assert!(slice.records.iter().all(|r| r.pvalue == 0.1));
    }

    #[test]
    fn test_position_condition_prunes_chunks() {
        let (_dir, store) = store();
        let partition = &store.list_partitions(&Scope::all()).unwrap()[0];
        let predicate = Predicate {
            bp_interval: Some(BpInterval::new(Some(1_200), Some(1_250)).unwrap()),
            ..Default::default()
        };
        let condition = predicate.compile().unwrap();
        let slice = store
            .read_partition(partition, 0, 100, Some(&condition))
            .unwrap();
        let positions: Vec<u64> = slice.records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1_200, 1_210, 1_220, 1_230, 1_240, 1_250]);
    }

    #[test]
    fn test_genomic_context_lookup() {
        let (_dir, store) = store();
        let partition = &store.list_partitions(&Scope::all()).unwrap()[0];
        assert_eq!(store.genomic_context(partition, "ENSG02").unwrap(), Some(1_200));
        assert_eq!(store.genomic_context(partition, "ENSG99").unwrap(), None);
    }
}
