//! Load path: assigns records to partitions and keeps size attributes current.
//!
//! Loads are single-writer. Every writer holds a [`WriteLock`] on the store
//! root for the whole load.

use crate::partition::PartitionKey;
use crate::storage::jsonl::{self, SizeAttrs};
use crate::storage::{
    BlockStore, ChunkEntry, GENOMIC_CONTEXT_FILE, GenomicContextEntry, INDEX_FILE, RECORDS_FILE,
    SUMSTATS_FILE, TableIndex, TableStore, WriteLock,
};
use crate::types::{AssociationRecord, Chromosome};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Records of one study tagged with one load identifier.
#[derive(Debug, Clone)]
pub struct LoadBatch {
    pub study_id: String,
    pub uuid: String,
    pub records: Vec<AssociationRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub study_id: String,
    pub uuid: String,
    pub records: u64,
    pub partitions: Vec<PartitionKey>,
}

/// Writes batches into a [`BlockStore`].
#[derive(Debug, Clone)]
pub struct BlockLoader {
    store: BlockStore,
}

impl BlockLoader {
    pub fn new(store: BlockStore) -> Self {
        Self { store }
    }

    /// Partition a record belongs to under load identifier `uuid`.
    pub fn assign(&self, record: &AssociationRecord, uuid: &str) -> PartitionKey {
        PartitionKey::Block {
            chromosome: record.chromosome,
            floor: self.store.layout().block_floor(record.position),
            uuid: uuid.to_string(),
        }
    }

    pub fn load(&self, batch: LoadBatch) -> Result<LoadSummary> {
        validate_identifier("study", &batch.study_id)?;
        validate_identifier("uuid", &batch.uuid)?;
        let mut records = batch.records;
        for record in &mut records {
            record.study_id.clone_from(&batch.study_id);
            record.validate()?;
        }
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Err(Error::InvalidInput(format!(
                "batch {} for study {} has no records",
                batch.uuid, batch.study_id
            )));
        };

        let _lock = WriteLock::acquire(self.store.root())?;

        let first_loaded = self.store.group_contains_study(
            first.chromosome,
            first.position,
            &batch.uuid,
            &batch.study_id,
        )?;
        let last_loaded = self.store.group_contains_study(
            last.chromosome,
            last.position,
            &batch.uuid,
            &batch.study_id,
        )?;
        match (first_loaded, last_loaded) {
            (true, true) => {
                return Err(Error::AlreadyLoaded {
                    study: batch.study_id,
                    uuid: batch.uuid,
                });
            }
            (true, false) | (false, true) => {
                return Err(Error::PartiallyLoaded {
                    study: batch.study_id,
                    uuid: batch.uuid,
                });
            }
            (false, false) => {}
        }

        let total = records.len() as u64;
        let mut by_block: BTreeMap<Chromosome, BTreeMap<u64, Vec<AssociationRecord>>> =
            BTreeMap::new();
        for record in records {
            let floor = self.store.layout().block_floor(record.position);
            by_block
                .entry(record.chromosome)
                .or_default()
                .entry(floor)
                .or_default()
                .push(record);
        }

        let mut partitions = Vec::new();
        for (chromosome, blocks) in by_block {
            info!(%chromosome, blocks = blocks.len(), study = %batch.study_id, "loading chromosome");
            let floors: Vec<u64> = blocks.keys().copied().collect();
            for (floor, records) in blocks {
                let dir = self.store.group_dir(chromosome, floor, &batch.uuid);
                fs::create_dir_all(&dir)?;
                let path = dir.join(RECORDS_FILE);
                jsonl::append(&path, &records)?;
                let size = jsonl::count_records(&path)?;
                jsonl::write_attrs(&dir, SizeAttrs { size })?;
                debug!(%chromosome, floor, size, "load group written");
                partitions.push(PartitionKey::Block {
                    chromosome,
                    floor,
                    uuid: batch.uuid.clone(),
                });
            }
            self.store.refresh_sizes(chromosome, &floors)?;
        }

        Ok(LoadSummary {
            study_id: batch.study_id,
            uuid: batch.uuid,
            records: total,
            partitions,
        })
    }
}

/// Writes one position-sorted table per dataset into a [`TableStore`] root.
#[derive(Debug, Clone)]
pub struct TableWriter {
    store: TableStore,
    chunk_rows: usize,
}

impl TableWriter {
    pub fn new(root: PathBuf, chunk_rows: usize) -> Self {
        Self {
            store: TableStore::new(root),
            chunk_rows: chunk_rows.max(1),
        }
    }

    pub fn write(
        &self,
        dataset_id: &str,
        uuid: &str,
        records: Vec<AssociationRecord>,
    ) -> Result<LoadSummary> {
        validate_identifier("dataset", dataset_id)?;
        validate_identifier("uuid", uuid)?;
        if records.is_empty() {
            return Err(Error::InvalidInput(format!("dataset {} has no records", dataset_id)));
        }
        for record in &records {
            record.validate()?;
        }

        let _lock = WriteLock::acquire(self.store.root())?;

        let total = records.len() as u64;
        let mut by_chromosome: BTreeMap<Chromosome, Vec<AssociationRecord>> = BTreeMap::new();
        for mut record in records {
            record.dataset_id = Some(dataset_id.to_string());
            by_chromosome.entry(record.chromosome).or_default().push(record);
        }

        for chromosome in by_chromosome.keys() {
            let dir = self.store.table_dir(*chromosome, dataset_id);
            if let Some(existing) = self.store.read_index(&dir)? {
                return Err(Error::AlreadyLoaded {
                    study: dataset_id.to_string(),
                    uuid: existing.uuid,
                });
            }
        }

        let mut partitions = Vec::new();
        for (chromosome, mut rows) in by_chromosome {
            rows.sort_by_key(|r| r.position);
            let dir = self.store.table_dir(chromosome, dataset_id);
            if dir.exists() {
                // Leftovers of an interrupted write have no index.
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;

            let sumstats = dir.join(SUMSTATS_FILE);
            let mut chunks = Vec::new();
            let mut offset = 0;
            for chunk in rows.chunks(self.chunk_rows) {
                let written = jsonl::append(&sumstats, chunk)?;
                chunks.push(ChunkEntry {
                    offset,
                    rows: chunk.len() as u64,
                    min_position: chunk.first().map_or(0, |r| r.position),
                    max_position: chunk.last().map_or(0, |r| r.position),
                });
                offset += written;
            }

            jsonl::append(&dir.join(GENOMIC_CONTEXT_FILE), &genomic_context(chromosome, &rows))?;

            let index = TableIndex {
                dataset_id: dataset_id.to_string(),
                uuid: uuid.to_string(),
                size: rows.len() as u64,
                chunks,
            };
            fs::write(dir.join(INDEX_FILE), serde_json::to_vec_pretty(&index)?)?;
            info!(%chromosome, dataset_id, rows = index.size, chunks = index.chunks.len(), "table written");

            partitions.push(PartitionKey::Table {
                chromosome,
                dataset_id: dataset_id.to_string(),
            });
        }

        Ok(LoadSummary {
            study_id: dataset_id.to_string(),
            uuid: uuid.to_string(),
            records: total,
            partitions,
        })
    }
}

/// Appends study documents to the seed files read by
/// [`CollectionStore::open`](crate::storage::CollectionStore::open).
#[derive(Debug, Clone)]
pub struct CollectionWriter {
    root: PathBuf,
}

impl CollectionWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn write(&self, study_id: &str, mut records: Vec<AssociationRecord>) -> Result<LoadSummary> {
        validate_identifier("study", study_id)?;
        if records.is_empty() {
            return Err(Error::InvalidInput(format!("study {} has no records", study_id)));
        }
        for record in &mut records {
            record.study_id = study_id.to_string();
            record.validate()?;
        }

        let _lock = WriteLock::acquire(&self.root)?;
        let path = self.root.join(format!("{}.jsonl", study_id));
        jsonl::append(&path, &records)?;
        info!(study_id, records = records.len(), "collection seed appended");

        Ok(LoadSummary {
            study_id: study_id.to_string(),
            uuid: String::new(),
            records: records.len() as u64,
            partitions: vec![PartitionKey::Collection {
                study_id: study_id.to_string(),
            }],
        })
    }
}

/// First position of every gene and molecular trait in position-sorted rows.
fn genomic_context(chromosome: Chromosome, rows: &[AssociationRecord]) -> Vec<GenomicContextEntry> {
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for row in rows {
        for feature in [&row.gene_id, &row.trait_id].into_iter().flatten() {
            if seen.insert(feature.clone()) {
                entries.push(GenomicContextEntry {
                    feature: feature.clone(),
                    chromosome,
                    position: row.position,
                });
            }
        }
    }
    entries
}

fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid {} identifier: {:?}", kind, value)))
    }
}
