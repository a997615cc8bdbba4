//! Per-study document collections held in memory.
//!
//! Each study owns one collection, `study_<id>`. Collections are ordered by
//! study id and queried with a pushed-down condition: count the matching
//! documents, then skip and limit over them.

use super::jsonl;
use crate::filter::Condition;
use crate::partition::{Layout, PartitionHandle, PartitionKey, PartitionSlice, PartitionSource, Scope};
use crate::types::{AssociationRecord, Chromosome};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Arc<Vec<AssociationRecord>>,
    chromosomes: BTreeSet<Chromosome>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStore {
    collections: Arc<RwLock<BTreeMap<String, Collection>>>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one collection per `<study_id>.jsonl` file in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let store = Self::new();
        if !dir.exists() {
            return Ok(store);
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(study_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let records: Vec<AssociationRecord> = jsonl::read_all(&path)?;
            info!(study_id, count = records.len(), "collection seeded");
            store.insert_many(study_id, records)?;
        }
        Ok(store)
    }

    /// Append documents to a study's collection, creating it if needed.
    pub fn insert_many(&self, study_id: &str, records: Vec<AssociationRecord>) -> Result<()> {
        for record in &records {
            record.validate()?;
        }
        let mut collections = self.collections.write();
        let collection = collections.entry(study_id.to_string()).or_default();
        collection
            .chromosomes
            .extend(records.iter().map(|r| r.chromosome));
        let mut merged = Vec::with_capacity(collection.documents.len() + records.len());
        merged.extend(collection.documents.iter().cloned());
        merged.extend(records);
        collection.documents = Arc::new(merged);
        Ok(())
    }

    pub fn studies(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    fn documents(&self, partition: &PartitionHandle) -> Result<Arc<Vec<AssociationRecord>>> {
        let PartitionKey::Collection { study_id } = &partition.key else {
            return Err(Error::Internal(format!(
                "{} is not a collection partition",
                partition.key
            )));
        };
        self.collections
            .read()
            .get(study_id)
            .map(|c| c.documents.clone())
            .ok_or_else(|| Error::Internal(format!("collection {} disappeared", partition.key)))
    }
}

impl PartitionSource for CollectionStore {
    fn list_partitions(&self, scope: &Scope) -> Result<Vec<PartitionHandle>> {
        let collections = self.collections.read();
        if let Some(chromosome) = scope.chromosome {
            if !collections.values().any(|c| c.chromosomes.contains(&chromosome)) {
                return Err(Error::NotFound(format!("chromosome {}", chromosome)));
            }
        }
        let partitions: Vec<PartitionHandle> = collections
            .iter()
            .filter(|(study_id, _)| {
                scope
                    .partitions
                    .as_ref()
                    .is_none_or(|ids| ids.iter().any(|id| id == *study_id))
            })
            .filter(|(_, collection)| {
                scope
                    .chromosome
                    .is_none_or(|c| collection.chromosomes.contains(&c))
            })
            .map(|(study_id, collection)| PartitionHandle {
                key: PartitionKey::Collection {
                    study_id: study_id.clone(),
                },
                path: None,
                size: collection.documents.len() as u64,
            })
            .collect();

        if scope.partitions.is_some() && partitions.is_empty() {
            return Err(Error::NotFound(format!(
                "no collections for studies {:?}",
                scope.partitions.as_deref().unwrap_or_default()
            )));
        }
        debug!(count = partitions.len(), "collections in scope");
        Ok(partitions)
    }

    fn partition_size(&self, partition: &PartitionHandle, condition: Option<&Condition>) -> Result<u64> {
        let documents = self.documents(partition)?;
        Ok(match condition {
            Some(condition) => documents.iter().filter(|d| condition.eval(d)).count() as u64,
            None => documents.len() as u64,
        })
    }

    fn read_partition(
        &self,
        partition: &PartitionHandle,
        offset: u64,
        limit: usize,
        condition: Option<&Condition>,
    ) -> Result<PartitionSlice> {
        let documents = self.documents(partition)?;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let records: Vec<AssociationRecord> = documents
            .iter()
            .filter(|d| condition.is_none_or(|c| c.eval(d)))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();
        let consumed = records.len() as u64;
        Ok(PartitionSlice { records, consumed })
    }

    fn supports_pushdown(&self) -> bool {
        true
    }

    fn layout(&self) -> Layout {
        Layout::File
    }
}
