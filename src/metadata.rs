//! Identifier and file resolution used by the search orchestrator.
//!
//! [`MetadataLookup`] answers three questions the association store cannot
//! answer by itself: where a variant id lies, which chromosome a gene or
//! molecular trait is on, and which dataset files match a study, tissue or
//! qtl group. [`Catalog`] is a JSON-backed implementation.

use crate::types::{AssociationRecord, Chromosome};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Quantification method assumed when a dataset does not name one.
pub const DEFAULT_QUANT_METHOD: &str = "ge";

/// Narrowing filters for file resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFilter {
    pub study: Option<String>,
    pub tissue: Option<String>,
    pub qtl_group: Option<String>,
    pub quant_method: String,
}

pub trait MetadataLookup: Send + Sync {
    /// Chromosome and position of an rsid or variant id.
    fn resolve_position(&self, id: &str) -> Result<(Chromosome, u64)>;

    /// Chromosome a gene or molecular trait lies on.
    fn resolve_chromosome(&self, trait_or_gene: &str) -> Result<Chromosome>;

    /// Partition ids matching the filter, sorted. Never empty on success.
    fn resolve_files(&self, filter: &FileFilter) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantEntry {
    pub id: String,
    pub chromosome: Chromosome,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub id: String,
    pub chromosome: Chromosome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Dataset or study id naming the partition.
    pub partition: String,
    pub study_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tissue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qtl_group: Option<String>,
    #[serde(default = "default_quant_method")]
    pub quant_method: String,
}

fn default_quant_method() -> String {
    DEFAULT_QUANT_METHOD.to_string()
}

/// Metadata catalog kept as one JSON document.
///
/// ```json
/// {
///   "variants": [{"id": "rs7085086", "chromosome": "10", "position": 102814179}],
///   "features": [{"id": "ENSG00000187583", "chromosome": "1"}],
///   "files": [{"partition": "QTD000001", "study_id": "QTS000001", "qtl_group": "LCL"}]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub variants: Vec<VariantEntry>,
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Catalog {
    pub fn from_path(path: &Path) -> Result<Self> {
        let catalog: Catalog = serde_json::from_slice(&fs::read(path)?)?;
        info!(
            path = %path.display(),
            variants = catalog.variants.len(),
            features = catalog.features.len(),
            files = catalog.files.len(),
            "metadata catalog loaded"
        );
        Ok(catalog)
    }

    /// Empty catalog when the file does not exist yet.
    pub fn open_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Record the rsids, features and file entry of freshly loaded records.
    pub fn observe(&mut self, partition: &str, records: &[AssociationRecord]) {
        let mut variants: BTreeSet<&str> = self.variants.iter().map(|v| v.id.as_str()).collect();
        let mut features: BTreeSet<&str> = self.features.iter().map(|f| f.id.as_str()).collect();
        let mut new_variants = Vec::new();
        let mut new_features = Vec::new();

        for record in records {
            if let Some(rsid) = record.rsid.as_deref() {
                if variants.insert(rsid) {
                    new_variants.push(VariantEntry {
                        id: rsid.to_string(),
                        chromosome: record.chromosome,
                        position: record.position,
                    });
                }
            }
            for feature in [record.gene_id.as_deref(), record.trait_id.as_deref()]
                .into_iter()
                .flatten()
            {
                if features.insert(feature) {
                    new_features.push(FeatureEntry {
                        id: feature.to_string(),
                        chromosome: record.chromosome,
                    });
                }
            }
        }
        debug!(partition, variants = new_variants.len(), features = new_features.len(), "catalog updated");
        self.variants.extend(new_variants);
        self.features.extend(new_features);

        if let Some(first) = records.first() {
            if !self.files.iter().any(|f| f.partition == partition) {
                self.files.push(FileEntry {
                    partition: partition.to_string(),
                    study_id: first.study_id.clone(),
                    tissue_id: first.tissue_id.clone(),
                    qtl_group: first.qtl_group.clone(),
                    quant_method: default_quant_method(),
                });
            }
        }
    }
}

impl MetadataLookup for Catalog {
    fn resolve_position(&self, id: &str) -> Result<(Chromosome, u64)> {
        self.variants
            .iter()
            .find(|v| v.id == id)
            .map(|v| (v.chromosome, v.position))
            .ok_or_else(|| Error::NotFound(format!("variant {}", id)))
    }

    fn resolve_chromosome(&self, trait_or_gene: &str) -> Result<Chromosome> {
        self.features
            .iter()
            .find(|f| f.id == trait_or_gene)
            .map(|f| f.chromosome)
            .ok_or_else(|| Error::NotFound(format!("gene or trait {}", trait_or_gene)))
    }

    fn resolve_files(&self, filter: &FileFilter) -> Result<Vec<String>> {
        let files: BTreeSet<String> = self
            .files
            .iter()
            .filter(|f| f.quant_method == filter.quant_method)
            .filter(|f| filter.study.as_ref().is_none_or(|s| *s == f.study_id))
            .filter(|f| match (&filter.qtl_group, &filter.tissue) {
                (Some(group), _) => f.qtl_group.as_ref() == Some(group),
                (None, Some(tissue)) => f.tissue_id.as_ref() == Some(tissue),
                (None, None) => true,
            })
            .map(|f| f.partition.clone())
            .collect();
        if files.is_empty() {
            return Err(Error::NotFound(format!(
                "no datasets for study {:?}, tissue {:?}, qtl group {:?}, quant method {}",
                filter.study, filter.tissue, filter.qtl_group, filter.quant_method
            )));
        }
        Ok(files.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog() -> Catalog {
        serde_json::from_value(serde_json::json!({
            "variants": [{"id": "rs7085086", "chromosome": "10", "position": 102814179}],
            "features": [{"id": "ENSG00000187583", "chromosome": "1"}],
            "files": [
                {"partition": "QTD000002", "study_id": "QTS000001", "tissue_id": "UBERON_0001", "qtl_group": "LCL"},
                {"partition": "QTD000001", "study_id": "QTS000001", "tissue_id": "UBERON_0001", "qtl_group": "T-cell"},
                {"partition": "QTD000003", "study_id": "QTS000002", "tissue_id": "UBERON_0002", "qtl_group": "LCL", "quant_method": "tx"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_resolve_position_and_chromosome() {
        let catalog = catalog();
        assert_eq!(
            catalog.resolve_position("rs7085086").unwrap(),
            (Chromosome::autosome(10).unwrap(), 102814179)
        );
        assert!(matches!(catalog.resolve_position("rs1"), Err(Error::NotFound(_))));
        assert_eq!(
            catalog.resolve_chromosome("ENSG00000187583").unwrap(),
            Chromosome::autosome(1).unwrap()
        );
        assert!(matches!(catalog.resolve_chromosome("ENSG0"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_resolve_files() {
        let catalog = catalog();
        let by_study = FileFilter {
            study: Some("QTS000001".into()),
            quant_method: "ge".into(),
            ..Default::default()
        };
        assert_eq!(catalog.resolve_files(&by_study).unwrap(), vec!["QTD000001", "QTD000002"]);

        let by_group = FileFilter {
            qtl_group: Some("LCL".into()),
            tissue: Some("UBERON_0002".into()),
            quant_method: "ge".into(),
            ..Default::default()
        };
        assert_eq!(catalog.resolve_files(&by_group).unwrap(), vec!["QTD000002"]);

        let none = FileFilter {
            study: Some("QTS000002".into()),
            quant_method: "ge".into(),
            ..Default::default()
        };
        assert!(matches!(catalog.resolve_files(&none), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_observe_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let mut catalog = Catalog::open_or_default(&path).unwrap();

        let mut record = AssociationRecord::new(Chromosome::X, 500, 0.2, "QTS9");
        record.rsid = Some("rs42".into());
        record.gene_id = Some("ENSG42".into());
        catalog.observe("QTD9", &[record.clone(), record]);
        catalog.save(&path).unwrap();

        let reloaded = Catalog::from_path(&path).unwrap();
        assert_eq!(reloaded.variants.len(), 1);
        assert_eq!(reloaded.resolve_chromosome("ENSG42").unwrap(), Chromosome::X);
        assert_eq!(reloaded.files[0].quant_method, "ge");
    }
}
