//! Association search orchestrator.
//!
//! Turns free-form query parameters into a partition scope and a predicate,
//! then serves the page through the cursor walker, or through a single
//! unpaginated scan when exactly one partition is in scope and the caller
//! asked for it.

use crate::cursor::{Cursor, CursorWalker, DEFAULT_CHUNK_SIZE, Page, scan_partition};
use crate::filter::{GenomicContext, Predicate};
use crate::metadata::{DEFAULT_QUANT_METHOD, FileFilter, MetadataLookup};
use crate::partition::{Layout, PartitionSource, Scope};
use crate::types::{BpInterval, Chromosome, Interval, SearchResult};
use crate::{Error, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Half width of the region searched around a gene or molecular trait.
pub const GENOMIC_CONTEXT_WINDOW: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub default_size: usize,
    pub max_size: usize,
    pub chunk_size: usize,
    pub quant_method: String,
    pub context_window: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 1_000,
            chunk_size: DEFAULT_CHUNK_SIZE,
            quant_method: DEFAULT_QUANT_METHOD.to_string(),
            context_window: GENOMIC_CONTEXT_WINDOW,
        }
    }
}

/// Query parameters accepted by [`AssociationSearch::search`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchParams {
    pub start: Option<u64>,
    pub size: Option<usize>,
    pub chromosome: Option<Chromosome>,
    pub bp_lower: Option<u64>,
    pub bp_upper: Option<u64>,
    pub p_lower: Option<f64>,
    pub p_upper: Option<f64>,
    /// rsid or `chr<C>_<BP>_<REF>_<ALT>` variant id.
    pub snp: Option<String>,
    pub variant_id: Option<String>,
    pub rsid: Option<String>,
    pub study: Option<String>,
    #[serde(rename = "trait")]
    pub trait_id: Option<String>,
    pub gene_id: Option<String>,
    pub tissue: Option<String>,
    pub qtl_group: Option<String>,
    pub quant_method: Option<String>,
    pub paginate: Option<bool>,
}

pub struct AssociationSearch {
    source: Arc<dyn PartitionSource>,
    metadata: Arc<dyn MetadataLookup>,
    config: SearchConfig,
}

impl AssociationSearch {
    pub fn new(
        source: Arc<dyn PartitionSource>,
        metadata: Arc<dyn MetadataLookup>,
        config: SearchConfig,
    ) -> Self {
        Self {
            source,
            metadata,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn search(&self, params: &SearchParams) -> Result<SearchResult> {
        let cursor = Cursor::new(params.start.unwrap_or(0), self.page_size(params.size)?);
        let pvalue_interval = interval(params.p_lower, params.p_upper)?;
        let bp = interval(params.bp_lower, params.bp_upper)?;
        if bp.is_some() && params.chromosome.is_none() {
            return Err(Error::InvalidInput(
                "a base pair range requires a chromosome".to_string(),
            ));
        }

        let (variant_id, rsid) = split_snp(params)?;
        let context = GenomicContext::exclusive(
            variant_id.as_deref(),
            rsid.as_deref(),
            params.chromosome.zip(bp),
        )?;

        let mut predicate = Predicate {
            pvalue_interval,
            trait_id: params.trait_id.clone(),
            gene_id: params.gene_id.clone(),
            ..Default::default()
        };
        let mut chromosome = params.chromosome;
        match context {
            Some(GenomicContext::Variant(id)) => {
                let (c, position) = match parse_variant_id(&id) {
                    Some(location) => location,
                    None => self.metadata.resolve_position(&id)?,
                };
                chromosome = Some(pin_chromosome(params.chromosome, c, &id)?);
                predicate.bp_interval = Some(BpInterval::single(position));
                predicate.variant_id = Some(id);
            }
            Some(GenomicContext::Rsid(id)) => {
                let (c, position) = self.metadata.resolve_position(&id)?;
                chromosome = Some(pin_chromosome(params.chromosome, c, &id)?);
                predicate.bp_interval = Some(BpInterval::single(position));
                predicate.rsid = Some(id);
            }
            Some(GenomicContext::Region { interval, .. }) => {
                predicate.bp_interval = Some(interval);
            }
            None => {}
        }
        if chromosome.is_none() {
            if let Some(feature) = params.gene_id.as_ref().or(params.trait_id.as_ref()) {
                chromosome = Some(self.metadata.resolve_chromosome(feature)?);
            }
        }

        // qtl_group supersedes tissue
        let tissue = params.tissue.clone().filter(|_| params.qtl_group.is_none());
        let scope = match self.source.layout() {
            Layout::Block => {
                predicate.study_id = params.study.clone();
                predicate.tissue_id = tissue;
                predicate.qtl_group = params.qtl_group.clone();
                Scope::chromosome_or_all(chromosome, predicate.bp_interval)
            }
            Layout::File => {
                predicate.chromosome = chromosome;
                let narrowed = params.study.is_some() || tissue.is_some() || params.qtl_group.is_some();
                if narrowed {
                    let files = self.metadata.resolve_files(&FileFilter {
                        study: params.study.clone(),
                        tissue,
                        qtl_group: params.qtl_group.clone(),
                        quant_method: params
                            .quant_method
                            .clone()
                            .unwrap_or_else(|| self.config.quant_method.clone()),
                    })?;
                    debug!(?files, "files resolved");
                    Scope::partitions(files, chromosome)
                } else {
                    Scope::chromosome_or_all(chromosome, None)
                }
            }
        };

        let partitions = self.source.list_partitions(&scope)?;
        if partitions.len() == 1 && predicate.bp_interval.is_none() {
            if let Some(feature) = params.gene_id.as_ref().or(params.trait_id.as_ref()) {
                if let Some(position) = self.source.genomic_context(&partitions[0], feature)? {
                    let window = self.config.context_window;
                    predicate.bp_interval = Some(BpInterval::new(
                        Some(position.saturating_sub(window)),
                        Some(position.saturating_add(window)),
                    )?);
                    debug!(feature, position, "search narrowed to genomic context");
                }
            }
        }
        info!(
            partitions = partitions.len(),
            start = cursor.start,
            size = cursor.size,
            "searching associations"
        );

        let unpaginated = params.paginate == Some(false);
        let (page, paginated) = if unpaginated && partitions.len() == 1 && !predicate.is_empty() {
            let page = scan_partition(
                self.source.as_ref(),
                &partitions[0],
                &predicate,
                self.config.chunk_size,
            )?;
            (page, false)
        } else {
            if unpaginated {
                warn!(
                    partitions = partitions.len(),
                    filtered = !predicate.is_empty(),
                    "unpaginated search needs one partition and a filter; paginating"
                );
            }
            let page = CursorWalker::new(
                self.source.as_ref(),
                &partitions,
                &predicate,
                cursor,
                self.config.chunk_size,
            )
            .run()?;
            (page, true)
        };

        let Page {
            records,
            index_marker,
            exhausted,
        } = page;
        Ok(SearchResult {
            associations: records
                .into_iter()
                .map(|r| r.with_neg_log10_pvalue())
                .collect(),
            index_marker,
            paginated,
            exhausted,
        })
    }

    fn page_size(&self, size: Option<usize>) -> Result<usize> {
        match size {
            Some(0) => Err(Error::InvalidInput("size must be positive".to_string())),
            Some(size) => Ok(size.min(self.config.max_size)),
            None => Ok(self.config.default_size),
        }
    }
}

fn interval<T>(lower: Option<T>, upper: Option<T>) -> Result<Option<Interval<T>>>
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if lower.is_none() && upper.is_none() {
        return Ok(None);
    }
    Interval::new(lower, upper).map(Some)
}

/// Sort `snp` into a variant id or an rsid.
fn split_snp(params: &SearchParams) -> Result<(Option<String>, Option<String>)> {
    let Some(snp) = params.snp.as_deref() else {
        return Ok((params.variant_id.clone(), params.rsid.clone()));
    };
    if params.variant_id.is_some() || params.rsid.is_some() {
        return Err(Error::InvalidInput(
            "snp cannot be combined with variant_id or rsid".to_string(),
        ));
    }
    if is_rsid(snp) {
        Ok((None, Some(snp.to_string())))
    } else if parse_variant_id(snp).is_some() {
        Ok((Some(snp.to_string()), None))
    } else {
        Err(Error::InvalidInput(format!("unrecognised variant identifier: {}", snp)))
    }
}

fn is_rsid(id: &str) -> bool {
    id.strip_prefix("rs")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Location encoded in a `chr<C>_<BP>_<REF>_<ALT>` variant id.
pub fn parse_variant_id(id: &str) -> Option<(Chromosome, u64)> {
    let mut parts = id.split('_');
    let chromosome = parts.next()?.strip_prefix("chr")?.parse().ok()?;
    let position = parts.next()?.parse().ok()?;
    let reference = parts.next()?;
    let alternate = parts.next()?;
    if reference.is_empty() || alternate.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((chromosome, position))
}

fn pin_chromosome(requested: Option<Chromosome>, resolved: Chromosome, id: &str) -> Result<Chromosome> {
    match requested {
        Some(c) if c != resolved => Err(Error::NotFound(format!(
            "{} is on chromosome {}, not {}",
            id, resolved, c
        ))),
        _ => Ok(resolved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockLayout;
    use crate::loader::{BlockLoader, LoadBatch, TableWriter};
    use crate::metadata::Catalog;
    use crate::storage::{BlockStore, CollectionStore, TableStore};
    use crate::types::AssociationRecord;
    use tempfile::TempDir;

    fn chr(n: u8) -> Chromosome {
        Chromosome::autosome(n).unwrap()
    }

    fn record(chromosome: Chromosome, position: u64, pvalue: f64, study: &str) -> AssociationRecord {
        let mut r = AssociationRecord::new(chromosome, position, pvalue, study);
        r.rsid = Some(format!("rs{}", position));
        r.variant_id = Some(format!("chr{}_{}_A_G", chromosome, position));
        r
    }

    fn block_search(records: Vec<AssociationRecord>, catalog: Catalog) -> (TempDir, AssociationSearch) {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path().to_path_buf(), BlockLayout::new(100));
        BlockLoader::new(store.clone())
            .load(LoadBatch {
                study_id: "s1".into(),
                uuid: "u1".into(),
                records,
            })
            .unwrap();
        let search = AssociationSearch::new(Arc::new(store), Arc::new(catalog), SearchConfig::default());
        (dir, search)
    }

    #[test]
    fn test_parse_variant_id() {
        assert_eq!(parse_variant_id("chr1_1120431_A_G"), Some((chr(1), 1120431)));
        assert_eq!(parse_variant_id("chrX_5_AT_G"), Some((Chromosome::X, 5)));
        assert_eq!(parse_variant_id("1_1120431_A_G"), None);
        assert_eq!(parse_variant_id("chr1_abc_A_G"), None);
        assert_eq!(parse_variant_id("chr1_5_A"), None);
        assert!(is_rsid("rs123"));
        assert!(!is_rsid("rs"));
        assert!(!is_rsid("rs12a"));
    }

    #[test]
    fn test_page_size_rules() {
        let (_dir, search) = block_search(vec![record(chr(1), 10, 0.1, "s1")], Catalog::default());
        assert_eq!(search.page_size(None).unwrap(), 20);
        assert_eq!(search.page_size(Some(5000)).unwrap(), 1000);
        assert!(matches!(search.page_size(Some(0)), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_bp_range_is_trimmed() {
        let records = (200..=400).step_by(25).map(|p| record(chr(1), p, 0.1, "s1")).collect();
        let (_dir, search) = block_search(records, Catalog::default());
        let result = search
            .search(&SearchParams {
                chromosome: Some(chr(1)),
                bp_lower: Some(250),
                bp_upper: Some(350),
                size: Some(100),
                ..Default::default()
            })
            .unwrap();
        let positions: Vec<u64> = result.associations.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![250, 275, 300, 325, 350]);
        assert!(result.exhausted);
        assert!(result
            .associations
            .iter()
            .all(|r| r.neg_log10_pvalue.is_some_and(|v| (v - 1.0).abs() < 1e-9)));
    }

    #[test]
    fn test_snp_resolution() {
        let records = vec![record(chr(1), 10, 0.1, "s1"), record(chr(1), 20, 0.1, "s1")];
        let catalog: Catalog = serde_json::from_value(serde_json::json!({
            "variants": [{"id": "rs20", "chromosome": "1", "position": 20}]
        }))
        .unwrap();
        let (_dir, search) = block_search(records, catalog);

        let by_rsid = search
            .search(&SearchParams {
                snp: Some("rs20".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_rsid.associations.len(), 1);
        assert_eq!(by_rsid.associations[0].position, 20);

        let by_variant = search
            .search(&SearchParams {
                snp: Some("chr1_10_A_G".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_variant.associations[0].position, 10);

        let unknown = search.search(&SearchParams {
            snp: Some("rs99".into()),
            ..Default::default()
        });
        assert!(matches!(unknown, Err(Error::NotFound(_))));

        let malformed = search.search(&SearchParams {
            snp: Some("not-a-variant".into()),
            ..Default::default()
        });
        assert!(matches!(malformed, Err(Error::InvalidInput(_))));

        let elsewhere = search.search(&SearchParams {
            snp: Some("rs20".into()),
            chromosome: Some(chr(2)),
            ..Default::default()
        });
        assert!(matches!(elsewhere, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_conflicting_inputs() {
        let (_dir, search) = block_search(vec![record(chr(1), 10, 0.1, "s1")], Catalog::default());
        let both = search.search(&SearchParams {
            variant_id: Some("chr1_10_A_G".into()),
            rsid: Some("rs10".into()),
            ..Default::default()
        });
        assert!(matches!(both, Err(Error::InvalidInput(_))));

        let inverted = search.search(&SearchParams {
            p_lower: Some(0.5),
            p_upper: Some(0.1),
            ..Default::default()
        });
        assert!(matches!(inverted, Err(Error::InvalidRange(_))));

        let no_chromosome = search.search(&SearchParams {
            bp_lower: Some(1),
            ..Default::default()
        });
        assert!(matches!(no_chromosome, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unpaginated_fast_path() {
        let records = (0..30).map(|i| record(chr(1), i, if i < 10 { 0.5 } else { 0.01 }, "s1")).collect();
        let (_dir, search) = block_search(records, Catalog::default());
        let params = SearchParams {
            p_upper: Some(0.05),
            paginate: Some(false),
            size: Some(5),
            ..Default::default()
        };
        let result = search.search(&params).unwrap();
        assert!(!result.paginated);
        assert_eq!(result.associations.len(), 20);
        assert_eq!(result.index_marker, 30);

        let unfiltered = search
            .search(&SearchParams {
                paginate: Some(false),
                size: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert!(unfiltered.paginated);
        assert_eq!(unfiltered.associations.len(), 5);
    }

    #[test]
    fn test_gene_resolves_chromosome() {
        let mut on_two = record(chr(2), 10, 0.1, "s1");
        on_two.gene_id = Some("ENSG1".into());
        let mut on_one = record(chr(1), 10, 0.1, "s1");
        on_one.gene_id = Some("ENSG1".into());
        let catalog: Catalog = serde_json::from_value(serde_json::json!({
            "features": [{"id": "ENSG1", "chromosome": "2"}]
        }))
        .unwrap();
        let (_dir, search) = block_search(vec![on_one, on_two], catalog);
        let result = search
            .search(&SearchParams {
                gene_id: Some("ENSG1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.associations.len(), 1);
        assert_eq!(result.associations[0].chromosome, chr(2));
    }

    fn table_search() -> (TempDir, AssociationSearch) {
        let dir = TempDir::new().unwrap();
        let writer = TableWriter::new(dir.path().to_path_buf(), 16);
        for (dataset, study) in [("QTD1", "QTS1"), ("QTD2", "QTS2")] {
            let records = (0..40u64)
                .map(|i| {
                    let mut r = record(chr(1), 1_000_000 + i * 100_000, 0.01, study);
                    r.gene_id = Some(format!("ENSG{}", i % 4));
                    r
                })
                .collect();
            writer.write(dataset, "u1", records).unwrap();
        }
        let catalog: Catalog = serde_json::from_value(serde_json::json!({
            "features": [{"id": "ENSG1", "chromosome": "1"}],
            "files": [
                {"partition": "QTD1", "study_id": "QTS1", "qtl_group": "LCL"},
                {"partition": "QTD2", "study_id": "QTS2", "qtl_group": "monocyte"}
            ]
        }))
        .unwrap();
        let store = TableStore::new(dir.path().to_path_buf());
        let search = AssociationSearch::new(Arc::new(store), Arc::new(catalog), SearchConfig::default());
        (dir, search)
    }

    #[test]
    fn test_file_scope_from_study() {
        let (_dir, search) = table_search();
        let result = search
            .search(&SearchParams {
                study: Some("QTS2".into()),
                size: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(result.associations.len(), 40);
        assert!(result.associations.iter().all(|r| r.study_id == "QTS2"));

        let missing = search.search(&SearchParams {
            qtl_group: Some("neutrophil".into()),
            ..Default::default()
        });
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_single_dataset_gene_uses_genomic_context() {
        let (_dir, search) = table_search();
        let result = search
            .search(&SearchParams {
                qtl_group: Some("LCL".into()),
                gene_id: Some("ENSG1".into()),
                size: Some(100),
                ..Default::default()
            })
            .unwrap();
        // ENSG1 first appears at 1_100_000; window is [100_000, 2_100_000]
        let positions: Vec<u64> = result.associations.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1_100_000, 1_500_000, 1_900_000]);
        assert_eq!(result.index_marker, 3);
    }

    #[test]
    fn test_collection_pushdown_pages() {
        let store = CollectionStore::new();
        let records: Vec<AssociationRecord> = (0..12)
            .map(|i| record(chr(3), i, if i % 3 == 0 { 0.01 } else { 0.5 }, "QTS1"))
            .collect();
        store.insert_many("QTS1", records).unwrap();
        let search = AssociationSearch::new(
            Arc::new(store),
            Arc::new(Catalog::default()),
            SearchConfig::default(),
        );
        let first = search
            .search(&SearchParams {
                p_upper: Some(0.05),
                size: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.index_marker, 3);
        assert!(!first.exhausted);
        let second = search
            .search(&SearchParams {
                p_upper: Some(0.05),
                size: Some(3),
                start: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.associations.len(), 1);
        assert_eq!(second.associations[0].position, 9);
        assert!(second.exhausted);
    }

    #[test]
    fn test_collection_missing_chromosome_is_not_found() {
        let store = CollectionStore::new();
        store
            .insert_many("QTS1", vec![record(chr(1), 100, 0.01, "QTS1")])
            .unwrap();
        let search = AssociationSearch::new(
            Arc::new(store),
            Arc::new(Catalog::default()),
            SearchConfig::default(),
        );
        let result = search.search(&SearchParams {
            chromosome: Some(Chromosome::Y),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
