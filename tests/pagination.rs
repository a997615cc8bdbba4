//! Paging properties checked against every storage backend.

use std::collections::HashSet;
use std::sync::Arc;
use sumstatsr::{
    AssociationSearch, Error, SearchConfig, SearchParams,
    block::BlockLayout,
    filter::Predicate,
    loader::{BlockLoader, LoadBatch, TableWriter},
    metadata::Catalog,
    partition::{PartitionSource, Scope},
    storage::{BlockStore, CollectionStore, TableStore},
    types::{AssociationRecord, Chromosome, PvalueInterval},
};
use tempfile::TempDir;

const POSITIONS: [(u64, usize); 3] = [(1_120_431, 25), (48_480_252, 15), (49_129_966, 10)];

fn chr1() -> Chromosome {
    Chromosome::autosome(1).unwrap()
}

/// 50 records for one study: 25, 15 and 10 at three positions.
fn study_records(study: &str, tag: u32) -> Vec<AssociationRecord> {
    let mut records = Vec::new();
    let mut i = 0;
    for (position, count) in POSITIONS {
        for _ in 0..count {
            let pvalue = if i % 3 == 0 { 0.2 } else { 0.00001 };
            let mut record = AssociationRecord::new(chr1(), position, pvalue, study);
            record.rsid = Some(format!("rs{}{:02}", tag, i));
            records.push(record);
            i += 1;
        }
    }
    records
}

fn block_store(dir: &TempDir) -> BlockStore {
    let store = BlockStore::new(dir.path().to_path_buf(), BlockLayout::default());
    let loader = BlockLoader::new(store.clone());
    for (study, uuid, tag) in [("s1", "u1", 1), ("s3", "u3", 3)] {
        loader
            .load(LoadBatch {
                study_id: study.to_string(),
                uuid: uuid.to_string(),
                records: study_records(study, tag),
            })
            .unwrap();
    }
    store
}

fn table_store(dir: &TempDir) -> TableStore {
    let writer = TableWriter::new(dir.path().to_path_buf(), 7);
    writer.write("QTD1", "u1", study_records("s1", 1)).unwrap();
    writer.write("QTD3", "u3", study_records("s3", 3)).unwrap();
    TableStore::new(dir.path().to_path_buf())
}

fn collection_store() -> CollectionStore {
    let store = CollectionStore::new();
    store.insert_many("s1", study_records("s1", 1)).unwrap();
    store.insert_many("s3", study_records("s3", 3)).unwrap();
    store
}

fn search_over(source: Arc<dyn PartitionSource>) -> AssociationSearch {
    AssociationSearch::new(source, Arc::new(Catalog::default()), SearchConfig::default())
}

/// Every record the predicate keeps, in partition order.
fn full_scan(source: &dyn PartitionSource, predicate: &Predicate) -> Vec<AssociationRecord> {
    let mut records = Vec::new();
    for partition in source.list_partitions(&Scope::all()).unwrap() {
        let slice = source
            .read_partition(&partition, 0, partition.size as usize, None)
            .unwrap();
        records.extend(slice.records.into_iter().filter(|r| predicate.matches(r)));
    }
    records
}

/// Follow `start = previous_start + index_marker` until exhausted.
fn page_through(search: &AssociationSearch, base: &SearchParams, size: usize) -> (Vec<AssociationRecord>, usize) {
    let mut records = Vec::new();
    let mut start = 0;
    let mut calls = 0;
    loop {
        calls += 1;
        assert!(calls <= 1_000, "paging did not terminate");
        let params = SearchParams {
            start: Some(start),
            size: Some(size),
            ..base.clone()
        };
        let result = search.search(&params).unwrap();
        assert!(result.paginated);
        assert!(result.associations.len() <= size);
        start += result.index_marker;
        records.extend(result.associations.into_iter().map(|mut r| {
            r.neg_log10_pvalue = None;
            r
        }));
        if result.exhausted {
            return (records, calls);
        }
    }
}

fn assert_complete(source: Arc<dyn PartitionSource>) {
    let search = search_over(source.clone());
    let filtered = SearchParams {
        p_upper: Some(0.05),
        ..Default::default()
    };
    let filter = Predicate {
        pvalue_interval: Some(PvalueInterval::new(None, Some(0.05)).unwrap()),
        ..Default::default()
    };
    for (params, predicate) in [(SearchParams::default(), Predicate::default()), (filtered, filter)] {
        let expected = full_scan(source.as_ref(), &predicate);
        for size in [1, 5, 10, 101] {
            let (records, _) = page_through(&search, &params, size);
            assert_eq!(records, expected, "page size {}", size);
        }
    }
}

#[test]
fn test_block_store_paging_is_complete() {
    let dir = TempDir::new().unwrap();
    assert_complete(Arc::new(block_store(&dir)));
}

#[test]
fn test_table_store_paging_is_complete() {
    let dir = TempDir::new().unwrap();
    assert_complete(Arc::new(table_store(&dir)));
}

#[test]
fn test_collection_store_paging_is_complete() {
    assert_complete(Arc::new(collection_store()));
}

#[test]
fn test_chromosome_scenario() {
    let dir = TempDir::new().unwrap();
    let search = search_over(Arc::new(block_store(&dir)));
    let chromosome = SearchParams {
        chromosome: Some(chr1()),
        ..Default::default()
    };

    let first = search
        .search(&SearchParams {
            start: Some(0),
            size: Some(20),
            ..chromosome.clone()
        })
        .unwrap();
    assert_eq!(first.associations.len(), 20);
    assert_eq!(first.index_marker, 20);
    assert!(first
        .associations
        .iter()
        .all(|r| r.study_id == "s1" || r.study_id == "s3"));

    let (records, calls) = page_through(&search, &chromosome, 20);
    assert_eq!(calls, 5);
    assert_eq!(records.len(), 100);
    let rsids: HashSet<_> = records.iter().filter_map(|r| r.rsid.clone()).collect();
    assert_eq!(rsids.len(), 100);

    let (records, calls) = page_through(&search, &chromosome, 5);
    assert_eq!(calls, 20);
    assert_eq!(records.len(), 100);
}

#[test]
fn test_unequal_partitions_visit_every_record_once() {
    let dir = TempDir::new().unwrap();
    let store = block_store(&dir);
    let sizes: Vec<u64> = store
        .list_partitions(&Scope::all())
        .unwrap()
        .iter()
        .map(|p| p.size)
        .collect();
    assert_eq!(sizes, vec![25, 25, 15, 15, 10, 10]);

    let search = search_over(Arc::new(store));
    let (records, _) = page_through(&search, &SearchParams::default(), 5);
    let rsids: HashSet<_> = records.iter().filter_map(|r| r.rsid.clone()).collect();
    assert_eq!(records.len(), 100);
    assert_eq!(rsids.len(), 100);
}

#[test]
fn test_filter_result_is_independent_of_page_size() {
    let dir = TempDir::new().unwrap();
    let store = BlockStore::new(dir.path().to_path_buf(), BlockLayout::default());
    let records: Vec<AssociationRecord> = [(25, 0.00001), (10, 0.1), (15, 0.00001)]
        .iter()
        .flat_map(|&(count, pvalue)| std::iter::repeat_n(pvalue, count))
        .enumerate()
        .map(|(i, pvalue)| AssociationRecord::new(chr1(), 1_000 + i as u64, pvalue, "s1"))
        .collect();
    BlockLoader::new(store.clone())
        .load(LoadBatch {
            study_id: "s1".into(),
            uuid: "u1".into(),
            records,
        })
        .unwrap();
    let search = search_over(Arc::new(store));
    let params = SearchParams {
        p_lower: Some(0.00005),
        p_upper: Some(0.1),
        ..Default::default()
    };
    for size in [1, 3, 5, 10, 50] {
        let (records, _) = page_through(&search, &params, size);
        assert_eq!(records.len(), 10, "page size {}", size);
        assert!(records.iter().all(|r| r.pvalue == 0.1));
    }
}

#[test]
fn test_block_range_reads_neighbouring_blocks_and_trims() {
    let dir = TempDir::new().unwrap();
    let store = BlockStore::new(dir.path().to_path_buf(), BlockLayout::new(100));
    let records = (150..=450)
        .step_by(50)
        .map(|p| AssociationRecord::new(chr1(), p, 0.01, "s1"))
        .collect();
    BlockLoader::new(store.clone())
        .load(LoadBatch {
            study_id: "s1".into(),
            uuid: "u1".into(),
            records,
        })
        .unwrap();

    let bp = sumstatsr::types::BpInterval::new(Some(250), Some(350)).unwrap();
    let floors: Vec<String> = store
        .list_partitions(&Scope::chromosome(chr1(), Some(bp)))
        .unwrap()
        .iter()
        .map(|p| p.key.to_string())
        .collect();
    assert_eq!(floors, vec!["/1/100/u1", "/1/200/u1", "/1/300/u1"]);

    let search = search_over(Arc::new(store));
    let result = search
        .search(&SearchParams {
            chromosome: Some(chr1()),
            bp_lower: Some(250),
            bp_upper: Some(350),
            size: Some(50),
            ..Default::default()
        })
        .unwrap();
    let positions: Vec<u64> = result.associations.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![250, 300, 350]);
}

#[test]
fn test_missing_chromosome_is_not_found() {
    let dir = TempDir::new().unwrap();
    let search = search_over(Arc::new(block_store(&dir)));
    let result = search.search(&SearchParams {
        chromosome: Some(Chromosome::Y),
        ..Default::default()
    });
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn test_reloading_a_batch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = block_store(&dir);
    let loader = BlockLoader::new(store.clone());

    let again = loader.load(LoadBatch {
        study_id: "s1".into(),
        uuid: "u1".into(),
        records: study_records("s1", 1),
    });
    assert!(matches!(again, Err(Error::AlreadyLoaded { .. })));

    let mut extended = study_records("s1", 1);
    extended.push(AssociationRecord::new(chr1(), 90_000_000, 0.01, "s1"));
    let partial = loader.load(LoadBatch {
        study_id: "s1".into(),
        uuid: "u1".into(),
        records: extended,
    });
    assert!(matches!(partial, Err(Error::PartiallyLoaded { .. })));

    store.verify().unwrap();
    assert_eq!(store.chromosome_size(chr1()).unwrap(), 100);
}

#[test]
fn test_load_after_crashed_loader() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(sumstatsr::storage::LOCK_FILE), b"").unwrap();
    let store = block_store(&dir);
    assert_eq!(store.chromosome_size(chr1()).unwrap(), 100);

    let writer = TableWriter::new(dir.path().join("tables"), 7);
    std::fs::create_dir_all(dir.path().join("tables")).unwrap();
    std::fs::write(dir.path().join("tables").join(sumstatsr::storage::LOCK_FILE), b"").unwrap();
    writer.write("QTD1", "u1", study_records("s1", 1)).unwrap();
}
