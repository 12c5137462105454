use std::{io, path::Path};

use page_cache::{CursorMode, PageCache, PagedStore};
use rand::{rngs::StdRng, SeedableRng};

use super::*;
use crate::{
    store::RecordStore,
    test_util::{self, MockCursor, MockStats, MockStore},
    ConfigError, Error,
};

fn mock_stores(
    node_page: usize,
    nodes: u64,
    relationship_page: usize,
    relationships: u64,
) -> Stores<MockStore> {
    Stores {
        nodes: RecordStore::new(MockStore::new(node_page, nodes * 32), 32, "nodes").unwrap(),
        relationships: RecordStore::new(
            MockStore::new(relationship_page, relationships * 64),
            64,
            "relationships",
        )
        .unwrap(),
    }
}

#[test]
fn burst_reads_one_node_and_sparse_value_relationships() {
    for stay_probability in [0.0, 0.2, 1.0] {
        for sparse_value in [0, 1, 100] {
            // 4096 relationship records per page, 25 pages
            let stores = mock_stores(8192, 1000, 4096 * 64, 100_000);
            let locality = Locality::new(stay_probability).unwrap();
            let workload = Workload::with_params(stores, sparse_value, locality);
            let mut rng = StdRng::seed_from_u64(u64::from(sparse_value) + 17);

            let traversal = workload.traverse(&mut rng).unwrap();

            let nodes = &workload.stores().nodes.store().stats;
            let relationships = &workload.stores().relationships.store().stats;
            assert_eq!(MockStats::get(&nodes.reads), 1);
            assert_eq!(MockStats::get(&relationships.reads), u64::from(sparse_value));
            assert_eq!(traversal.records_read, 1 + u64::from(sparse_value));
            assert_eq!(traversal.bytes_read, 32 + 64 * u64::from(sparse_value));
            assert_eq!(traversal.read_retries, 0);
            // every cursor was released
            assert_eq!(MockStats::get(&nodes.opened), 1);
            assert_eq!(MockStats::get(&nodes.closed), 1);
            assert_eq!(MockStats::get(&relationships.opened), 1);
            assert_eq!(MockStats::get(&relationships.closed), 1);

            match stay_probability {
                p if p == 0.0 => assert_eq!(traversal.page_jumps, u64::from(sparse_value)),
                p if p == 1.0 => assert_eq!(traversal.page_jumps, 0),
                _ => assert!(traversal.page_jumps <= u64::from(sparse_value)),
            }
            // initial positioning plus one per jump
            assert_eq!(
                MockStats::get(&relationships.positioned),
                1 + traversal.page_jumps
            );
        }
    }
}

#[test]
fn checksum_is_bounded_by_bytes_read() {
    let stores = mock_stores(8192, 1000, 8192, 1000);
    let workload = Workload::with_params(stores, 100, Locality::DEFAULT);
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..100 {
        let traversal = workload.traverse(&mut rng).unwrap();
        assert_eq!(traversal.records_read, 101);
        assert!(traversal.checksum <= 255 * traversal.bytes_read);
    }
}

fn config_in(dir: &Path, sparse_value: u32, max_ram: u64) -> Config {
    Config {
        page_size: 8192,
        max_ram,
        node_record_size: 32,
        relationship_record_size: 64,
        sparse_value,
        locality_probability: 0.2,
        node_store: dir.join("nodestore"),
        relationship_store: dir.join("relationshipstore"),
    }
}

#[test]
fn end_to_end_over_mapped_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 100, 1 << 20);
    test_util::write_store(&config.node_store, 1000 * 32, |i| (i * 13 % 256) as u8);
    test_util::write_store(&config.relationship_store, 1000 * 64, |i| {
        (i * 29 % 256) as u8
    });

    let cache = PageCache::with_memory(config.max_ram, config.page_size).unwrap();
    let workload = Workload::new(Stores::map(&cache, &config).unwrap(), &config).unwrap();
    assert_eq!(workload.stores().nodes.layout().records_per_page, 256);
    assert_eq!(workload.stores().relationships.layout().records_per_page, 128);

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let traversal = workload.traverse(&mut rng).unwrap();
        assert_eq!(traversal.records_read, 101);
        assert!(traversal.checksum <= 101 * 255 * 64);
    }
    assert!(cache.metrics().faults > 0);
}

/// Every byte is one and the relationship store is a whole number of pages,
/// so every traversal has the same checksum.
fn uniform_stores(config: &Config) {
    test_util::write_store(&config.node_store, 1000 * 32, |_| 1);
    test_util::write_store(&config.relationship_store, 1024 * 64, |_| 1);
}

#[test]
fn checksum_counts_every_byte_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 100, 1 << 20);
    uniform_stores(&config);

    let cache = PageCache::with_memory(config.max_ram, config.page_size).unwrap();
    let workload = Workload::new(Stores::map(&cache, &config).unwrap(), &config).unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    for _ in 0..20 {
        let traversal = workload.traverse(&mut rng).unwrap();
        assert_eq!(traversal.checksum, 32 + 100 * 64);
        assert_eq!(traversal.bytes_read, 32 + 100 * 64);
    }
}

#[test]
fn parallel_traversals_under_eviction_pressure() {
    let dir = tempfile::tempdir().unwrap();
    // four frames for twelve pages
    let config = config_in(dir.path(), 50, 4 * 8192);
    uniform_stores(&config);

    let cache = PageCache::with_memory(config.max_ram, config.page_size).unwrap();
    let workload = Workload::new(Stores::map(&cache, &config).unwrap(), &config).unwrap();

    std::thread::scope(|scope| {
        for seed in 0..4 {
            let workload = &workload;
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..200 {
                    let traversal = workload.traverse(&mut rng).unwrap();
                    assert_eq!(traversal.checksum, 32 + 50 * 64);
                }
            });
        }
    });
    assert!(cache.metrics().evictions > 0);
}

struct UnopenableStore(MockStore);

impl PagedStore for UnopenableStore {
    type Cursor = MockCursor;

    fn file_page_size(&self) -> usize {
        self.0.file_page_size()
    }

    fn file_len(&self) -> u64 {
        self.0.file_len()
    }

    fn open_cursor(&self, _page_hint: u64, _mode: CursorMode) -> io::Result<MockCursor> {
        Err(io::Error::new(io::ErrorKind::Other, "device went away"))
    }
}

#[test]
fn io_failures_reach_the_caller() {
    let stores = Stores {
        nodes: RecordStore::new(UnopenableStore(MockStore::new(8192, 8192)), 32, "nodes")
            .unwrap(),
        relationships: RecordStore::new(
            UnopenableStore(MockStore::new(8192, 8192)),
            64,
            "relationships",
        )
        .unwrap(),
    };
    let workload = Workload::with_params(stores, 10, Locality::DEFAULT);
    let err = workload.traverse(&mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::Other));
}

#[test]
fn out_of_range_locality_is_rejected() {
    for locality_probability in [7.5, -0.1, f64::NAN] {
        let config = Config {
            locality_probability,
            ..Config::default()
        };
        let stores = mock_stores(8192, 1000, 8192, 1000);
        assert!(matches!(
            Workload::new(stores, &config),
            Err(ConfigError::OutOfRange { ref key, .. }) if key == "localityProbability"
        ));
    }

    let config = Config {
        locality_probability: 1.0,
        sparse_value: 20,
        ..Config::default()
    };
    let workload = Workload::new(mock_stores(8192, 1000, 8192, 1000), &config).unwrap();
    let traversal = workload.traverse(&mut StdRng::seed_from_u64(5)).unwrap();
    assert_eq!(traversal.page_jumps, 0);
    assert_eq!(traversal.records_read, 21);
}
