//! Record stores: a paged store plus the fixed record layout laid over it.

use std::path::{Path, PathBuf};

use page_cache::{PageCache, PagedFile, PagedStore};
use tracing::info;

use crate::{
    addressing::{self, RecordAddress},
    config::Config,
    error::{ConfigError, Result},
};

/// How fixed-size records are laid out over the pages of one store.
///
/// File pages hold a whole number of records, so a record never straddles two pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreLayout {
    pub record_size: usize,
    pub record_count: u64,
    pub file_page_size: usize,
    pub records_per_page: usize,
}

impl StoreLayout {
    /// The largest multiple of `record_size` that does not exceed `page_size`.
    pub fn file_page_size(page_size: usize, record_size: usize) -> usize {
        (page_size / record_size) * record_size
    }

    /// Layout of a `file_len` byte store of `record_size` byte records cached in `page_size` pages.
    ///
    /// `record_size` must be within `1..=page_size`.
    pub fn new(page_size: usize, record_size: usize, file_len: u64) -> Self {
        debug_assert!(record_size >= 1 && record_size <= page_size);
        let file_page_size = Self::file_page_size(page_size, record_size);
        StoreLayout {
            record_size,
            record_count: file_len / record_size as u64,
            file_page_size,
            records_per_page: file_page_size / record_size,
        }
    }

    pub fn locate(&self, record_id: u64) -> RecordAddress {
        addressing::locate(record_id, self.records_per_page, self.record_size)
    }
}

pub struct RecordStore<S> {
    path: PathBuf,
    store: S,
    layout: StoreLayout,
}

impl<S: PagedStore> RecordStore<S> {
    /// Lays `record_size` byte records over a store that holds at least one of them.
    pub fn new(
        store: S,
        record_size: usize,
        path: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        let file_page_size = store.file_page_size();
        if record_size == 0 || file_page_size % record_size != 0 {
            return Err(ConfigError::OutOfRange {
                key: format!("record size of {path:?}"),
                reason: format!("{record_size} does not divide the file page size {file_page_size}"),
            });
        }
        let record_count = store.records_count(record_size);
        if record_count == 0 {
            return Err(ConfigError::EmptyStore { path, record_size });
        }
        Ok(RecordStore {
            path,
            store,
            layout: StoreLayout {
                record_size,
                record_count,
                file_page_size,
                records_per_page: file_page_size / record_size,
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Highest page index of the store as it is right now.
    pub fn last_page_id(&self) -> u64 {
        // non-empty by construction
        self.store.last_page_id().unwrap_or(0)
    }
}

/// The two stores a traversal reads from.
pub struct Stores<S> {
    pub nodes: RecordStore<S>,
    pub relationships: RecordStore<S>,
}

impl Stores<PagedFile> {
    /// Maps the node and relationship stores named by `config` into `cache`.
    ///
    /// Each store's file page size is derived from its own record size.
    pub fn map(cache: &PageCache, config: &Config) -> Result<Self> {
        let nodes = map_store(cache, &config.node_store, config.node_record_size)?;
        let relationships = map_store(
            cache,
            &config.relationship_store,
            config.relationship_record_size,
        )?;
        Ok(Stores {
            nodes,
            relationships,
        })
    }
}

fn map_store(
    cache: &PageCache,
    path: &Path,
    record_size: usize,
) -> Result<RecordStore<PagedFile>> {
    let file_page_size = StoreLayout::file_page_size(cache.page_size(), record_size);
    let paged = cache.map(path, file_page_size)?;
    let store = RecordStore::new(paged, record_size, path)?;
    let layout = store.layout();
    info!(
        ?path,
        record_size,
        records = layout.record_count,
        records_per_page = layout.records_per_page,
        file_page_size = layout.file_page_size,
        last_page_id = store.last_page_id(),
        "mapped store"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{self, MockStore};

    #[test]
    fn each_store_pages_by_its_own_record_size() {
        let nodes = StoreLayout::new(8192, 32, 1000 * 32);
        assert_eq!(nodes.records_per_page, 256);
        assert_eq!(nodes.file_page_size, 8192);
        assert_eq!(nodes.record_count, 1000);

        let relationships = StoreLayout::new(8192, 64, 1000 * 64);
        assert_eq!(relationships.records_per_page, 128);
        assert_eq!(relationships.file_page_size, 8192);

        let odd = StoreLayout::new(8192, 60, 6000);
        assert_eq!(odd.file_page_size, 8160);
        assert_eq!(odd.records_per_page, 136);
        assert_eq!(odd.record_count, 100);
    }

    #[test]
    fn record_store_rejects_empty_and_misaligned_stores() {
        let empty = MockStore::new(8192, 0);
        assert!(matches!(
            RecordStore::new(empty, 32, "nodes"),
            Err(ConfigError::EmptyStore { record_size: 32, .. })
        ));
        let short = MockStore::new(8192, 31);
        assert!(RecordStore::new(short, 32, "nodes").is_err());
        let misaligned = MockStore::new(8160, 8160 * 4);
        assert!(RecordStore::new(misaligned, 64, "rels").is_err());

        let store = RecordStore::new(MockStore::new(8192, 8192 * 3 + 64), 64, "rels").unwrap();
        assert_eq!(store.layout().record_count, 3 * 128 + 1);
        assert_eq!(store.last_page_id(), 3);
    }

    #[test]
    fn map_derives_layouts_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            node_store: dir.path().join("nodes"),
            relationship_store: dir.path().join("rels"),
            max_ram: 1 << 20,
            ..Config::default()
        };
        test_util::write_store(&config.node_store, 1000 * 32, |_| 1);
        test_util::write_store(&config.relationship_store, 1000 * 64, |_| 1);

        let cache = PageCache::with_memory(config.max_ram, config.page_size).unwrap();
        let stores = Stores::map(&cache, &config).unwrap();
        assert_eq!(
            *stores.nodes.layout(),
            StoreLayout::new(8192, 32, 1000 * 32)
        );
        assert_eq!(
            *stores.relationships.layout(),
            StoreLayout::new(8192, 64, 1000 * 64)
        );
        assert_eq!(stores.nodes.last_page_id(), 3);
        assert_eq!(stores.relationships.last_page_id(), 7);
        assert_eq!(stores.nodes.path(), config.node_store);
    }

    #[test]
    fn map_fails_for_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            node_store: dir.path().join("missing"),
            relationship_store: dir.path().join("missing-too"),
            max_ram: 1 << 20,
            ..Config::default()
        };
        let cache = PageCache::with_memory(config.max_ram, config.page_size).unwrap();
        assert!(matches!(
            Stores::map(&cache, &config),
            Err(crate::Error::Io(_))
        ));
    }
}
