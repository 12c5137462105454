//! One traversal: a random node record, then a burst of relationship records.

use page_cache::{CursorMode, PageCursor, PagedStore};
use rand::Rng;

use crate::{
    config::Config,
    error::{ConfigError, Result},
    reader::{self, RecordRead},
    store::Stores,
    walker::{self, Locality, Step},
};

#[cfg(test)]
mod tests;

/// What one traversal read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Traversal {
    /// Sum of every byte read.
    pub checksum: u64,
    pub records_read: u64,
    pub bytes_read: u64,
    /// Walker decisions that moved the relationship cursor to another page.
    pub page_jumps: u64,
    /// Record reads that had to be repeated because a page changed under them.
    pub read_retries: u64,
}

impl Traversal {
    fn add(&mut self, read: RecordRead, record_size: usize) {
        self.checksum += read.checksum;
        self.records_read += 1;
        self.bytes_read += record_size as u64;
        self.read_retries += read.retries;
    }
}

/// Generates traversals over a pair of stores. Shareable between threads; each
/// traversal opens its own cursors.
pub struct Workload<S> {
    stores: Stores<S>,
    sparse_value: u32,
    locality: Locality,
}

impl<S: PagedStore> Workload<S> {
    /// Fails if `config.locality_probability` is not a probability.
    pub fn new(stores: Stores<S>, config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::with_params(
            stores,
            config.sparse_value,
            config.locality()?,
        ))
    }

    pub fn with_params(stores: Stores<S>, sparse_value: u32, locality: Locality) -> Self {
        Workload {
            stores,
            sparse_value,
            locality,
        }
    }

    pub fn stores(&self) -> &Stores<S> {
        &self.stores
    }

    /// Reads one node record and `sparse_value` relationship records.
    pub fn traverse<R: Rng>(&self, rng: &mut R) -> Result<Traversal> {
        let mut traversal = Traversal::default();

        let nodes = &self.stores.nodes;
        let layout = nodes.layout();
        let node_id = rng.gen_range(0..layout.record_count);
        let address = layout.locate(node_id);
        {
            let mut cursor = nodes
                .store()
                .open_cursor(address.page_id, CursorMode::SharedRead)?;
            cursor.next()?;
            let read = reader::read_record_counting_retries(
                &mut cursor,
                address.offset,
                layout.record_size,
            )?;
            traversal.add(read, layout.record_size);
        }

        let relationships = &self.stores.relationships;
        let layout = relationships.layout();
        let mut cursor = relationships
            .store()
            .open_cursor(0, CursorMode::SharedRead)?;
        cursor.next_page(rng.gen_range(0..=relationships.last_page_id()))?;
        for _ in 0..self.sparse_value {
            let offset = layout.record_size * rng.gen_range(0..layout.records_per_page);
            let read =
                reader::read_record_counting_retries(&mut cursor, offset, layout.record_size)?;
            traversal.add(read, layout.record_size);

            let last_page_id = relationships.last_page_id();
            if walker::next_page(&mut cursor, last_page_id, self.locality, rng)? == Step::Jump {
                traversal.page_jumps += 1;
            }
        }
        cursor.close();

        Ok(traversal)
    }
}
