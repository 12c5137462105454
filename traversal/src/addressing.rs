//! Mapping record ids to page addresses.

/// Where a record lives: the page that holds it and its byte offset in that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordAddress {
    pub page_id: u64,
    pub offset: usize,
}

/// Address of `record_id` in a store with `records_per_page` records of `record_size` bytes per page.
///
/// `records_per_page` must be at least one.
pub fn locate(record_id: u64, records_per_page: usize, record_size: usize) -> RecordAddress {
    debug_assert!(records_per_page >= 1);
    let records_per_page = records_per_page as u64;
    RecordAddress {
        page_id: record_id / records_per_page,
        offset: (record_id % records_per_page) as usize * record_size,
    }
}
