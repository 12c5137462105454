//! Random, graph-shaped record traversals over a paged store.
//!
//! A traversal reads one random record from a node store, then a burst of
//! records from a relationship store. Consecutive relationship reads stay on
//! the same page with a configurable probability and otherwise jump to a
//! random page, which approximates the locality of following relationship
//! chains in a graph database.
//!
//! Every record is read optimistically: the bytes are summed without taking a
//! lock, and the read is repeated until the page cursor confirms that no writer
//! touched the page in the meantime. See [`reader`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use page_cache::PageCache;
//! use traversal::{Config, Stores, Workload};
//!
//! fn main() -> traversal::Result<()> {
//!     let config = Config::load(Config::DEFAULT_PATH)?;
//!     let cache = PageCache::with_memory(config.max_ram, config.page_size)?;
//!     let workload = Workload::new(Stores::map(&cache, &config)?, &config)?;
//!     let traversal = workload.traverse(&mut rand::thread_rng())?;
//!     println!("checksum {}", traversal.checksum);
//!     Ok(())
//! }
//! ```

pub mod addressing;
pub mod byte_size;
pub mod config;
mod error;
pub mod reader;
pub mod store;
pub mod walker;
pub mod workload;

#[cfg(test)]
pub(crate) mod test_util;

pub use addressing::{locate, RecordAddress};
pub use config::Config;
pub use error::{ConfigError, Error, Result};
pub use reader::read_record;
pub use store::{RecordStore, StoreLayout, Stores};
pub use walker::{Locality, Step};
pub use workload::{Traversal, Workload};

#[doc(hidden)]
pub mod env_tunables {
    use std::env::VarError;

    /// Log a warning once a single record read has been retried this many times.
    ///
    /// Purely diagnostic: the read keeps retrying past the threshold.
    pub(crate) static READ_RETRY_WARN_THRESHOLD: once_cell::sync::Lazy<Option<u64>> =
        once_cell::sync::Lazy::new(|| {
            retry_threshold(std::env::var("TRAVERSAL_READ_RETRY_WARN_THRESHOLD"))
        });

    fn retry_threshold(var: Result<String, VarError>) -> Option<u64> {
        match var {
            Ok(v) => Some(v.parse().unwrap_or_else(|e| {
                panic!("TRAVERSAL_READ_RETRY_WARN_THRESHOLD must be a retry count: {e}: {v:?}")
            })),
            Err(VarError::NotPresent) => None,
            Err(VarError::NotUnicode(_)) => {
                panic!("TRAVERSAL_READ_RETRY_WARN_THRESHOLD must be a unicode string")
            }
        }
    }

    /// Panics on unknown `TRAVERSAL_` variables and on malformed values of known ones.
    pub fn assert_no_unknown_env_vars() {
        std::env::vars()
            .filter_map(|(v, _)| v.starts_with("TRAVERSAL_").then_some(v))
            .for_each(|v| match v.as_str() {
                "TRAVERSAL_READ_RETRY_WARN_THRESHOLD" => {}
                x => panic!("env var starts with TRAVERSAL_ but is not an env_tunable: {x:?}"),
            });
        once_cell::sync::Lazy::force(&READ_RETRY_WARN_THRESHOLD);
    }

}
