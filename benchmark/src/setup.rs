use std::{
    fs::{File, OpenOptions},
    io::{self, Seek, Write},
    path::Path,
};

use rand::RngCore;
use tracing::info;
use traversal::Config;

const CHUNK_SIZE: usize = 1 << 20;

/// Creates or extends both store files so they hold at least the requested
/// number of records. Existing bytes below that size are kept; stores that are
/// already large enough are left alone.
pub(crate) fn setup_stores(
    config: &Config,
    node_records: u64,
    relationship_records: u64,
) -> io::Result<()> {
    let stores = [
        (
            config.node_store.as_path(),
            config.node_record_size,
            node_records,
        ),
        (
            config.relationship_store.as_path(),
            config.relationship_record_size,
            relationship_records,
        ),
    ];
    std::thread::scope(|scope| {
        let mut fills = Vec::new();
        for (path, record_size, records) in stores {
            let Some((file, append_len)) = open_for_append(path, record_size, records)? else {
                continue;
            };
            fills.push(scope.spawn(move || fill_random(file, append_len)));
        }
        for fill in fills {
            match fill.join() {
                Ok(res) => res?,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(())
    })
}

/// Opens `path` positioned at its last whole record, or returns `None` if it
/// already holds `records` records.
fn open_for_append(
    path: &Path,
    record_size: usize,
    records: u64,
) -> io::Result<Option<(File, u64)>> {
    let record_size = record_size as u64;
    let target_len = records.checked_mul(record_size).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{records} records of {record_size} bytes overflow a file length"),
        )
    })?;
    let append_offset = match std::fs::metadata(path) {
        Ok(md) if md.len() >= target_len => {
            info!(?path, len = md.len(), records, "store is already large enough");
            return Ok(None);
        }
        Ok(md) => {
            info!(?path, len = md.len(), records, "store exists but is too small, extending");
            md.len() / record_size * record_size
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            0
        }
        Err(e) => return Err(e),
    };
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    file.seek(io::SeekFrom::Start(append_offset))?;
    Ok(Some((file, target_len - append_offset)))
}

/// Writes `len` pseudo-random bytes at the file's current position.
fn fill_random(mut file: File, len: u64) -> io::Result<()> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut left = len;
    while left > 0 {
        let n = usize::try_from(left).map_or(CHUNK_SIZE, |left| left.min(CHUNK_SIZE));
        rand::thread_rng().fill_bytes(&mut chunk[..n]);
        file.write_all(&chunk[..n])?;
        left -= n as u64;
    }
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        Config {
            node_store: dir.join("stores").join("nodestore"),
            relationship_store: dir.join("stores").join("relationshipstore"),
            ..Config::default()
        }
    }

    #[test]
    fn creates_stores_sized_in_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        setup_stores(&config, 1000, 3000).unwrap();
        assert_eq!(std::fs::metadata(&config.node_store).unwrap().len(), 1000 * 32);
        assert_eq!(
            std::fs::metadata(&config.relationship_store).unwrap().len(),
            3000 * 64
        );
    }

    #[test]
    fn extends_short_stores_and_keeps_their_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        setup_stores(&config, 10, 10).unwrap();
        let before = std::fs::read(&config.node_store).unwrap();

        setup_stores(&config, 100_000, 10).unwrap();
        let after = std::fs::read(&config.node_store).unwrap();
        assert_eq!(after.len(), 100_000 * 32);
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(
            std::fs::metadata(&config.relationship_store).unwrap().len(),
            10 * 64
        );
    }

    #[test]
    fn large_enough_stores_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        setup_stores(&config, 50, 50).unwrap();
        let nodes = std::fs::read(&config.node_store).unwrap();

        setup_stores(&config, 5, 5).unwrap();
        assert_eq!(std::fs::read(&config.node_store).unwrap(), nodes);
    }

    #[test]
    fn partial_trailing_record_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(config.node_store.parent().unwrap()).unwrap();
        std::fs::write(&config.node_store, [7u8; 40]).unwrap();
        std::fs::write(&config.relationship_store, [7u8; 64]).unwrap();

        setup_stores(&config, 2, 1).unwrap();
        let nodes = std::fs::read(&config.node_store).unwrap();
        assert_eq!(nodes.len(), 64);
        assert_eq!(&nodes[..32], &[7u8; 32][..]);
    }
}
