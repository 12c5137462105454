use std::io::Write;

use page_cache::PageCache;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use traversal::{Config, Stores, Workload};

fn write_random(path: &std::path::Path, len: usize, rng: &mut StdRng) {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    std::fs::File::create(path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();
}

fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .init();

    let dir = tempfile::tempdir().unwrap();
    let config = Config::parse(&format!(
        "maxRam = 256k\nsparseValue = 50\nnodeStore = {}\nrelationshipStore = {}\n",
        dir.path().join("nodestore").display(),
        dir.path().join("relationshipstore").display(),
    ))
    .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    write_random(&config.node_store, 10_000 * config.node_record_size, &mut rng);
    write_random(
        &config.relationship_store,
        100_000 * config.relationship_record_size,
        &mut rng,
    );

    let cache = PageCache::with_memory(config.max_ram, config.page_size).unwrap();
    let workload = Workload::new(Stores::map(&cache, &config).unwrap(), &config).unwrap();

    let mut checksum = 0u64;
    for _ in 0..1000 {
        let traversal = workload.traverse(&mut rng).unwrap();
        checksum = checksum.wrapping_add(traversal.checksum);
    }
    tracing::info!(checksum, metrics = ?cache.metrics(), "1000 traversals");
}
