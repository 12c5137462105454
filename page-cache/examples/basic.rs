use std::io::Write;

use page_cache::{CursorMode, PageCache, PageCursor, PagedStore};

fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .init();
    tracing::info!("starting");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[23u8].repeat(1024)).unwrap();
    file.write_all(&[42u8].repeat(1024)).unwrap();
    file.write_all(&[67u8].repeat(1024)).unwrap();
    file.flush().unwrap();

    let cache = PageCache::new(2, 1024).unwrap();
    let paged = cache.map(file.path(), 1024).unwrap();

    let mut buf = vec![0; 1024];
    let mut cursor = paged.open_cursor(0, CursorMode::SharedRead).unwrap();
    for expected in [23u8, 42, 67] {
        assert!(cursor.next().unwrap());
        loop {
            cursor.read_bytes(0, &mut buf);
            if !cursor.should_retry().unwrap() {
                break;
            }
        }
        assert_eq!(buf, [expected; 1024]);
    }
    assert!(!cursor.next().unwrap(), "file has three pages");
    drop(cursor);

    let mut writer = paged.open_cursor(1, CursorMode::SharedWrite).unwrap();
    assert!(writer.next().unwrap());
    writer.put_byte(0).unwrap();
    drop(writer);
    paged.flush().unwrap();

    tracing::info!(metrics = ?cache.metrics(), "done");
}
