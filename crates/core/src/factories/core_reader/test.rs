use super::*;
use crate::factories::{MemLocator, MemTransport};
use chunkread_api::chunk::{ChunkPart, Holder, BLOCK_SIZE};
use chunkread_test_utils::{enable_tracing, random_bytes};

const INODE: Inode = Inode(42);

fn config() -> ReadConfig {
    ReadConfig {
        chunkserver_connect_timeout_ms: 20,
        chunkserver_wave_read_timeout_ms: 50,
        chunkserver_total_read_timeout_ms: 500,
        cache_expiration_time_ms: 1000,
        readahead_max_window_size_kb: 0,
        chunk_size: 4 * BLOCK_SIZE,
        ..Default::default()
    }
}

struct Fixture {
    locator: Arc<MemLocator>,
    transport: Arc<MemTransport>,
    reader: CoreReader,
    data: bytes::Bytes,
}

fn fixture(config: ReadConfig) -> Fixture {
    enable_tracing();
    let data = random_bytes(3 * BLOCK_SIZE);
    let locator = MemLocator::create();
    let transport = MemTransport::create();

    locator.set_file_length(INODE, data.len() as u64);
    locator.set_chunk(
        INODE,
        0,
        ChunkId(1),
        1,
        vec![Holder::new("cs1", ChunkPart::Replica)],
    );
    transport.store("cs1", ChunkId(1), 1, ChunkPart::Replica, data.clone());

    let reader = CoreReader::init(
        crate::default_builder(locator.clone(), transport.clone())
            .with_config(config),
    )
    .unwrap();

    Fixture {
        locator,
        transport,
        reader,
        data,
    }
}

#[test]
fn init_rejects_bad_config() {
    let res = CoreReader::init(
        crate::default_builder(MemLocator::create(), MemTransport::create())
            .with_config(ReadConfig {
                retries: 0,
                ..Default::default()
            }),
    );
    assert!(matches!(res, Err(ReadError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn read_through_a_session() {
    let f = fixture(config());
    let id = f.reader.open_session(INODE).unwrap();

    let data = f.reader.read(id, 100, 1000).await.unwrap();
    assert_eq!(f.data.slice(100..1100), data);

    let stats = f.reader.session_stats(id).unwrap();
    assert_eq!(INODE, stats.inode);
    assert_eq!(1000, stats.miss_bytes);
    assert_eq!(0, stats.hit_bytes);

    // the same range again comes from the cache
    let again = f.reader.read(id, 100, 1000).await.unwrap();
    assert_eq!(data, again);
    assert_eq!(1000, f.reader.session_stats(id).unwrap().hit_bytes);
    assert_eq!(1, f.transport.total_stats().fetches);
}

#[tokio::test(start_paused = true)]
async fn closed_and_unknown_sessions() {
    let f = fixture(config());
    let id = f.reader.open_session(INODE).unwrap();
    f.reader.close_session(id).unwrap();

    assert!(matches!(
        f.reader.read(id, 0, 10).await,
        Err(ReadError::UnknownSession(s)) if s == id
    ));
    assert!(matches!(
        f.reader.close_session(id),
        Err(ReadError::UnknownSession(_))
    ));
    assert!(f.reader.session_stats(SessionId(999)).is_err());

    // handles are never reused
    let next = f.reader.open_session(INODE).unwrap();
    assert_ne!(id, next);
}

#[tokio::test(start_paused = true)]
async fn sessions_have_separate_caches() {
    let f = fixture(config());
    let a = f.reader.open_session(INODE).unwrap();
    let b = f.reader.open_session(INODE).unwrap();

    f.reader.read(a, 0, 100).await.unwrap();
    f.reader.read(b, 0, 100).await.unwrap();
    assert_eq!(2, f.transport.total_stats().fetches);
    assert_eq!(0, f.reader.session_stats(b).unwrap().hit_bytes);
}

#[tokio::test(start_paused = true)]
async fn invalidate_inode_drops_cached_bytes() {
    let f = fixture(config());
    let a = f.reader.open_session(INODE).unwrap();
    let other = f.reader.open_session(Inode(43)).unwrap();
    f.locator.set_file_length(Inode(43), 0);

    f.reader.read(a, 0, 100).await.unwrap();
    f.reader.invalidate_inode(INODE);
    f.reader.invalidate_inode(Inode(43));

    f.reader.read(a, 0, 100).await.unwrap();
    assert_eq!(2, f.transport.total_stats().fetches);
    assert_eq!(0, f.reader.session_stats(a).unwrap().hit_bytes);

    assert!(f.reader.read(other, 0, 100).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_sized_reads_touch_nothing() {
    let f = fixture(config());
    let id = f.reader.open_session(INODE).unwrap();
    assert!(f.reader.read(id, 5, 0).await.unwrap().is_empty());
    assert_eq!(0, f.locator.locate_count());
    assert_eq!(0, f.transport.total_stats().connects);
}

#[tokio::test(start_paused = true)]
async fn terminate_closes_leftover_sessions() {
    let f = fixture(config());
    f.reader.open_session(INODE).unwrap();
    f.reader.open_session(INODE).unwrap();
    f.reader.terminate();
}

#[tokio::test(start_paused = true)]
async fn config_is_shared_by_sessions() {
    let f = fixture(config());
    assert_eq!(4 * BLOCK_SIZE, f.reader.config().chunk_size);
    assert_eq!(1, Arc::strong_count(f.reader.config()));

    let id = f.reader.open_session(INODE).unwrap();
    assert!(Arc::strong_count(f.reader.config()) > 1);

    f.reader.close_session(id).unwrap();
    assert_eq!(1, Arc::strong_count(f.reader.config()));
}
