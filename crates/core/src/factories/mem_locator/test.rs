use super::*;

const INODE: Inode = Inode(3);

#[tokio::test(flavor = "multi_thread")]
async fn unset_chunks_are_holes() {
    let l = MemLocator::create();
    l.set_file_length(INODE, 1000);
    let desc = l.locate(INODE, 0).await.unwrap();
    assert!(desc.chunk_id.is_hole());
    assert_eq!(1000, desc.file_length);
    assert_eq!(ChunkLayout::Hole, desc.layout().unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_inode_is_a_location_error() {
    let l = MemLocator::create();
    assert!(matches!(
        l.locate(INODE, 0).await,
        Err(ReadError::Location { chunk_index: 0, .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_are_seen_after_invalidate() {
    let l = MemLocator::create();
    l.set_chunk(
        INODE,
        0,
        ChunkId(1),
        1,
        vec![Holder::new("old", ChunkPart::Replica)],
    );
    assert_eq!(1, l.locate(INODE, 0).await.unwrap().version);

    l.set_chunk(
        INODE,
        0,
        ChunkId(1),
        2,
        vec![Holder::new("new", ChunkPart::Replica)],
    );
    assert_eq!(1, l.locate(INODE, 0).await.unwrap().version);

    l.invalidate(INODE, 0);
    let desc = l.locate(INODE, 0).await.unwrap();
    assert_eq!(2, desc.version);
    assert_eq!(
        vec![HolderAddr::from("new")],
        desc.holders_of(ChunkPart::Replica)
    );
    assert_eq!(3, l.locate_count());
    assert_eq!(1, l.invalidate_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn injected_failures() {
    let l = MemLocator::create();
    l.set_file_length(INODE, 10);
    l.fail_next_locates(2);
    assert!(l.locate(INODE, 0).await.is_err());
    assert!(l.locate(INODE, 0).await.is_err());
    assert!(l.locate(INODE, 0).await.is_ok());
}
