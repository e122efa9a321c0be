use super::*;

const T: Duration = Duration::from_secs(1);

fn req(offset: u64, length: u64) -> PartRequest {
    PartRequest {
        chunk_id: ChunkId(9),
        version: 2,
        part: ChunkPart::Replica,
        offset,
        length,
    }
}

fn transport() -> Arc<MemTransport> {
    let t = MemTransport::create();
    t.store(
        "cs1",
        ChunkId(9),
        2,
        ChunkPart::Replica,
        Bytes::from_static(b"hello world"),
    );
    t
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_stored_ranges() {
    let t = transport();
    let con = t.connect("cs1".into(), T).await.unwrap();
    assert_eq!(&b"world"[..], &con.fetch(req(6, 5), T).await.unwrap()[..]);
    assert_eq!(
        NodeStats {
            connects: 1,
            fetches: 1,
            abandons: 0,
        },
        t.node_stats("cs1")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_bad_requests() {
    let t = transport();
    let con = t.connect("cs1".into(), T).await.unwrap();

    let err = con.fetch(req(6, 50), T).await.unwrap_err();
    assert!(err.to_string().contains("beyond part end"), "{err}");

    let err = con
        .fetch(
            PartRequest {
                version: 3,
                ..req(0, 1)
            },
            T,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("wrong chunk version"), "{err}");

    let err = con
        .fetch(
            PartRequest {
                chunk_id: ChunkId(10),
                ..req(0, 1)
            },
            T,
        )
        .await
        .unwrap_err();
    assert!(err.is_attempt_error());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_and_refusing_nodes() {
    let t = transport();
    assert!(matches!(
        t.connect("nope".into(), T).await,
        Err(ReadError::Connect { .. })
    ));

    t.set_behavior(
        "cs1",
        NodeBehavior {
            connect: ConnectBehavior::Refuse,
            ..Default::default()
        },
    );
    assert!(matches!(
        t.connect("cs1".into(), T).await,
        Err(ReadError::Connect { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn hanging_node_hits_connect_timeout() {
    let t = transport();
    t.set_behavior(
        "cs1",
        NodeBehavior {
            connect: ConnectBehavior::Hang,
            ..Default::default()
        },
    );
    let start = tokio::time::Instant::now();
    let res = t.connect("cs1".into(), Duration::from_millis(30)).await;
    assert!(matches!(res, Err(ReadError::Connect { .. })));
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert!(start.elapsed() < Duration::from_millis(40));
}

#[tokio::test(start_paused = true)]
async fn stalled_node_hits_read_timeout() {
    let t = transport();
    t.set_behavior(
        "cs1",
        NodeBehavior {
            stall: true,
            ..Default::default()
        },
    );
    let con = t.connect("cs1".into(), T).await.unwrap();
    let res = con.fetch(req(0, 5), Duration::from_millis(80)).await;
    assert!(matches!(res, Err(ReadError::Fetch { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn misbehaving_replies() {
    let t = transport();
    t.set_behavior(
        "cs1",
        NodeBehavior {
            truncate_replies: true,
            ..Default::default()
        },
    );
    let con = t.connect("cs1".into(), T).await.unwrap();
    assert_eq!(4, con.fetch(req(0, 5), T).await.unwrap().len());

    t.set_behavior(
        "cs1",
        NodeBehavior {
            fail_reads: true,
            ..Default::default()
        },
    );
    assert!(con.fetch(req(0, 5), T).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn abandon_is_counted_once() {
    let t = transport();
    let con = t.connect("cs1".into(), T).await.unwrap();
    con.abandon();
    con.abandon();
    assert!(con.fetch(req(0, 5), T).await.is_err());
    assert_eq!(1, t.node_stats("cs1").abandons);
    assert_eq!(1, t.total_stats().abandons);
}
