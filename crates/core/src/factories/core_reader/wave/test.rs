use super::*;
use crate::factories::{ConnectBehavior, MemTransport, NodeBehavior};
use chunkread_api::chunk::ChunkPart;
use chunkread_test_utils::{enable_tracing, iter_check};

const CHUNK: ChunkId = ChunkId(0x51);

fn config(retries: u32) -> Arc<ReadConfig> {
    Arc::new(ReadConfig {
        retries,
        chunkserver_round_trip_time_ms: 10,
        chunkserver_connect_timeout_ms: 20,
        chunkserver_wave_read_timeout_ms: 50,
        chunkserver_total_read_timeout_ms: 1000,
        ..Default::default()
    })
}

fn setup(
    retries: u32,
    holders: &[&str],
) -> (Arc<MemTransport>, WaveScheduler) {
    enable_tracing();
    let transport = MemTransport::create();
    for h in holders {
        transport.store(
            *h,
            CHUNK,
            1,
            ChunkPart::Replica,
            Bytes::from(format!("data from {h}")),
        );
    }
    let scheduler = WaveScheduler::new(config(retries), transport.clone());
    (transport, scheduler)
}

fn request() -> PartRequest {
    PartRequest {
        chunk_id: CHUNK,
        version: 1,
        part: ChunkPart::Replica,
        offset: 0,
        length: 12,
    }
}

fn addrs(holders: &[&str]) -> Vec<HolderAddr> {
    holders.iter().map(|h| HolderAddr::from(*h)).collect()
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(1)
}

fn stall() -> NodeBehavior {
    NodeBehavior {
        stall: true,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn first_holder_wins() {
    let (t, s) = setup(3, &["h1", "h2"]);
    let data = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    assert_eq!(&b"data from h1"[..], &data[..]);
    assert_eq!(1, t.total_stats().connects);
    assert_eq!(0, t.total_stats().abandons);
}

#[tokio::test(start_paused = true)]
async fn silent_holder_is_overtaken_by_next_wave() {
    let (t, s) = setup(2, &["h1", "h2"]);
    t.set_behavior("h1", stall());
    t.set_behavior(
        "h2",
        NodeBehavior {
            reply_delay: Duration::from_millis(60),
            ..Default::default()
        },
    );

    let start = Instant::now();
    let data = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    assert_eq!(&b"data from h2"[..], &data[..]);

    // second wave at 50 ms plus the 60 ms reply
    assert!(start.elapsed() >= Duration::from_millis(110));
    assert!(start.elapsed() < Duration::from_millis(150));

    iter_check!({
        if t.node_stats("h1").abandons == 1 {
            break;
        }
    });
    assert_eq!(0, t.node_stats("h2").abandons);

    // h1 stayed silent for a whole wave
    assert!(s.is_on_back_off(&HolderAddr::from("h1")));
    assert!(!s.is_on_back_off(&HolderAddr::from("h2")));
}

#[tokio::test(start_paused = true)]
async fn failure_starts_the_next_wave_immediately() {
    let (t, s) = setup(3, &["h1", "h2"]);
    t.set_behavior(
        "h1",
        NodeBehavior {
            fail_reads: true,
            ..Default::default()
        },
    );

    let start = Instant::now();
    let data = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    assert_eq!(&b"data from h2"[..], &data[..]);
    assert!(start.elapsed() < Duration::from_millis(50));
    assert!(s.is_on_back_off(&HolderAddr::from("h1")));
}

#[tokio::test(start_paused = true)]
async fn backed_off_holders_are_tried_last() {
    let (t, s) = setup(3, &["h1", "h2"]);
    t.set_behavior(
        "h1",
        NodeBehavior {
            connect: ConnectBehavior::Refuse,
            ..Default::default()
        },
    );
    s.fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    assert_eq!(1, t.node_stats("h1").connects);

    // h1 is on back off now, so h2 answers before h1 gets a chance
    s.fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    assert_eq!(1, t.node_stats("h1").connects);
    assert_eq!(2, t.node_stats("h2").connects);
}

#[tokio::test(start_paused = true)]
async fn malformed_reply_is_an_attempt_failure() {
    let (t, s) = setup(3, &["h1", "h2"]);
    t.set_behavior(
        "h1",
        NodeBehavior {
            truncate_replies: true,
            ..Default::default()
        },
    );
    let data = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    assert_eq!(&b"data from h2"[..], &data[..]);
    assert_eq!(1, t.node_stats("h1").abandons);
}

#[tokio::test(start_paused = true)]
async fn budget_is_shared_by_all_holders() {
    let (t, s) = setup(5, &["h1", "h2"]);
    for h in ["h1", "h2"] {
        t.set_behavior(
            h,
            NodeBehavior {
                connect: ConnectBehavior::Refuse,
                ..Default::default()
            },
        );
    }

    let err = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            ReadError::AllHoldersFailed {
                chunk_id: CHUNK,
                attempts: 5,
            }
        ),
        "{err:?}"
    );
    assert_eq!(5, t.total_stats().connects);
    assert_eq!(3, t.node_stats("h1").connects);
}

#[tokio::test(start_paused = true)]
async fn deadline_ends_the_fetch() {
    let (t, s) = setup(30, &["h1", "h2"]);
    t.set_behavior("h1", stall());
    t.set_behavior("h2", stall());

    let start = Instant::now();
    let deadline = start + Duration::from_millis(200);
    let err = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline)
        .await
        .unwrap_err();
    assert!(matches!(err, ReadError::TotalTimeout { .. }), "{err:?}");
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn empty_requests_and_no_holders() {
    let (t, s) = setup(3, &["h1"]);
    let empty = PartRequest {
        length: 0,
        ..request()
    };
    assert!(s
        .fetch(empty, &addrs(&["h1"]), deadline())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(0, t.total_stats().connects);

    assert!(matches!(
        s.fetch(request(), &[], deadline()).await,
        Err(ReadError::AllHoldersFailed { attempts: 0, .. })
    ));
}

#[test]
fn next_holder_prefers_untried_then_oldest_failure() {
    let order = addrs(&["a", "b", "c"]);
    let rtt = Duration::from_millis(10);
    let now = Instant::now();
    let attempt = |h: &str, state, finished_at| WaveAttempt {
        holder: HolderAddr::from(h),
        started_at: now,
        finished_at,
        state,
    };

    let attempts = vec![attempt("a", AttemptState::Pending, None)];
    assert_eq!(
        Some((HolderAddr::from("b"), None)),
        next_holder(&order, &attempts, rtt)
    );

    let later = now + Duration::from_millis(5);
    let attempts = vec![
        attempt("a", AttemptState::Pending, None),
        attempt("b", AttemptState::Failed, Some(later)),
        attempt("c", AttemptState::Failed, Some(now)),
    ];
    assert_eq!(
        Some((HolderAddr::from("c"), Some(now + rtt))),
        next_holder(&order, &attempts, rtt)
    );

    let attempts = vec![
        attempt("a", AttemptState::Pending, None),
        attempt("b", AttemptState::Pending, None),
        attempt("c", AttemptState::Pending, None),
    ];
    assert_eq!(None, next_holder(&order, &attempts, rtt));
}

#[tokio::test(start_paused = true)]
async fn hanging_connect_starts_the_next_wave_early() {
    let (t, s) = setup(3, &["h1", "h2"]);
    t.set_behavior(
        "h1",
        NodeBehavior {
            connect: ConnectBehavior::Hang,
            ..Default::default()
        },
    );

    let start = Instant::now();
    let data = s
        .fetch(request(), &addrs(&["h1", "h2"]), deadline())
        .await
        .unwrap();
    let elapsed = start.elapsed();
    assert_eq!(&b"data from h2"[..], &data[..]);

    // the connect timeout fired, not the wave timeout
    assert!(
        elapsed >= Duration::from_millis(20)
            && elapsed < Duration::from_millis(50),
        "{elapsed:?}"
    );
    assert_eq!(0, t.node_stats("h1").fetches);
    assert!(s.is_on_back_off(&HolderAddr::from("h1")));
}

#[tokio::test(start_paused = true)]
async fn attempts_only_fail_with_attempt_errors() {
    let (t, _) = setup(1, &["refusing", "truncating"]);
    t.set_behavior(
        "refusing",
        NodeBehavior {
            connect: ConnectBehavior::Refuse,
            ..Default::default()
        },
    );
    t.set_behavior(
        "truncating",
        NodeBehavior {
            truncate_replies: true,
            ..Default::default()
        },
    );

    for h in ["refusing", "truncating", "unknown"] {
        let err = attempt(
            t.clone(),
            HolderAddr::from(h),
            request(),
            None,
            Duration::from_millis(20),
            deadline(),
        )
        .await
        .unwrap_err();
        assert!(err.is_attempt_error(), "{h}: {err:?}");
    }
}
