#![deny(missing_docs)]
//! Test utilities for the chunkread read pipeline.

pub mod stripe;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .try_init();
}

/// Create random bytes of a specified length.
pub fn random_bytes(length: u64) -> bytes::Bytes {
    use rand::RngCore;

    let mut bytes = vec![0; length as usize];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.into()
}

/// Repeatedly run a block until it breaks out of its loop, sleeping
/// between runs, and panic if that does not happen within the timeout.
///
/// Evaluates to the value the block breaks with.
///
/// ```ignore
/// let hits = iter_check!(1000, 10, {
///     if counter.load(Ordering::SeqCst) > 2 {
///         break counter.load(Ordering::SeqCst);
///     }
/// });
/// ```
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:expr, $sleep_ms:expr, $code:block) => {
        tokio::time::timeout(
            std::time::Duration::from_millis($timeout_ms),
            async {
                loop {
                    $code
                    tokio::time::sleep(std::time::Duration::from_millis(
                        $sleep_ms,
                    ))
                    .await;
                }
            },
        )
        .await
        .expect("iter_check timed out")
    };
    ($timeout_ms:expr, $code:block) => {
        $crate::iter_check!($timeout_ms, 10, $code)
    };
    ($code:block) => {
        $crate::iter_check!(1000, $code)
    };
}
