//! Budget for speculative prefetch traffic.
//!
//! The governor keeps decaying byte counters for the bytes foreground
//! reads handed to callers and the bytes background prefetches pulled
//! from the network, and only grants a prefetch while
//! `background + reserved <= overuse * foreground` would still hold.
//! Foreground reads are only ever counted, never throttled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Both counters are halved once per interval.
pub(crate) const DECAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub(crate) struct BandwidthGovernor {
    overuse: f64,
    foreground: AtomicU64,
    background: AtomicU64,
    reserved: AtomicU64,
    epoch: Instant,
    last_decay_ms: AtomicU64,
}

impl BandwidthGovernor {
    pub fn new(overuse: f64) -> Self {
        Self {
            overuse,
            foreground: AtomicU64::new(0),
            background: AtomicU64::new(0),
            reserved: AtomicU64::new(0),
            epoch: Instant::now(),
            last_decay_ms: AtomicU64::new(0),
        }
    }

    /// Count bytes returned to a foreground caller.
    pub fn record_foreground(&self, bytes: u64) {
        self.decay();
        self.foreground.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Count bytes a background prefetch fetched and return its grant.
    pub fn record_background(&self, fetched: u64, granted: u64) {
        self.decay();
        self.background.fetch_add(fetched, Ordering::AcqRel);
        self.release(granted);
    }

    /// Return a grant that was not (fully) used.
    pub fn release(&self, granted: u64) {
        let _ = self.reserved.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |r| Some(r.saturating_sub(granted)),
        );
    }

    /// How many of `proposed` prefetch bytes may be fetched right now.
    /// The returned amount is reserved until it is recorded or released.
    pub fn allow(&self, proposed: u64) -> u64 {
        self.decay();
        let foreground = self.foreground.load(Ordering::Acquire) as f64;
        let background = self.background.load(Ordering::Acquire);
        let ceiling = (self.overuse * foreground) as u64;

        let mut granted = 0;
        let _ = self.reserved.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |reserved| {
                let budget =
                    ceiling.saturating_sub(background.saturating_add(reserved));
                granted = proposed.min(budget);
                if granted == 0 {
                    None
                } else {
                    Some(reserved + granted)
                }
            },
        );
        granted
    }

    /// Current (foreground, background, reserved) byte counters.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.foreground.load(Ordering::Acquire),
            self.background.load(Ordering::Acquire),
            self.reserved.load(Ordering::Acquire),
        )
    }

    fn decay(&self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_decay_ms.load(Ordering::Acquire);
        let interval = DECAY_INTERVAL.as_millis() as u64;
        let periods = (now_ms - last.min(now_ms)) / interval;
        if periods == 0 {
            return;
        }
        if self
            .last_decay_ms
            .compare_exchange(
                last,
                last + periods * interval,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // someone else decayed for this period
            return;
        }

        let shift = periods.min(63) as u32;
        for counter in [&self.foreground, &self.background] {
            let _ = counter.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |v| Some(v >> shift),
            );
        }
    }
}
