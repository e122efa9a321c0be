use std::{
    collections::{hash_map::Entry, HashMap},
    time::Duration,
};

use backon::BackoffBuilder;
use chunkread_api::HolderAddr;
use tokio::time::Instant;

/// Duration of the first interval an unresponsive holder is demoted for.
pub(crate) const FIRST_BACK_OFF_INTERVAL: Duration = Duration::from_secs(1);

/// Duration of the last interval an unresponsive holder is demoted for.
pub(crate) const LAST_BACK_OFF_INTERVAL: Duration = Duration::from_secs(60);

/// Number of back off intervals before the last one repeats.
pub(crate) const NUM_BACK_OFF_INTERVALS: usize = 6;

/// Holders that recently failed or stayed silent. Holders on back off are
/// still tried, but only after every other holder of the same part.
#[derive(Debug)]
pub struct BackOffList {
    pub(crate) state: HashMap<HolderAddr, BackOff>,
    first_back_off_interval: Duration,
    last_back_off_interval: Duration,
    num_back_off_intervals: usize,
}

impl Default for BackOffList {
    fn default() -> Self {
        Self::new(
            FIRST_BACK_OFF_INTERVAL,
            LAST_BACK_OFF_INTERVAL,
            NUM_BACK_OFF_INTERVALS,
        )
    }
}

impl BackOffList {
    pub fn new(
        first_back_off_interval: Duration,
        last_back_off_interval: Duration,
        num_back_off_intervals: usize,
    ) -> Self {
        Self {
            state: HashMap::new(),
            first_back_off_interval,
            last_back_off_interval,
            num_back_off_intervals,
        }
    }

    pub fn back_off_holder(&mut self, addr: &HolderAddr) {
        match self.state.entry(addr.clone()) {
            Entry::Occupied(mut o) => {
                o.get_mut().back_off();
            }
            Entry::Vacant(v) => {
                v.insert(BackOff::new(
                    self.first_back_off_interval,
                    self.last_back_off_interval,
                    self.num_back_off_intervals,
                ));
            }
        }
    }

    pub fn is_holder_on_back_off(&self, addr: &HolderAddr) -> bool {
        match self.state.get(addr) {
            Some(back_off) => back_off.is_on_back_off(),
            None => false,
        }
    }

    pub fn remove_holder(&mut self, addr: &HolderAddr) {
        self.state.remove(addr);
    }

    /// Order holders for a fetch: responsive holders first, holders on
    /// back off last, each group keeping its original order.
    ///
    /// Holders whose back off ran out are forgotten.
    pub fn order(&mut self, holders: &[HolderAddr]) -> Vec<HolderAddr> {
        self.state.retain(|_, back_off| back_off.is_on_back_off());
        let (mut ready, demoted): (Vec<_>, Vec<_>) = holders
            .iter()
            .cloned()
            .partition(|h| !self.is_holder_on_back_off(h));
        ready.extend(demoted);
        ready
    }
}

#[derive(Debug)]
pub(crate) struct BackOff {
    back_off: backon::ExponentialBackoff,
    pub(crate) current_interval: Duration,
    interval_start: Instant,
}

impl BackOff {
    pub fn new(
        first_back_off_interval: Duration,
        last_back_off_interval: Duration,
        num_back_off_intervals: usize,
    ) -> Self {
        let mut back_off = backon::ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(first_back_off_interval)
            .with_max_delay(last_back_off_interval)
            .with_max_times(num_back_off_intervals)
            .build();
        let current_interval =
            back_off.next().unwrap_or(first_back_off_interval);
        Self {
            back_off,
            current_interval,
            interval_start: Instant::now(),
        }
    }

    pub fn back_off(&mut self) {
        if let Some(interval) = self.back_off.next() {
            self.current_interval = interval;
        }
        self.interval_start = Instant::now();
    }

    pub fn is_on_back_off(&self) -> bool {
        self.interval_start.elapsed() < self.current_interval
    }
}
