//! Sequential access detection and readahead window sizing.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::Duration;
use tokio::time::Instant;

/// The window a fresh sequential run starts with.
pub(crate) const MIN_WINDOW: u64 = 64 * 1024;

/// Reads starting this close to the previous end still count as
/// sequential.
pub(crate) const SEQUENTIAL_GAP: u64 = 4 * 1024;

const HISTORY_CAPACITY: usize = 64;
const HISTORY_LIFESPAN: Duration = Duration::from_secs(1);
const HISTORY_VALIDITY_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    at: Instant,
    size: u64,
}

/// Watches the offsets of successive reads of one session and proposes
/// the range to prefetch behind the current one.
#[derive(Debug)]
pub(crate) struct ReadaheadPlanner {
    limit: u64,
    max_window: u64,
    window: u64,
    round_trip_time: Duration,
    last_end: Option<u64>,
    streak: u32,
    history: VecDeque<HistoryEntry>,
    requested_bytes: u64,
}

impl ReadaheadPlanner {
    pub fn new(limit: u64, round_trip_time: Duration) -> Self {
        Self {
            limit,
            max_window: limit,
            window: MIN_WINDOW.min(limit),
            round_trip_time,
            last_end: None,
            streak: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            requested_bytes: 0,
        }
    }

    /// Feed the planner one served read.
    pub fn observe(&mut self, offset: u64, size: u64) {
        if self.limit == 0 {
            return;
        }
        self.add_to_history(size);

        let sequential = self
            .last_end
            .is_some_and(|end| offset.abs_diff(end) <= SEQUENTIAL_GAP);
        if sequential {
            if self.streak > 0 {
                self.expand();
            }
            self.streak = self.streak.saturating_add(1);
        } else {
            self.streak = 0;
            self.window = MIN_WINDOW.min(self.max_window);
        }
        self.last_end = Some(offset + size);
    }

    /// The range worth prefetching now, if the access pattern is
    /// sequential.
    pub fn propose(&self) -> Option<Range<u64>> {
        match self.last_end {
            Some(end) if self.streak > 0 && self.window > 0 => {
                Some(end..end.saturating_add(self.window))
            }
            _ => None,
        }
    }

    /// The current window size.
    pub fn window(&self) -> u64 {
        self.window
    }

    fn expand(&mut self) {
        // grow fast while the window is tiny compared to the cap
        let factor = if self.window < self.max_window / 16 { 4 } else { 2 };
        self.window = (self.window * factor).min(self.max_window);
    }

    fn add_to_history(&mut self, size: u64) {
        let now = Instant::now();
        while self.history.len() >= HISTORY_CAPACITY
            || self
                .history
                .front()
                .is_some_and(|e| e.at + HISTORY_LIFESPAN < now)
        {
            if let Some(old) = self.history.pop_front() {
                self.requested_bytes -= old.size;
            }
        }

        self.history.push_back(HistoryEntry { at: now, size });
        self.requested_bytes += size;

        if let Some(oldest) = self.history.front() {
            let span = now.duration_since(oldest.at);
            if self.history.len() >= HISTORY_VALIDITY_THRESHOLD
                && !span.is_zero()
            {
                self.adjust_max_window(span);
            }
        }
    }

    /// Fit the largest window to what can be consumed within two round
    /// trips at the observed throughput.
    fn adjust_max_window(&mut self, span: Duration) {
        if self.round_trip_time.is_zero() {
            return;
        }
        let throughput = self.requested_bytes as f64 / span.as_secs_f64();
        let rtt = self.round_trip_time.as_secs_f64();
        let fit = (2.0 * throughput * rtt) as u64;
        self.max_window = fit.clamp(MIN_WINDOW.min(self.limit), self.limit);
        self.window = self.window.min(self.max_window);
    }
}
