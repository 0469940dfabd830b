//! Windowed failure counting for the passive checks.

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    second: u64,
    total: u64,
    failed: u64,
}

/// A sliding log of request outcomes, one bucket per second.
///
/// Precise deltas over the window are not needed; bucket granularity is
/// enough to decide whether an upstream is misbehaving.
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    window_secs: u64,
    buckets: VecDeque<Bucket>,
}

impl SlidingWindow {
    pub(crate) fn new(window: Duration) -> Self {
        Self { window_secs: window.as_secs().max(1), buckets: VecDeque::new() }
    }

    pub(crate) fn record(&mut self, now_sec: u64, failed: bool) {
        self.prune(now_sec);
        match self.buckets.back_mut() {
            Some(bucket) if bucket.second == now_sec => {
                bucket.total += 1;
                bucket.failed += u64::from(failed);
            }
            _ => self.buckets.push_back(Bucket {
                second: now_sec,
                total: 1,
                failed: u64::from(failed),
            }),
        }
    }

    /// The failure rate over the window, or `None` with no samples.
    pub(crate) fn failure_rate(&mut self, now_sec: u64) -> Option<f64> {
        self.prune(now_sec);
        let (total, failed) = self
            .buckets
            .iter()
            .fold((0u64, 0u64), |(t, f), b| (t + b.total, f + b.failed));
        (total > 0).then(|| failed as f64 / total as f64)
    }

    pub(crate) fn reset(&mut self) {
        self.buckets.clear();
    }

    fn prune(&mut self, now_sec: u64) {
        let horizon = now_sec.saturating_sub(self.window_secs);
        while self.buckets.front().is_some_and(|b| b.second < horizon) {
            self.buckets.pop_front();
        }
    }
}

/// Trips when the windowed failure rate exceeds a threshold and stays
/// tripped for the ban window.
#[derive(Debug)]
pub(crate) struct Breaker {
    rate: f64,
    ban_secs: u64,
    window: SlidingWindow,
    banned_until: Option<u64>,
}

impl Breaker {
    pub(crate) fn new(rate: f64, detection_window: Duration, ban_window: Duration) -> Self {
        Self {
            rate,
            ban_secs: ban_window.as_secs().max(1),
            window: SlidingWindow::new(detection_window),
            banned_until: None,
        }
    }

    pub(crate) fn record(&mut self, now_sec: u64, failed: bool) {
        self.window.record(now_sec, failed);
        if self.banned_until.is_none()
            && self.window.failure_rate(now_sec).is_some_and(|rate| rate > self.rate)
        {
            self.banned_until = Some(now_sec + self.ban_secs);
        }
    }

    pub(crate) fn is_passing(&mut self, now_sec: u64) -> bool {
        match self.banned_until {
            Some(until) if now_sec < until => false,
            Some(_) => {
                // Ban expired; start over with a clean window.
                self.banned_until = None;
                self.window.reset();
                true
            }
            None => true,
        }
    }
}
