//! Status - pump counters and their snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by every worker of one pump.
#[derive(Debug, Default)]
pub struct PumpStats {
    claimed: AtomicU64,
    handled: AtomicU64,
    handler_failures: AtomicU64,
    skipped: AtomicU64,
    idle_polls: AtomicU64,
    provider_errors: AtomicU64,
    recovered: AtomicU64,
}

impl PumpStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_poll(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovered(&self, count: u64) {
        self.recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PumpStatus {
        PumpStatus {
            claimed: self.claimed.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a pump's counters.
///
/// `handled` counts handler invocations that returned `Ok`; failures and
/// panics are counted in `handler_failures` instead. `idle_polls` counts
/// claims that found nothing due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpStatus {
    pub claimed: u64,
    pub handled: u64,
    pub handler_failures: u64,
    pub skipped: u64,
    pub idle_polls: u64,
    pub provider_errors: u64,
    pub recovered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let stats = PumpStats::new();
        stats.record_claimed();
        stats.record_claimed();
        stats.record_handled();
        stats.record_handler_failure();
        stats.record_idle_poll();
        stats.record_recovered(3);

        let status = stats.snapshot();
        assert_eq!(status.claimed, 2);
        assert_eq!(status.handled, 1);
        assert_eq!(status.handler_failures, 1);
        assert_eq!(status.skipped, 0);
        assert_eq!(status.idle_polls, 1);
        assert_eq!(status.recovered, 3);
    }

    #[test]
    fn status_serializes_as_flat_counters() {
        let json = serde_json::to_value(PumpStatus::default()).unwrap();
        assert_eq!(json["claimed"], 0);
        assert_eq!(json["provider_errors"], 0);
    }
}
