//! Run statistics for a load coordinator

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::report::{LoadOutcome, LoadReport};

/// Load statistics snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    /// Jobs run to an outcome
    pub jobs_run: u64,
    /// Jobs committed
    pub jobs_committed: u64,
    /// Jobs failed
    pub jobs_failed: u64,
    /// Jobs cancelled
    pub jobs_cancelled: u64,
    /// Total rows committed
    pub rows_committed: u64,
    /// Total time spent in committed transfers (milliseconds)
    pub total_transfer_time_ms: u64,
    /// Average committed rows per second
    pub rows_per_second: f64,
}

/// Atomic load statistics
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicLoadStats {
    pub jobs_run: AtomicU64,
    pub jobs_committed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_cancelled: AtomicU64,
    pub rows_committed: AtomicU64,
    pub total_transfer_time_ms: AtomicU64,
}

impl AtomicLoadStats {
    /// Record a committed job
    pub fn record_commit(&self, rows: u64, duration: Duration) {
        self.jobs_run.fetch_add(1, Ordering::Relaxed);
        self.jobs_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_committed.fetch_add(rows, Ordering::Relaxed);
        self.total_transfer_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed job
    pub fn record_failure(&self) {
        self.jobs_run.fetch_add(1, Ordering::Relaxed);
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancelled job
    pub fn record_cancel(&self) {
        self.jobs_run.fetch_add(1, Ordering::Relaxed);
        self.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record whatever a report says happened
    pub fn record(&self, report: &LoadReport) {
        match report.outcome() {
            LoadOutcome::Committed => self.record_commit(report.committed(), report.elapsed()),
            LoadOutcome::Failed => self.record_failure(),
            LoadOutcome::Cancelled => self.record_cancel(),
        }
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> LoadStats {
        let rows = self.rows_committed.load(Ordering::Relaxed);
        let time_ms = self.total_transfer_time_ms.load(Ordering::Relaxed);
        let rps = if time_ms > 0 {
            (rows as f64 * 1000.0) / time_ms as f64
        } else {
            0.0
        };

        LoadStats {
            jobs_run: self.jobs_run.load(Ordering::Relaxed),
            jobs_committed: self.jobs_committed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            rows_committed: rows,
            total_transfer_time_ms: time_ms,
            rows_per_second: rps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_load_stats() {
        let stats = AtomicLoadStats::default();

        stats.record_commit(100, Duration::from_millis(200));
        stats.record_commit(50, Duration::from_millis(100));
        stats.record_failure();
        stats.record_cancel();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs_run, 4);
        assert_eq!(snapshot.jobs_committed, 2);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_cancelled, 1);
        assert_eq!(snapshot.rows_committed, 150);
        assert_eq!(snapshot.total_transfer_time_ms, 300);
        assert!(snapshot.rows_per_second > 0.0);
    }

    #[test]
    fn test_empty_stats_have_zero_rate() {
        let snapshot = AtomicLoadStats::default().snapshot();
        assert_eq!(snapshot, LoadStats::default());
    }
}
