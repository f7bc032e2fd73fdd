//! In-process run counters.
//!
//! Lock-free atomics, read via [`Metrics::snapshot`]. Nothing is exported; the CLI
//! logs a snapshot when it finishes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub configurations_processed: AtomicU64,
    pub groups_claimed: AtomicU64,
    pub rows_aggregated: AtomicU64,
    pub files_generated: AtomicU64,
    pub control_files_generated: AtomicU64,
    pub files_uploaded: AtomicU64,
    pub upload_failures: AtomicU64,
    pub duplicate_claims: AtomicU64,

    // Timing (cumulative microseconds)
    pub query_time_us: AtomicU64,
    pub upload_time_us: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            configurations_processed: AtomicU64::new(0),
            groups_claimed: AtomicU64::new(0),
            rows_aggregated: AtomicU64::new(0),
            files_generated: AtomicU64::new(0),
            control_files_generated: AtomicU64::new(0),
            files_uploaded: AtomicU64::new(0),
            upload_failures: AtomicU64::new(0),
            duplicate_claims: AtomicU64::new(0),
            query_time_us: AtomicU64::new(0),
            upload_time_us: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_configurations_processed(&self) {
        self.configurations_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_group_claimed(&self, rows: usize) {
        self.groups_claimed.fetch_add(1, Ordering::Relaxed);
        self.rows_aggregated.fetch_add(rows as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_files_generated(&self) {
        self.files_generated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_control_files_generated(&self) {
        self.control_files_generated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_files_uploaded(&self) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_upload_failures(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_duplicate_claims(&self) {
        self.duplicate_claims.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_query_time(&self, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.query_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_upload_time(&self, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.upload_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            configurations_processed: self.configurations_processed.load(Ordering::Relaxed),
            groups_claimed: self.groups_claimed.load(Ordering::Relaxed),
            rows_aggregated: self.rows_aggregated.load(Ordering::Relaxed),
            files_generated: self.files_generated.load(Ordering::Relaxed),
            control_files_generated: self.control_files_generated.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            duplicate_claims: self.duplicate_claims.load(Ordering::Relaxed),
            query_time_us: self.query_time_us.load(Ordering::Relaxed),
            upload_time_us: self.upload_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub configurations_processed: u64,
    pub groups_claimed: u64,
    pub rows_aggregated: u64,
    pub files_generated: u64,
    pub control_files_generated: u64,
    pub files_uploaded: u64,
    pub upload_failures: u64,
    pub duplicate_claims: u64,
    pub query_time_us: u64,
    pub upload_time_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_group_claimed(3);
        metrics.record_group_claimed(2);
        metrics.inc_upload_failures();

        let snap = metrics.snapshot();
        assert_eq!(snap.groups_claimed, 2);
        assert_eq!(snap.rows_aggregated, 5);
        assert_eq!(snap.upload_failures, 1);
        assert_eq!(snap.files_generated, 0);
    }
}
