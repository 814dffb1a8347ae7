//! Call statistics for a mounted filesystem.
//!
//! Counters are lock-free and shared by every worker thread. The mount
//! binary logs a [`ConnectionStatsSnapshot`] when it shuts down.
//!
//! ```
//! use rpcfs_mount::ConnectionStats;
//! use std::time::Duration;
//!
//! let stats = ConnectionStats::new();
//! stats.record_success(Duration::from_micros(250));
//! stats.record_transport_error(Duration::from_millis(2));
//!
//! let snap = stats.snapshot();
//! assert_eq!(snap.calls, 2);
//! assert_eq!(snap.transport_errors, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free per-mount call counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    calls: AtomicU64,
    remote_failures: AtomicU64,
    transport_errors: AtomicU64,
    reconnects: AtomicU64,
    pool_waits: AtomicU64,
    pool_timeouts: AtomicU64,
    unavailable: AtomicU64,
    latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote call that returned `Success`.
    #[inline]
    pub fn record_success(&self, latency: Duration) {
        self.record_call(latency);
    }

    /// A remote call that returned a failure status.
    #[inline]
    pub fn record_remote_failure(&self, latency: Duration) {
        self.record_call(latency);
        self.remote_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A remote call that raised a transport or protocol error.
    #[inline]
    pub fn record_transport_error(&self, latency: Duration) {
        self.record_call(latency);
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A closed connection was reopened.
    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// A borrower found the pool empty and had to wait.
    #[inline]
    pub fn record_pool_wait(&self) {
        self.pool_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// A bounded wait for a connection expired.
    #[inline]
    pub fn record_pool_timeout(&self) {
        self.pool_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// An operation failed because no connection could be obtained.
    #[inline]
    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    fn record_call(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.latency_us.fetch_add(us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            remote_failures: self.remote_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            pool_waits: self.pool_waits.load(Ordering::Relaxed),
            pool_timeouts: self.pool_timeouts.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            total_latency_us: self.latency_us.load(Ordering::Relaxed),
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.calls,
            &self.remote_failures,
            &self.transport_errors,
            &self.reconnects,
            &self.pool_waits,
            &self.pool_timeouts,
            &self.unavailable,
            &self.latency_us,
            &self.max_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A serializable snapshot of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatsSnapshot {
    /// Remote calls that produced a reply or a transport error.
    pub calls: u64,
    /// Calls answered with a non-success status.
    pub remote_failures: u64,
    /// Calls that failed in the channel and were reported as canceled.
    pub transport_errors: u64,
    pub reconnects: u64,
    pub pool_waits: u64,
    pub pool_timeouts: u64,
    /// Operations rejected because no connection was available.
    pub unavailable: u64,
    pub total_latency_us: u64,
    pub max_latency_us: u64,
}

impl ConnectionStatsSnapshot {
    /// Mean call latency in milliseconds, 0.0 if no calls were made.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.calls as f64 / 1000.0
        }
    }

    /// Fraction of calls that hit a transport error.
    pub fn transport_error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.transport_errors as f64 / self.calls as f64
        }
    }
}
