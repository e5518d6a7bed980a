//! Session-scoped, rate-limited diagnostics.
//!
//! Kernels report recoverable oddities (for example quantizing 32-bit
//! source elements through a path tuned for 16-bit ones) through a
//! [`DiagnosticSink`] owned by the caller's execution context. The rate
//! limiting state lives in the sink instance, so two sessions never share
//! counters and tests can inspect exactly what was reported.

use std::collections::HashMap;
use std::sync::Mutex;

/// Receiver for kernel diagnostics.
pub trait DiagnosticSink: Send + Sync {
    /// Report a warning identified by a stable `key`.
    fn warn(&self, key: &str, message: &str);
}

/// Logs the first `limit` occurrences of each key at WARN, later ones at DEBUG.
#[derive(Debug)]
pub struct RateLimitedSink {
    limit: u32,
    seen: Mutex<HashMap<String, u64>>,
}

impl RateLimitedSink {
    pub fn new(limit: u32) -> Self {
        Self { limit, seen: Mutex::new(HashMap::new()) }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// How many times `key` has been reported to this sink.
    pub fn occurrences(&self, key: &str) -> u64 {
        let seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.get(key).copied().unwrap_or(0)
    }

    /// Forget all counters.
    pub fn reset(&self) {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.clear();
    }
}

impl Default for RateLimitedSink {
    fn default() -> Self {
        Self::new(10)
    }
}

impl DiagnosticSink for RateLimitedSink {
    fn warn(&self, key: &str, message: &str) {
        // A panic elsewhere while holding the lock leaves the counters usable.
        let count = {
            let mut seen = match self.seen.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let count = seen.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count <= u64::from(self.limit) {
            tracing::warn!(key = %key, occurrence = count, "{}", message);
        } else {
            tracing::debug!(key = %key, occurrence = count, "(rate-limited) {}", message);
        }
    }
}

/// Discards every diagnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn warn(&self, _key: &str, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    fn setup_test_tracing() {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    }

    #[test]
    fn test_counts_every_occurrence() {
        setup_test_tracing();
        let sink = RateLimitedSink::new(2);

        for _ in 0..5 {
            sink.warn("wide_source", "first");
        }
        sink.warn("other", "second");

        assert_eq!(sink.occurrences("wide_source"), 5);
        assert_eq!(sink.occurrences("other"), 1);
        assert_eq!(sink.occurrences("never"), 0);
    }

    #[test]
    fn test_sessions_do_not_share_state() {
        setup_test_tracing();
        let a = RateLimitedSink::new(1);
        let b = RateLimitedSink::new(1);

        a.warn("k", "from a");
        a.warn("k", "from a again");

        assert_eq!(a.occurrences("k"), 2);
        assert_eq!(b.occurrences("k"), 0);
    }

    #[test]
    fn test_reset_clears_counters() {
        let sink = RateLimitedSink::default();
        sink.warn("k", "m");
        sink.reset();
        assert_eq!(sink.occurrences("k"), 0);
        assert_eq!(sink.limit(), 10);
    }

    #[test]
    fn test_concurrent_reports_are_all_counted() {
        setup_test_tracing();
        let sink = Arc::new(RateLimitedSink::new(3));
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    sink.warn("concurrent", &format!("thread {i}"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.occurrences("concurrent"), 8);
    }

    #[test]
    fn test_null_sink_is_silent() {
        NullSink.warn("k", "m");
    }
}
