//! Pipeline counters. Incremented concurrently by simultaneous runs.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct Stats {
    processed: AtomicU64,
    forwarded: AtomicU64,
    saved: AtomicU64,
    errors: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            saved: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saved(&self) {
        self.saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub forwarded: u64,
    pub saved: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    /// Human-readable summary used by the `.vo stats` command and CLI.
    pub fn render(&self) -> String {
        format!(
            "Processed: {}\nForwarded: {}\nSaved: {}\nErrors: {}\nUptime: {}h{:02}m",
            self.processed,
            self.forwarded,
            self.saved,
            self.errors,
            self.uptime_secs / 3600,
            (self.uptime_secs % 3600) / 60,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let stats = Stats::new();
        stats.record_processed();
        stats.record_processed();
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.forwarded, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let stats = Arc::new(Stats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = stats.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    s.record_processed();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(stats.snapshot().processed, 800);
    }
}
