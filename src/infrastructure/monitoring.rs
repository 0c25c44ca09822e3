// Monitoring - process-wide counters for mutations, notifications and push delivery
// Lock-free atomics so hot paths never wait on metrics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
pub struct MetricsCollector {
    mutations_succeeded: AtomicU64,
    mutations_failed: AtomicU64,
    mutation_time_ms: AtomicU64,
    notifications_created: AtomicU64,
    notifications_purged: AtomicU64,
    push_delivered: AtomicU64,
    push_dropped: AtomicU64,
    push_sessions_opened: AtomicU64,
    push_sessions_closed: AtomicU64,
    started_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Dropped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub mutations_succeeded: u64,
    pub mutations_failed: u64,
    pub avg_mutation_time_ms: f64,
    pub notifications_created: u64,
    pub notifications_purged: u64,
    pub push_delivered: u64,
    pub push_dropped: u64,
    pub push_sessions_open: u64,
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mutations_succeeded: AtomicU64::new(0),
            mutations_failed: AtomicU64::new(0),
            mutation_time_ms: AtomicU64::new(0),
            notifications_created: AtomicU64::new(0),
            notifications_purged: AtomicU64::new(0),
            push_delivered: AtomicU64::new(0),
            push_dropped: AtomicU64::new(0),
            push_sessions_opened: AtomicU64::new(0),
            push_sessions_closed: AtomicU64::new(0),
            started_at: SystemTime::now(),
        }
    }

    /// Record a completed engagement mutation
    pub fn record_mutation(&self, duration: Duration, success: bool) {
        if success {
            self.mutations_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.mutations_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.mutation_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_notification_created(&self) {
        self.notifications_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notifications_purged(&self, count: u64) {
        self.notifications_purged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_push(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Delivered => self.push_delivered.fetch_add(1, Ordering::Relaxed),
            PushOutcome::Dropped => self.push_dropped.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_session_opened(&self) {
        self.push_sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.push_sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self.mutations_succeeded.load(Ordering::Relaxed);
        let failed = self.mutations_failed.load(Ordering::Relaxed);
        let total = succeeded + failed;
        let avg_mutation_time_ms = if total > 0 {
            self.mutation_time_ms.load(Ordering::Relaxed) as f64 / total as f64
        } else {
            0.0
        };
        let opened = self.push_sessions_opened.load(Ordering::Relaxed);
        let closed = self.push_sessions_closed.load(Ordering::Relaxed);

        MetricsSnapshot {
            mutations_succeeded: succeeded,
            mutations_failed: failed,
            avg_mutation_time_ms,
            notifications_created: self.notifications_created.load(Ordering::Relaxed),
            notifications_purged: self.notifications_purged.load(Ordering::Relaxed),
            push_delivered: self.push_delivered.load(Ordering::Relaxed),
            push_dropped: self.push_dropped.load(Ordering::Relaxed),
            push_sessions_open: opened.saturating_sub(closed),
            uptime_seconds: self
                .started_at
                .elapsed()
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global tracing subscriber (`RUST_LOG`, default `info`)
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engagement_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_events() {
        let metrics = MetricsCollector::new();
        metrics.record_mutation(Duration::from_millis(10), true);
        metrics.record_mutation(Duration::from_millis(30), false);
        metrics.record_push(PushOutcome::Delivered);
        metrics.record_push(PushOutcome::Dropped);
        metrics.record_push(PushOutcome::Dropped);
        metrics.record_session_opened();
        metrics.record_session_opened();
        metrics.record_session_closed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.mutations_succeeded, 1);
        assert_eq!(snapshot.mutations_failed, 1);
        assert_eq!(snapshot.avg_mutation_time_ms, 20.0);
        assert_eq!(snapshot.push_delivered, 1);
        assert_eq!(snapshot.push_dropped, 2);
        assert_eq!(snapshot.push_sessions_open, 1);
    }
}
