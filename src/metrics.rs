use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Pipelines started
pub const PIPELINES_STARTED: &str = "pipelines_started";
/// Pipelines that ended completed
pub const PIPELINES_COMPLETED: &str = "pipelines_completed";
/// Pipelines that ended failed
pub const PIPELINES_FAILED: &str = "pipelines_failed";
/// Pipelines that ended cancelled
pub const PIPELINES_CANCELLED: &str = "pipelines_cancelled";
/// Agent attempts made, retries included
pub const AGENT_ATTEMPTS: &str = "agent_attempts";
/// Retries scheduled after a transient failure
pub const AGENT_RETRIES: &str = "agent_retries";
/// Agents that ended on their fallback output
pub const FALLBACKS_USED: &str = "fallbacks_used";
/// Wall time of whole pipeline runs
pub const PIPELINE_DURATION: &str = "pipeline_duration";
/// Jobs currently processing
pub const JOBS_IN_FLIGHT: &str = "jobs_in_flight";

/// Count, total and last value of a timer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStat {
    /// Recorded samples
    pub count: u64,
    /// Sum of the samples in milliseconds
    pub total_ms: f64,
    /// Most recent sample in milliseconds
    pub last_ms: f64,
    /// Largest sample in milliseconds
    pub max_ms: f64,
}

impl TimerStat {
    /// Mean sample in milliseconds
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values
    pub counters: BTreeMap<String, u64>,
    /// Timer aggregates
    pub timers: BTreeMap<String, TimerStat>,
    /// Gauge values
    pub gauges: BTreeMap<String, f64>,
}

/// Collects process-wide pipeline counters, timers and gauges
#[derive(Clone, Default)]
pub struct Metrics {
    counters: Arc<RwLock<BTreeMap<String, u64>>>,
    timers: Arc<RwLock<BTreeMap<String, TimerStat>>>,
    gauges: Arc<RwLock<BTreeMap<String, f64>>>,
}

impl Metrics {
    /// Creates a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by 1
    pub async fn increment(&self, key: &str) {
        self.add(key, 1).await;
    }

    /// Increments a counter by `n`
    pub async fn add(&self, key: &str, n: u64) {
        let mut counters = self.counters.write().await;
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += n;
        debug!("Counter {}: {}", key, value);
    }

    /// Decrements a counter by 1, never below zero
    pub async fn decrement(&self, key: &str) {
        let mut counters = self.counters.write().await;
        let value = counters.entry(key.to_string()).or_insert(0);
        *value = value.saturating_sub(1);
        debug!("Counter {}: {}", key, value);
    }

    /// Folds a duration into a timer
    pub async fn record_time(&self, key: &str, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        let mut timers = self.timers.write().await;
        let stat = timers.entry(key.to_string()).or_default();
        stat.count += 1;
        stat.total_ms += ms;
        stat.last_ms = ms;
        stat.max_ms = stat.max_ms.max(ms);
    }

    /// Sets a gauge
    pub async fn set_gauge(&self, key: &str, value: f64) {
        self.gauges.write().await.insert(key.to_string(), value);
    }

    /// Current counter value
    pub async fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.read().await.get(key).copied()
    }

    /// Current timer aggregate
    pub async fn get_timer(&self, key: &str) -> Option<TimerStat> {
        self.timers.read().await.get(key).copied()
    }

    /// Current gauge value
    pub async fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.read().await.get(key).copied()
    }

    /// Copies every metric
    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.read().await.clone(),
            timers: self.timers.read().await.clone(),
            gauges: self.gauges.read().await.clone(),
        }
    }

    /// Logs every metric at info level
    pub async fn report(&self) {
        let snapshot = self.snapshot().await;
        info!("=== Pipeline Metrics ===");
        for (k, v) in &snapshot.counters {
            info!("  {}: {}", k, v);
        }
        for (k, t) in &snapshot.timers {
            info!("  {}: n={} mean={:.1}ms max={:.1}ms", k, t.count, t.mean_ms(), t.max_ms);
        }
        for (k, v) in &snapshot.gauges {
            info!("  {}: {}", k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters() {
        let metrics = Metrics::new();
        metrics.increment(AGENT_ATTEMPTS).await;
        metrics.add(AGENT_ATTEMPTS, 2).await;
        assert_eq!(metrics.get_counter(AGENT_ATTEMPTS).await, Some(3));

        metrics.decrement(JOBS_IN_FLIGHT).await;
        assert_eq!(metrics.get_counter(JOBS_IN_FLIGHT).await, Some(0));
    }

    #[tokio::test]
    async fn test_timers_aggregate() {
        let metrics = Metrics::new();
        metrics.record_time(PIPELINE_DURATION, Duration::from_millis(100)).await;
        metrics.record_time(PIPELINE_DURATION, Duration::from_millis(300)).await;

        let stat = metrics.get_timer(PIPELINE_DURATION).await.unwrap();
        assert_eq!(stat.count, 2);
        assert_eq!(stat.last_ms, 300.0);
        assert_eq!(stat.max_ms, 300.0);
        assert!((stat.mean_ms() - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_is_shared_across_clones() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.set_gauge("queue_depth", 4.0).await;
        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.gauges.get("queue_depth"), Some(&4.0));
    }
}
