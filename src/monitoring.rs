//! Rolling per-agent metrics and anomaly alerts.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::events::{EventBus, EventType};
use crate::registry::AgentHealth;

/// Alert severity, ordered so that `Critical > Warning`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Needs attention
    Warning,
    /// Needs immediate attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// Which threshold an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    /// Success rate under the warning or critical floor
    LowSuccessRate,
    /// Mean duration over the ceiling
    SlowExecution,
    /// Mean confidence under the floor
    LowConfidence,
}

/// An immutable alert record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id
    pub id: String,
    /// Severity
    pub severity: Severity,
    /// Agent the alert is about
    pub agent_id: String,
    /// Threshold that was crossed
    pub condition: AlertCondition,
    /// Human-readable description
    pub description: String,
    /// Observed value
    pub value: f64,
    /// Threshold that was crossed
    pub threshold: f64,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Sample {
    success: bool,
    duration_ms: f64,
    confidence: Option<f64>,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<Sample>,
    total_tracked: u64,
}

/// Aggregates over one agent's window, recomputed on read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Agent id
    pub agent_id: String,
    /// Samples in the window
    pub samples: usize,
    /// Samples ever tracked
    pub total_tracked: u64,
    /// Successes / samples
    pub success_rate: f64,
    /// Mean duration in the window
    pub mean_duration_ms: f64,
    /// Longest duration in the window
    pub peak_duration_ms: f64,
    /// Mean of the reported confidences, if any were reported
    pub mean_confidence: Option<f64>,
    /// Time of the latest sample
    pub last_seen: Option<DateTime<Utc>>,
    /// Health bucket from the success rate
    pub health: AgentHealth,
}

/// Full monitoring snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    /// Snapshot time
    pub generated_at: DateTime<Utc>,
    /// Per-agent aggregates
    pub agents: BTreeMap<String, AgentSnapshot>,
    /// Samples across all windows
    pub total_executions: usize,
    /// Success rate across all windows
    pub overall_success_rate: f64,
    /// Alerts not yet cleared
    pub active_alerts: usize,
    /// Critical alerts not yet cleared
    pub critical_alerts: usize,
    /// Up to ten newest alerts, newest first
    pub recent_alerts: Vec<Alert>,
}

/// Rolling-window monitor shared across jobs
pub struct Monitor {
    config: MonitoringConfig,
    windows: RwLock<HashMap<String, Window>>,
    alerts: RwLock<Vec<Alert>>,
    ongoing: Mutex<HashMap<(String, AlertCondition), Severity>>,
    bus: Option<Arc<EventBus>>,
}

impl Monitor {
    /// Creates a monitor that does not publish events
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
            ongoing: Mutex::new(HashMap::new()),
            bus: None,
        }
    }

    /// Creates a monitor that publishes `anomaly_detected` and `alert_cleared`
    pub fn with_event_bus(config: MonitoringConfig, bus: Arc<EventBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new(config)
        }
    }

    /// Feeds `agent_completed` / `agent_failed` events into the windows
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        for event_type in [EventType::AgentCompleted, EventType::AgentFailed] {
            let monitor: Weak<Self> = Arc::downgrade(self);
            bus.subscribe(event_type, move |event| {
                if let Some(monitor) = monitor.upgrade() {
                    let duration_ms = event.data.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
                    let confidence = event.data.get("confidence").and_then(Value::as_f64);
                    monitor.track_execution(
                        &event.agent_id,
                        event.event_type == EventType::AgentCompleted,
                        Duration::from_millis(duration_ms),
                        confidence,
                    );
                }
                Ok(())
            });
        }
    }

    /// Appends a sample to the agent's window, evicting the oldest when full
    pub fn track_execution(&self, agent_id: &str, success: bool, duration: Duration, confidence: Option<f64>) {
        let mut windows = self.windows.write();
        let window = windows.entry(agent_id.to_string()).or_default();
        if window.samples.len() >= self.config.window_size {
            window.samples.pop_front();
        }
        window.samples.push_back(Sample {
            success,
            duration_ms: duration.as_secs_f64() * 1000.0,
            confidence,
            at: Utc::now(),
        });
        window.total_tracked += 1;
    }

    fn snapshot(agent_id: &str, window: &Window) -> AgentSnapshot {
        let n = window.samples.len();
        let successes = window.samples.iter().filter(|s| s.success).count();
        let durations = window.samples.iter().map(|s| s.duration_ms);
        let confidences: Vec<f64> = window.samples.iter().filter_map(|s| s.confidence).collect();
        let success_rate = if n == 0 { 0.0 } else { successes as f64 / n as f64 };
        AgentSnapshot {
            agent_id: agent_id.to_string(),
            samples: n,
            total_tracked: window.total_tracked,
            success_rate,
            mean_duration_ms: if n == 0 { 0.0 } else { durations.clone().sum::<f64>() / n as f64 },
            peak_duration_ms: durations.fold(0.0, f64::max),
            mean_confidence: (!confidences.is_empty())
                .then(|| confidences.iter().sum::<f64>() / confidences.len() as f64),
            last_seen: window.samples.back().map(|s| s.at),
            health: if n == 0 {
                AgentHealth::Unknown
            } else if success_rate >= 0.95 {
                AgentHealth::Healthy
            } else if success_rate >= 0.80 {
                AgentHealth::Degraded
            } else {
                AgentHealth::Unhealthy
            },
        }
    }

    fn evaluate(&self, snap: &AgentSnapshot) -> Vec<(AlertCondition, Option<(Severity, f64, f64, String)>)> {
        let c = &self.config;
        let enough = snap.samples >= c.min_samples && snap.samples > 0;

        let success = if !enough {
            None
        } else if snap.success_rate < c.critical_success_rate {
            Some((
                Severity::Critical,
                snap.success_rate,
                c.critical_success_rate,
                format!("Success rate {:.2} below critical floor {:.2}", snap.success_rate, c.critical_success_rate),
            ))
        } else if snap.success_rate < c.warning_success_rate {
            Some((
                Severity::Warning,
                snap.success_rate,
                c.warning_success_rate,
                format!("Success rate {:.2} below {:.2}", snap.success_rate, c.warning_success_rate),
            ))
        } else {
            None
        };

        let ceiling = c.duration_ceiling_ms as f64;
        let slow = (snap.samples > 0 && snap.mean_duration_ms > ceiling).then(|| {
            (
                Severity::Warning,
                snap.mean_duration_ms,
                ceiling,
                format!("Mean duration {:.0}ms above {:.0}ms", snap.mean_duration_ms, ceiling),
            )
        });

        let confidence = match snap.mean_confidence {
            Some(mean) if enough && mean < c.min_mean_confidence => Some((
                Severity::Warning,
                mean,
                c.min_mean_confidence,
                format!("Mean confidence {:.2} below {:.2}", mean, c.min_mean_confidence),
            )),
            _ => None,
        };

        vec![
            (AlertCondition::LowSuccessRate, success),
            (AlertCondition::SlowExecution, slow),
            (AlertCondition::LowConfidence, confidence),
        ]
    }

    /// Checks every window against the thresholds and returns the alerts raised
    ///
    /// A condition alerts when it first appears or escalates. An unchanged
    /// ongoing condition stays silent; a condition that clears is forgotten.
    pub fn detect_anomalies(&self) -> Vec<Alert> {
        let snapshots: Vec<AgentSnapshot> = {
            let windows = self.windows.read();
            let mut ids: Vec<&String> = windows.keys().collect();
            ids.sort();
            ids.into_iter().map(|id| Self::snapshot(id, &windows[id])).collect()
        };

        let mut raised = Vec::new();
        {
            let mut ongoing = self.ongoing.lock();
            for snap in &snapshots {
                for (condition, crossing) in self.evaluate(snap) {
                    let key = (snap.agent_id.clone(), condition);
                    match crossing {
                        None => {
                            ongoing.remove(&key);
                        }
                        Some((severity, value, threshold, description)) => {
                            let previous = ongoing.insert(key, severity);
                            if previous.map_or(true, |p| severity > p) {
                                raised.push(Alert {
                                    id: Uuid::new_v4().to_string(),
                                    severity,
                                    agent_id: snap.agent_id.clone(),
                                    condition,
                                    description,
                                    value,
                                    threshold,
                                    timestamp: Utc::now(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if !raised.is_empty() {
            self.alerts.write().extend(raised.iter().cloned());
            for alert in &raised {
                warn!("[{}] {}: {}", alert.severity, alert.agent_id, alert.description);
                if let Some(bus) = &self.bus {
                    bus.emit(
                        EventType::AnomalyDetected,
                        &alert.agent_id,
                        None,
                        json!({
                            "alert_id": alert.id,
                            "severity": alert.severity,
                            "condition": alert.condition,
                            "value": alert.value,
                            "threshold": alert.threshold,
                        }),
                    );
                }
            }
        }
        raised
    }

    /// Aggregates for one agent
    pub fn agent_health(&self, agent_id: &str) -> Option<AgentSnapshot> {
        self.windows.read().get(agent_id).map(|w| Self::snapshot(agent_id, w))
    }

    /// Aggregates for every tracked agent
    pub fn dashboard_metrics(&self) -> Dashboard {
        let agents: BTreeMap<String, AgentSnapshot> = self
            .windows
            .read()
            .iter()
            .map(|(id, w)| (id.clone(), Self::snapshot(id, w)))
            .collect();
        let total_executions: usize = agents.values().map(|a| a.samples).sum();
        let successes: f64 = agents.values().map(|a| a.success_rate * a.samples as f64).sum();
        let alerts = self.alerts.read();
        Dashboard {
            generated_at: Utc::now(),
            total_executions,
            overall_success_rate: if total_executions == 0 { 0.0 } else { successes / total_executions as f64 },
            active_alerts: alerts.len(),
            critical_alerts: alerts.iter().filter(|a| a.severity == Severity::Critical).count(),
            recent_alerts: alerts.iter().rev().take(10).cloned().collect(),
            agents,
        }
    }

    /// Alerts not yet cleared, oldest first, optionally of one severity
    pub fn alerts(&self, severity: Option<Severity>) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect()
    }

    /// Acknowledges alerts for one agent or for all; returns how many were removed
    ///
    /// The matching ongoing conditions are forgotten too, so a condition that
    /// still holds alerts again on the next detection cycle.
    pub fn clear_alerts(&self, agent_id: Option<&str>) -> usize {
        let removed = {
            let mut alerts = self.alerts.write();
            let before = alerts.len();
            alerts.retain(|a| agent_id.map_or(false, |id| a.agent_id != id));
            before - alerts.len()
        };
        self.ongoing
            .lock()
            .retain(|(agent, _), _| agent_id.map_or(false, |id| agent != id));
        info!("Cleared {} alerts", removed);
        if let Some(bus) = &self.bus {
            bus.emit(
                EventType::AlertCleared,
                "monitor",
                None,
                json!({ "agent_id": agent_id, "cleared": removed }),
            );
        }
        removed
    }

    /// Drops all windows, alerts and ongoing conditions
    pub fn reset(&self) {
        self.windows.write().clear();
        self.alerts.write().clear();
        self.ongoing.lock().clear();
    }
}
