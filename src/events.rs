//! In-process publish/subscribe for pipeline lifecycle and diagnostic events.
//!
//! Delivery is synchronous and ordered by subscription time. A handler that
//! returns an error or panics is logged and skipped; the publisher never sees it.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Event type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A pipeline run was accepted and is about to plan
    PipelineStarted,
    /// A pipeline run finished without a required agent failing
    PipelineCompleted,
    /// A pipeline run failed (planning error or required agent failure)
    PipelineFailed,
    /// A pipeline run was cancelled or timed out
    PipelineCancelled,
    /// An agent invocation started
    AgentStarted,
    /// An agent ended succeeded or fallback-used
    AgentCompleted,
    /// An agent ended failed
    AgentFailed,
    /// An agent was skipped without invocation
    AgentSkipped,
    /// An agent attempt failed transiently and will be retried
    AgentRetrying,
    /// The overall score for a job was computed
    ScoreCalculated,
    /// A score came with low confidence
    LowConfidence,
    /// A score came with high confidence
    HighConfidence,
    /// A job should be looked at by a human reviewer
    ReviewRequested,
    /// A human reviewer recorded an outcome
    FeedbackReceived,
    /// Component weights changed
    WeightsUpdated,
    /// Monitoring raised an alert
    AnomalyDetected,
    /// An operator cleared alerts
    AlertCleared,
}

impl EventType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline_started",
            Self::PipelineCompleted => "pipeline_completed",
            Self::PipelineFailed => "pipeline_failed",
            Self::PipelineCancelled => "pipeline_cancelled",
            Self::AgentStarted => "agent_started",
            Self::AgentCompleted => "agent_completed",
            Self::AgentFailed => "agent_failed",
            Self::AgentSkipped => "agent_skipped",
            Self::AgentRetrying => "agent_retrying",
            Self::ScoreCalculated => "score_calculated",
            Self::LowConfidence => "low_confidence",
            Self::HighConfidence => "high_confidence",
            Self::ReviewRequested => "review_requested",
            Self::FeedbackReceived => "feedback_received",
            Self::WeightsUpdated => "weights_updated",
            Self::AnomalyDetected => "anomaly_detected",
            Self::AlertCleared => "alert_cleared",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Unique event id
    pub id: String,
    /// Type tag
    pub event_type: EventType,
    /// Emitting agent, or `orchestrator`/`monitor`/... for infrastructure
    pub agent_id: String,
    /// Job the event belongs to, if any
    pub job_id: Option<String>,
    /// Time of creation
    pub timestamp: DateTime<Utc>,
    /// Opaque payload
    pub data: Value,
}

impl AgentEvent {
    /// Creates an event stamped with the current time
    pub fn new(event_type: EventType, agent_id: impl Into<String>, job_id: Option<&str>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            agent_id: agent_id.into(),
            job_id: job_id.map(str::to_string),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Which events a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Exactly one type
    Only(EventType),
    /// Every type
    All,
}

impl EventFilter {
    fn matches(&self, event_type: EventType) -> bool {
        match self {
            Self::Only(t) => *t == event_type,
            Self::All => true,
        }
    }
}

impl From<EventType> for EventFilter {
    fn from(t: EventType) -> Self {
        Self::Only(t)
    }
}

/// Criteria for [`EventBus::history`]; empty fields match anything
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Restrict to one type
    pub event_type: Option<EventType>,
    /// Restrict to one job
    pub job_id: Option<String>,
    /// Restrict to one emitting agent
    pub agent_id: Option<String>,
}

impl HistoryFilter {
    /// Filter on a single event type
    pub fn of_type(event_type: EventType) -> Self {
        Self { event_type: Some(event_type), ..Self::default() }
    }

    /// Filter on a single job
    pub fn for_job(job_id: &str) -> Self {
        Self { job_id: Some(job_id.to_string()), ..Self::default() }
    }

    fn matches(&self, event: &AgentEvent) -> bool {
        self.event_type.map_or(true, |t| t == event.event_type)
            && self.job_id.as_deref().map_or(true, |j| event.job_id.as_deref() == Some(j))
            && self.agent_id.as_deref().map_or(true, |a| event.agent_id == a)
    }
}

/// Event handler signature
pub type Handler = Arc<dyn Fn(&AgentEvent) -> Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]
pub type SubscriptionId = u64;

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: Handler,
}

/// Bus counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    /// Events published per type
    pub published: BTreeMap<String, u64>,
    /// Total events published
    pub total_published: u64,
    /// Handler calls that returned an error or panicked
    pub handler_failures: u64,
    /// Live subscriptions
    pub subscribers: usize,
    /// Events currently retained
    pub history_len: usize,
}

/// Publish/subscribe channel with a bounded history
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    history: Mutex<VecDeque<AgentEvent>>,
    capacity: usize,
    next_id: AtomicU64,
    stats: Mutex<EventStats>,
}

impl EventBus {
    /// Creates a bus retaining at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            stats: Mutex::new(EventStats::default()),
        }
    }

    /// Registers a handler for one type or for every type
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&AgentEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push(Subscription {
            id,
            filter: filter.into(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Removes a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Convenience wrapper building and publishing an event
    pub fn emit(&self, event_type: EventType, agent_id: &str, job_id: Option<&str>, data: Value) {
        self.publish(AgentEvent::new(event_type, agent_id, job_id, data));
    }

    /// Appends the event to history, then delivers it to matching handlers in
    /// subscription order
    ///
    /// Handlers run outside the bus locks, so a handler may publish again.
    pub fn publish(&self, event: AgentEvent) {
        {
            let mut history = self.history.lock();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        {
            let mut stats = self.stats.lock();
            *stats.published.entry(event.event_type.to_string()).or_insert(0) += 1;
            stats.total_published += 1;
        }

        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.filter.matches(event.event_type))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            if let Some(reason) = failure {
                self.stats.lock().handler_failures += 1;
                warn!(target: "event_bus", "Handler for {} event {} failed: {}", event.event_type, event.id, reason);
            }
        }
    }

    /// Most recent matching events, newest last
    pub fn history(&self, filter: &HistoryFilter, limit: usize) -> Vec<AgentEvent> {
        let history = self.history.lock();
        let mut matched: Vec<AgentEvent> = history
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Drops all retained events
    pub fn clear_history(&self) {
        self.history.lock().clear();
        debug!("Event history cleared");
    }

    /// Snapshot of the bus counters
    pub fn stats(&self) -> EventStats {
        let mut stats = self.stats.lock().clone();
        stats.subscribers = self.subscriptions.read().len();
        stats.history_len = self.history.lock().len();
        stats
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Installs the standard handlers: debug logging of every event and
/// confidence triage of `score_calculated` events
pub fn install_default_handlers(bus: &Arc<EventBus>) {
    bus.subscribe(EventFilter::All, |event| {
        debug!(
            target: "event_bus",
            "{} from {} (job {})",
            event.event_type,
            event.agent_id,
            event.job_id.as_deref().unwrap_or("-")
        );
        Ok(())
    });

    let weak = Arc::downgrade(bus);
    bus.subscribe(EventType::ScoreCalculated, move |event| {
        let Some(bus) = weak.upgrade() else {
            return Ok(());
        };
        let Some(confidence) = event.data.get("confidence").and_then(Value::as_f64) else {
            return Ok(());
        };
        let job = event.job_id.as_deref();
        if confidence < 0.7 {
            bus.emit(
                EventType::LowConfidence,
                &event.agent_id,
                job,
                serde_json::json!({ "confidence": confidence }),
            );
            bus.emit(
                EventType::ReviewRequested,
                &event.agent_id,
                job,
                serde_json::json!({ "reason": "low_confidence", "confidence": confidence }),
            );
        } else if confidence >= 0.9 {
            bus.emit(
                EventType::HighConfidence,
                &event.agent_id,
                job,
                serde_json::json!({ "confidence": confidence }),
            );
        }
        Ok(())
    });
}
