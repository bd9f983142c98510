//! Operational surface for the embedding service
//!
//! [`JobManager`] owns the process-scoped components (registry, bus, memory,
//! monitor, learner, orchestrator) and runs each submitted job in its own
//! tokio task. Every component is reachable through the manager, so a
//! transport layer only has to map requests onto these methods.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{ids, register_builtin, AgentServices};
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::events::{install_default_handlers, EventBus, EventType};
use crate::explainer::{self, Explanation};
use crate::judge::Evaluation;
use crate::learning::{AdaptiveLearner, LearningSummary, Personalization, WeightChange, WeightUpdate};
use crate::memory::{AccuracyReport, AgentMemory, MemoryStats, Outcome, SimilarCase};
use crate::metrics::{self, Metrics};
use crate::monitoring::{AgentSnapshot, Alert, Dashboard, Monitor, Severity};
use crate::orchestrator::{Orchestrator, PipelineResult, PipelineStatus};
use crate::registry::{AgentInfo, AgentRegistry};
use crate::scoring::{BenchmarkResult, ScoreBreakdown, Weights};

const SOURCE: &str = "job_manager";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Work submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub user_id: String,
    /// Profile payload: `form_fields`, `cv_data`, `github_data`, `portfolio_data`
    pub input: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl From<PipelineStatus> for JobStatus {
    fn from(status: PipelineStatus) -> Self {
        match status {
            PipelineStatus::Completed => Self::Completed,
            PipelineStatus::Failed => Self::Failed,
            PipelineStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Status view of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_score: Option<f64>,
    pub error: Option<String>,
    /// Job this one re-runs, if any
    pub regenerated_from: Option<String>,
}

/// Registry, monitoring and review view of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealthView {
    pub info: AgentInfo,
    pub monitoring: Option<AgentSnapshot>,
    pub accuracy: AccuracyReport,
}

/// Liveness summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// `healthy`, or `degraded` when planning fails or critical alerts are open
    pub status: String,
    pub agents: usize,
    pub plannable: bool,
    pub jobs_total: usize,
    pub jobs_active: usize,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub memory_entries: usize,
}

struct JobSlot {
    summary: JobSummary,
    input: Value,
    result: Option<PipelineResult>,
    cancel: CancellationToken,
}

/// Runs jobs and exposes every read and write operation of the core
#[derive(Clone)]
pub struct JobManager {
    services: AgentServices,
    registry: Arc<AgentRegistry>,
    monitor: Arc<Monitor>,
    orchestrator: Arc<Orchestrator>,
    metrics: Metrics,
    jobs: Arc<Mutex<HashMap<String, JobSlot>>>,
}

impl JobManager {
    /// Builds every component from `config` and registers the built-in agents
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(EventBus::new(config.events.history_capacity));
        let memory = Arc::new(AgentMemory::new(config.memory.clone()));
        let learner = Arc::new(
            AdaptiveLearner::new(config.learning.clone(), Arc::clone(&memory)).with_event_bus(Arc::clone(&bus)),
        );
        Self::with_services(AgentServices::new(config, memory, bus, learner))
    }

    /// Registers the built-in agents over existing services
    pub fn with_services(services: AgentServices) -> Result<Self> {
        let registry = Arc::new(AgentRegistry::new());
        register_builtin(&registry, &services)?;
        Ok(Self::from_parts(services, registry))
    }

    /// Uses a registry prepared by the caller
    pub fn from_parts(services: AgentServices, registry: Arc<AgentRegistry>) -> Self {
        let bus = Arc::clone(&services.bus);
        install_default_handlers(&bus);

        let monitor = Arc::new(Monitor::with_event_bus(
            services.config.monitoring.clone(),
            Arc::clone(&bus),
        ));
        monitor.attach(&bus);

        let metrics = Metrics::new();
        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            services.config.orchestrator.clone(),
        )
        .with_metrics(metrics.clone());

        Self {
            services,
            registry,
            monitor,
            orchestrator: Arc::new(orchestrator),
            metrics,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.services.bus
    }

    pub fn memory(&self) -> &Arc<AgentMemory> {
        &self.services.memory
    }

    pub fn learner(&self) -> &Arc<AdaptiveLearner> {
        &self.services.learner
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Accepts a job and starts it in the background
    ///
    /// Rejects an empty user id or a payload that is not a JSON object before
    /// anything is queued.
    pub async fn submit_job(&self, request: JobRequest) -> Result<String> {
        self.enqueue(request, None).await
    }

    async fn enqueue(&self, request: JobRequest, regenerated_from: Option<String>) -> Result<String> {
        let user_id = request.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(AgentError::Validation("user_id must not be empty".to_string()));
        }
        if !request.input.is_object() {
            return Err(AgentError::Validation("input must be a JSON object".to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let summary = JobSummary {
            job_id: job_id.clone(),
            user_id: user_id.clone(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            final_score: None,
            error: None,
            regenerated_from,
        };
        self.jobs.lock().await.insert(
            job_id.clone(),
            JobSlot {
                summary,
                input: request.input.clone(),
                result: None,
                cancel: cancel.clone(),
            },
        );
        self.metrics.increment(metrics::JOBS_IN_FLIGHT).await;
        info!("Queued job {} for user {}", job_id, user_id);

        let manager = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            manager.run_job(&id, &user_id, request.input, cancel).await;
            manager.metrics.decrement(metrics::JOBS_IN_FLIGHT).await;
        });
        Ok(job_id)
    }

    async fn run_job(&self, job_id: &str, user_id: &str, input: Value, cancel: CancellationToken) {
        {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(job_id) {
                Some(slot) if slot.summary.status == JobStatus::Queued => {
                    slot.summary.status = JobStatus::Processing;
                    slot.summary.started_at = Some(Utc::now());
                }
                _ => return,
            }
        }

        let result = self
            .orchestrator
            .execute_with_cancel(job_id, user_id, input, cancel)
            .await;

        {
            let mut jobs = self.jobs.lock().await;
            if let Some(slot) = jobs.get_mut(job_id) {
                slot.summary.status = result.status.into();
                slot.summary.completed_at = Some(result.completed_at);
                slot.summary.final_score = result.final_score;
                slot.summary.error = result.error.clone();
                slot.result = Some(result);
            }
        }

        let alerts = self.monitor.detect_anomalies();
        if !alerts.is_empty() {
            warn!("Job {} surfaced {} new alerts", job_id, alerts.len());
        }
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<JobSummary> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id)
            .map(|slot| slot.summary.clone())
            .ok_or_else(|| AgentError::NotFound(format!("job {}", job_id)))
    }

    /// Pipeline result, `None` while the job has not finished running
    pub async fn get_job_result(&self, job_id: &str) -> Result<Option<PipelineResult>> {
        let jobs = self.jobs.lock().await;
        jobs.get(job_id)
            .map(|slot| slot.result.clone())
            .ok_or_else(|| AgentError::NotFound(format!("job {}", job_id)))
    }

    /// Waits until the job reaches a terminal status
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<PipelineResult> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let jobs = self.jobs.lock().await;
                let slot = jobs
                    .get(job_id)
                    .ok_or_else(|| AgentError::NotFound(format!("job {}", job_id)))?;
                if let Some(result) = &slot.result {
                    return Ok(result.clone());
                }
                if slot.summary.status == JobStatus::Cancelled {
                    return Err(AgentError::Cancelled(format!("job {} cancelled before it started", job_id)));
                }
            }
            if Instant::now() >= deadline {
                return Err(AgentError::Timeout {
                    agent: SOURCE.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn list_jobs(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.lock().await;
        let mut summaries: Vec<JobSummary> = jobs.values().map(|slot| slot.summary.clone()).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Runs a finished or running job again with the same input
    pub async fn trigger_regenerate(&self, job_id: &str) -> Result<String> {
        let (user_id, input) = {
            let jobs = self.jobs.lock().await;
            let slot = jobs
                .get(job_id)
                .ok_or_else(|| AgentError::NotFound(format!("job {}", job_id)))?;
            (slot.summary.user_id.clone(), slot.input.clone())
        };
        info!("Regenerating job {}", job_id);
        self.enqueue(JobRequest { user_id, input }, Some(job_id.to_string()))
            .await
    }

    /// Stops a job; finished jobs keep their status
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatus> {
        let mut jobs = self.jobs.lock().await;
        let slot = jobs
            .get_mut(job_id)
            .ok_or_else(|| AgentError::NotFound(format!("job {}", job_id)))?;
        match slot.summary.status {
            JobStatus::Queued => {
                slot.summary.status = JobStatus::Cancelled;
                slot.summary.completed_at = Some(Utc::now());
                slot.cancel.cancel();
            }
            JobStatus::Processing => slot.cancel.cancel(),
            _ => {}
        }
        Ok(slot.summary.status)
    }

    pub fn list_registered_agents(&self) -> Vec<AgentInfo> {
        self.registry.list_info()
    }

    pub fn get_agent_health(&self, agent_id: &str) -> Result<AgentHealthView> {
        let info = self
            .registry
            .agent_info(agent_id)
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.to_string()))?;
        Ok(AgentHealthView {
            info,
            monitoring: self.monitor.agent_health(agent_id),
            accuracy: self.services.memory.agent_accuracy(agent_id),
        })
    }

    pub fn get_monitoring_dashboard(&self) -> Dashboard {
        self.monitor.dashboard_metrics()
    }

    pub fn list_alerts(&self, severity: Option<Severity>) -> Vec<Alert> {
        self.monitor.alerts(severity)
    }

    /// Acknowledges alerts, for one agent or all; returns how many were cleared
    pub fn clear_alerts(&self, agent_id: Option<&str>) -> usize {
        self.monitor.clear_alerts(agent_id)
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        self.services.memory.stats()
    }

    pub fn find_similar_cases(&self, context: &Value, agent_id: Option<&str>, limit: usize) -> Vec<SimilarCase> {
        self.services
            .memory
            .retrieve_similar_cases(context, agent_id, limit)
    }

    /// Runs a learning pass over reviews from the last `window_days` days (all reviews when `None`)
    pub fn list_weight_updates(&self, window_days: Option<i64>) -> Vec<WeightUpdate> {
        self.services
            .learner
            .learn_from_human_reviews(window_days.map(chrono::Duration::days))
    }

    /// Applies the pending proposals of the last learning pass
    pub fn apply_weight_updates(&self, min_confidence: Option<f64>) -> Weights {
        let updates = self.services.learner.pending_updates();
        self.services
            .learner
            .apply_weight_updates(&updates, min_confidence)
    }

    pub fn weight_history(&self, limit: usize) -> Vec<WeightChange> {
        self.services.learner.weight_history(limit)
    }

    pub fn learning_summary(&self) -> LearningSummary {
        self.services.learner.learning_summary()
    }

    pub fn personalize_for_user(&self, user_id: &str) -> Personalization {
        self.services.learner.personalize_for_user(user_id)
    }

    async fn finished_result(&self, job_id: &str) -> Result<PipelineResult> {
        self.get_job_result(job_id)
            .await?
            .ok_or_else(|| AgentError::Validation(format!("job {} has not finished", job_id)))
    }

    /// Explains the score of a finished job
    pub async fn get_explanation_for_job(&self, job_id: &str) -> Result<Explanation> {
        let result = self.finished_result(job_id).await?;
        explanation_for(&result)
    }

    /// Records a reviewer's verdict on the job's score and publishes `feedback_received`
    pub async fn record_review(&self, job_id: &str, outcome: Outcome, feedback: Option<Value>) -> Result<()> {
        let result = self.finished_result(job_id).await?;
        let entry_id = result
            .payload(ids::SCORE_AGGREGATOR)
            .and_then(|p| p.get("memory_entry_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::NotFound(format!("scored decision for job {}", job_id)))?;

        self.services
            .memory
            .record_outcome(entry_id, outcome, feedback.clone())?;
        self.services.bus.emit(
            EventType::FeedbackReceived,
            SOURCE,
            Some(job_id),
            json!({
                "entry_id": entry_id,
                "outcome": outcome,
                "feedback": feedback,
                "user_id": result.user_id,
            }),
        );
        info!("Recorded {} review for job {}", outcome, job_id);
        Ok(())
    }

    pub async fn health(&self) -> ServiceHealth {
        let report = self.registry.health_report();
        let alerts = self.monitor.alerts(None);
        let critical_alerts = alerts.iter().filter(|a| a.severity == Severity::Critical).count();
        let (jobs_total, jobs_active) = {
            let jobs = self.jobs.lock().await;
            let active = jobs.values().filter(|s| !s.summary.status.is_terminal()).count();
            (jobs.len(), active)
        };
        let status = if report.plannable && critical_alerts == 0 {
            "healthy"
        } else {
            "degraded"
        };
        ServiceHealth {
            status: status.to_string(),
            agents: report.agent_count,
            plannable: report.plannable,
            jobs_total,
            jobs_active,
            active_alerts: alerts.len(),
            critical_alerts,
            memory_entries: self.services.memory.stats().total_entries,
        }
    }
}

/// Builds the explanation from a pipeline result's agent payloads
pub fn explanation_for(result: &PipelineResult) -> Result<Explanation> {
    let score: ScoreBreakdown = result
        .payload(ids::SCORE_AGGREGATOR)
        .and_then(|p| p.get("score_result"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| AgentError::NotFound(format!("score for job {}", result.job_id)))?;

    let benchmark: Option<BenchmarkResult> = result
        .payload(ids::BENCHMARK_AGENT)
        .and_then(|p| p.get("benchmark"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()?;
    let judge_confidence = result
        .payload(ids::LLM_JUDGE)
        .and_then(|p| p.get("evaluation"))
        .cloned()
        .and_then(|v| serde_json::from_value::<Evaluation>(v).ok())
        .map(|e| e.confidence);

    Ok(explainer::explain(&score, benchmark.as_ref(), judge_confidence))
}
