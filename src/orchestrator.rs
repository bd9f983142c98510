//! Dependency-ordered execution of the registered agents
//!
//! A run plans once against the registry, then dispatches every agent whose
//! dependencies reached a terminal status, up to `max_parallel` at a time.
//! Each invocation is bounded by the per-agent timeout and wrapped in the
//! retry policy; the whole run is bounded by the pipeline timeout and by the
//! caller's [`CancellationToken`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::{Agent, AgentContext, AgentOutput};
use crate::config::OrchestratorConfig;
use crate::error::{AgentError, Result};
use crate::events::{EventBus, EventType};
use crate::metrics::{self, Metrics};
use crate::registry::AgentRegistry;
use crate::utils::retry::{with_retry_notify, RetryPolicy};

/// Version of the [`PipelineResult`] layout; later revisions only add optional fields
pub const SCHEMA_VERSION: u32 = 1;

const SOURCE: &str = "orchestrator";

/// Reasons recorded on skipped agents
pub mod skip_reasons {
    pub const DISABLED: &str = "disabled";
    pub const DEPENDENCY_FAILED: &str = "dependency_failed";
    pub const CANCELLED: &str = "cancelled";
    pub const NO_HANDLER: &str = "no_handler";
}

/// Terminal status of one agent in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Succeeded,
    Failed,
    Skipped,
    FallbackUsed,
}

impl AgentStatus {
    /// Whether the agent left an output in the context
    pub fn produced_output(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FallbackUsed)
    }
}

/// What happened to one agent in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub status: AgentStatus,
    /// Agent output, or the fallback output; null when nothing was produced
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub duration_ms: u64,
    /// Invocations made, zero for skipped agents
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl AgentResult {
    fn skipped(agent_id: &str, reason: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Skipped,
            payload: Value::Null,
            confidence: None,
            duration_ms: 0,
            attempts: 0,
            error: None,
            skip_reason: Some(reason.to_string()),
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Aggregate of every agent result for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub schema_version: u32,
    pub job_id: String,
    pub user_id: String,
    pub status: PipelineStatus,
    /// One entry per planned agent, in plan order
    pub results: Vec<AgentResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub fallbacks: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    fn assemble(
        job_id: &str,
        user_id: &str,
        status: PipelineStatus,
        results: Vec<AgentResult>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        error: Option<String>,
    ) -> Self {
        let count = |status: AgentStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            schema_version: SCHEMA_VERSION,
            job_id: job_id.to_string(),
            user_id: user_id.to_string(),
            status,
            succeeded: count(AgentStatus::Succeeded),
            failed: count(AgentStatus::Failed),
            skipped: count(AgentStatus::Skipped),
            fallbacks: count(AgentStatus::FallbackUsed),
            final_score: final_score(&results),
            results,
            duration_ms: elapsed.as_millis() as u64,
            error,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Result of one agent
    pub fn result(&self, agent_id: &str) -> Option<&AgentResult> {
        self.results.iter().find(|r| r.agent_id == agent_id)
    }

    /// Payload of an agent that produced an output
    pub fn payload(&self, agent_id: &str) -> Option<&Value> {
        self.result(agent_id)
            .filter(|r| r.status.produced_output())
            .map(|r| &r.payload)
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }
}

/// `final_score` of the last producing agent that reports one, else its `overall_score`
fn final_score(results: &[AgentResult]) -> Option<f64> {
    let last = |key: &str| {
        results
            .iter()
            .rev()
            .filter(|r| r.status.produced_output())
            .find_map(|r| r.payload.get(key).and_then(Value::as_f64))
    };
    last("final_score").or_else(|| last("overall_score"))
}

struct Finished {
    result: AgentResult,
    output: Option<AgentOutput>,
}

/// Mutable state of one run; never shared outside it
struct RunState {
    ctx: AgentContext,
    results: HashMap<String, AgentResult>,
    pending: Vec<String>,
    in_flight: Vec<String>,
    running: FuturesUnordered<BoxFuture<'static, Finished>>,
}

impl RunState {
    fn skip(&mut self, bus: &EventBus, agent_id: &str, reason: &str, data: Value) {
        debug!("Skipping {} ({})", agent_id, reason);
        bus.emit(EventType::AgentSkipped, agent_id, Some(&self.ctx.job_id), data);
        self.results
            .insert(agent_id.to_string(), AgentResult::skipped(agent_id, reason));
    }
}

/// Runs pipelines over a shared registry
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    metrics: Metrics,
    config: OrchestratorConfig,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(registry: Arc<AgentRegistry>, bus: Arc<EventBus>, config: OrchestratorConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            registry,
            bus,
            metrics: Metrics::new(),
            config,
        }
    }

    /// Shares an existing metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Execution plan the next run would follow
    pub fn plan(&self) -> Result<Vec<String>> {
        self.registry.execution_order()
    }

    /// Runs every registered agent for a job
    pub async fn execute_pipeline(&self, job_id: &str, user_id: &str, input: Value) -> PipelineResult {
        self.execute_with_cancel(job_id, user_id, input, CancellationToken::new())
            .await
    }

    /// Same as [`Orchestrator::execute_pipeline`], stopping early when `cancel` fires
    #[instrument(skip(self, input, cancel), fields(job_id = %job_id, user_id = %user_id))]
    pub async fn execute_with_cancel(
        &self,
        job_id: &str,
        user_id: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> PipelineResult {
        let started_at = Utc::now();
        let start = Instant::now();
        self.bus
            .emit(EventType::PipelineStarted, SOURCE, Some(job_id), json!({ "user_id": user_id }));
        self.metrics.increment(metrics::PIPELINES_STARTED).await;

        let order = match self.registry.execution_order() {
            Ok(order) => order,
            Err(e) => {
                let e = AgentError::Planning(e.to_string());
                error!("Job {}: {}", job_id, e);
                let result = PipelineResult::assemble(
                    job_id,
                    user_id,
                    PipelineStatus::Failed,
                    Vec::new(),
                    started_at,
                    start.elapsed(),
                    Some(e.to_string()),
                );
                self.finish(&result, start.elapsed()).await;
                return result;
            }
        };
        info!("Executing {} agents for job {}", order.len(), job_id);

        let mut state = RunState {
            ctx: AgentContext::new(job_id, user_id, input),
            results: HashMap::with_capacity(order.len()),
            pending: order.clone(),
            in_flight: Vec::new(),
            running: FuturesUnordered::new(),
        };
        let deadline = tokio::time::sleep(self.config.pipeline_timeout());
        tokio::pin!(deadline);

        let mut cancelled: Option<&str> = None;
        loop {
            if cancel.is_cancelled() {
                cancelled = Some("cancelled by caller");
                break;
            }
            self.schedule(&mut state);
            if state.running.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = Some("cancelled by caller");
                    break;
                }
                _ = &mut deadline => {
                    cancelled = Some("pipeline timeout");
                    break;
                }
                Some(finished) = state.running.next() => {
                    let id = finished.result.agent_id.clone();
                    state.in_flight.retain(|running| running != &id);
                    if let Some(output) = finished.output {
                        state.ctx.record(&id, output);
                    }
                    state.results.insert(id, finished.result);
                }
            }
        }

        // Dropping the futures abandons whatever is still in flight
        state.running = FuturesUnordered::new();
        let leftover: Vec<String> = state.in_flight.drain(..).chain(state.pending.drain(..)).collect();
        if let Some(reason) = cancelled {
            warn!("Job {} stopped ({}), {} agents not finished", job_id, reason, leftover.len());
        }
        for id in leftover {
            let reason = if cancelled.is_some() {
                skip_reasons::CANCELLED
            } else {
                skip_reasons::DEPENDENCY_FAILED
            };
            state.skip(&self.bus, &id, reason, json!({ "reason": reason }));
        }

        let results: Vec<AgentResult> = order.iter().filter_map(|id| state.results.remove(id)).collect();
        let failed_required: Vec<&str> = results
            .iter()
            .filter(|r| r.status == AgentStatus::Failed)
            .filter(|r| self.registry.get(&r.agent_id).map_or(true, |d| d.required))
            .map(|r| r.agent_id.as_str())
            .collect();
        let (status, error) = match cancelled {
            Some(reason) => (PipelineStatus::Cancelled, Some(reason.to_string())),
            None if !failed_required.is_empty() => (
                PipelineStatus::Failed,
                Some(format!("required agents failed: {}", failed_required.join(", "))),
            ),
            None => (PipelineStatus::Completed, None),
        };

        let elapsed = start.elapsed();
        let result = PipelineResult::assemble(job_id, user_id, status, results, started_at, elapsed, error);
        self.finish(&result, elapsed).await;
        result
    }

    /// Dispatches every pending agent whose dependencies are terminal
    ///
    /// The pending list stays in plan order, so an agent resolved here can only
    /// unblock agents further down the list.
    fn schedule(&self, state: &mut RunState) {
        let max_parallel = self.config.max_parallel.max(1);
        let mut i = 0;
        while i < state.pending.len() {
            let id = state.pending[i].clone();
            let Some(descriptor) = self.registry.get(&id) else {
                state.pending.remove(i);
                state.skip(&self.bus, &id, skip_reasons::NO_HANDLER, json!({ "reason": skip_reasons::NO_HANDLER }));
                continue;
            };
            if !descriptor.dependencies.iter().all(|d| state.results.contains_key(d)) {
                i += 1;
                continue;
            }

            if !self.registry.is_enabled(&id) {
                state.pending.remove(i);
                state.skip(&self.bus, &id, skip_reasons::DISABLED, json!({ "reason": skip_reasons::DISABLED }));
                continue;
            }
            let Some(agent) = self.registry.handler(&id) else {
                state.pending.remove(i);
                state.skip(&self.bus, &id, skip_reasons::NO_HANDLER, json!({ "reason": skip_reasons::NO_HANDLER }));
                continue;
            };

            let failed_dependency = descriptor
                .dependencies
                .iter()
                .find(|d| state.results.get(*d).map_or(true, |r| !r.status.produced_output()))
                .cloned();
            if let Some(dependency) = failed_dependency {
                if agent.fallback(&state.ctx).is_none() {
                    state.pending.remove(i);
                    state.skip(
                        &self.bus,
                        &id,
                        skip_reasons::DEPENDENCY_FAILED,
                        json!({ "reason": skip_reasons::DEPENDENCY_FAILED, "dependency": dependency }),
                    );
                    continue;
                }
                debug!("{} runs without {} since it declares a fallback", id, dependency);
            }

            if state.running.len() >= max_parallel {
                i += 1;
                continue;
            }
            state.pending.remove(i);
            state.in_flight.push(id);
            state.running.push(self.invoke(agent, state.ctx.clone()).boxed());
        }
    }

    /// One agent run: retries, per-attempt timeout, fallback and events
    fn invoke(&self, agent: Arc<dyn Agent>, ctx: AgentContext) -> impl Future<Output = Finished> + Send + 'static {
        let bus = Arc::clone(&self.bus);
        let registry = Arc::clone(&self.registry);
        let counters = self.metrics.clone();
        let policy = self.policy;
        let agent_timeout = self.config.agent_timeout();

        async move {
            let id = agent.descriptor().id.clone();
            let job_id = ctx.job_id.clone();
            bus.emit(EventType::AgentStarted, &id, Some(&job_id), json!({}));
            let start = Instant::now();

            let (agent_ref, ctx_ref, id_ref) = (&agent, &ctx, id.as_str());
            let timeout_ms = agent_timeout.as_millis() as u64;
            let (outcome, attempts) = with_retry_notify(
                &policy,
                move |attempt| async move {
                    debug!("{} attempt {}", id_ref, attempt);
                    match timeout(agent_timeout, agent_ref.execute(ctx_ref)).await {
                        Ok(result) => result,
                        Err(_) => Err(AgentError::Timeout {
                            agent: id_ref.to_string(),
                            timeout_ms,
                        }),
                    }
                },
                AgentError::is_transient,
                |attempt, e, delay| {
                    warn!("{} attempt {} failed: {}; retrying in {:?}", id_ref, attempt, e, delay);
                    bus.emit(
                        EventType::AgentRetrying,
                        id_ref,
                        Some(&job_id),
                        json!({
                            "attempt": attempt,
                            "error": e.to_string(),
                            "delay_ms": delay.as_millis() as u64,
                        }),
                    );
                },
            )
            .await;

            let elapsed = start.elapsed();
            let duration_ms = elapsed.as_millis() as u64;
            counters.add(metrics::AGENT_ATTEMPTS, u64::from(attempts)).await;
            if attempts > 1 {
                counters.add(metrics::AGENT_RETRIES, u64::from(attempts - 1)).await;
            }

            let (result, output) = match outcome {
                Ok(output) => {
                    bus.emit(
                        EventType::AgentCompleted,
                        &id,
                        Some(&job_id),
                        json!({
                            "duration_ms": duration_ms,
                            "confidence": output.confidence,
                            "attempts": attempts,
                        }),
                    );
                    let result = AgentResult {
                        agent_id: id.clone(),
                        status: AgentStatus::Succeeded,
                        payload: output.payload.clone(),
                        confidence: output.confidence,
                        duration_ms,
                        attempts,
                        error: None,
                        skip_reason: None,
                    };
                    (result, Some(output))
                }
                Err(e) => {
                    let message = e.to_string();
                    let fallback = agent.fallback(&ctx);
                    bus.emit(
                        EventType::AgentFailed,
                        &id,
                        Some(&job_id),
                        json!({
                            "duration_ms": duration_ms,
                            "attempts": attempts,
                            "error": message,
                            "fallback_used": fallback.is_some(),
                        }),
                    );
                    match fallback {
                        Some(output) => {
                            warn!("{} failed after {} attempts, using fallback: {}", id, attempts, message);
                            counters.increment(metrics::FALLBACKS_USED).await;
                            let result = AgentResult {
                                agent_id: id.clone(),
                                status: AgentStatus::FallbackUsed,
                                payload: output.payload.clone(),
                                confidence: output.confidence,
                                duration_ms,
                                attempts,
                                error: Some(message),
                                skip_reason: None,
                            };
                            (result, Some(output))
                        }
                        None => {
                            let exhausted = AgentError::FallbackExhausted(message);
                            error!("{} failed after {} attempts: {}", id, attempts, exhausted);
                            let result = AgentResult {
                                agent_id: id.clone(),
                                status: AgentStatus::Failed,
                                payload: Value::Null,
                                confidence: None,
                                duration_ms,
                                attempts,
                                error: Some(exhausted.to_string()),
                                skip_reason: None,
                            };
                            (result, None)
                        }
                    }
                }
            };

            registry.record_execution(&id, result.status == AgentStatus::Succeeded, elapsed);
            Finished { result, output }
        }
    }

    /// Publishes the terminal event and feeds the run counters
    async fn finish(&self, result: &PipelineResult, elapsed: Duration) {
        let (event_type, counter) = match result.status {
            PipelineStatus::Completed => (EventType::PipelineCompleted, metrics::PIPELINES_COMPLETED),
            PipelineStatus::Failed => (EventType::PipelineFailed, metrics::PIPELINES_FAILED),
            PipelineStatus::Cancelled => (EventType::PipelineCancelled, metrics::PIPELINES_CANCELLED),
        };
        self.metrics.increment(counter).await;
        self.metrics.record_time(metrics::PIPELINE_DURATION, elapsed).await;

        info!(
            "Job {} {:?}: {} succeeded, {} failed, {} skipped, {} fallbacks in {}ms",
            result.job_id,
            result.status,
            result.succeeded,
            result.failed,
            result.skipped,
            result.fallbacks,
            result.duration_ms
        );
        self.bus.emit(
            event_type,
            SOURCE,
            Some(&result.job_id),
            json!({
                "status": result.status,
                "succeeded": result.succeeded,
                "failed": result.failed,
                "skipped": result.skipped,
                "fallbacks": result.fallbacks,
                "duration_ms": result.duration_ms,
                "final_score": result.final_score,
                "error": result.error,
            }),
        );
    }
}
