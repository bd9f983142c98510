//! Agents: the units of work the orchestrator schedules
//!
//! Every agent carries an immutable [`AgentDescriptor`] and implements
//! [`Agent::execute`] over a read-only [`AgentContext`] holding the outputs of
//! the agents that already finished in the same run. Agents that can degrade
//! gracefully also provide a [`Agent::fallback`] output.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::judge::{HttpCompletionClient, Judge, LlmJudge, RuleBasedJudge};
use crate::learning::AdaptiveLearner;
use crate::memory::AgentMemory;
use crate::registry::{AgentDescriptor, AgentRegistry};

/// Module for data-collecting agents
pub mod collectors;
/// Module for evaluating agents
pub mod evaluators;
/// Module for component scorers and the aggregator
pub mod scorers;

/// Ids of the built-in agents
pub mod ids {
    pub const CV_PARSER: &str = "cv_parser";
    pub const FORM_PROCESSOR: &str = "form_processor";
    pub const GITHUB_COLLECTOR: &str = "github_collector";
    pub const PORTFOLIO_COLLECTOR: &str = "portfolio_collector";
    pub const SKILL_SCORER: &str = "skill_scorer";
    pub const GITHUB_SCORER: &str = "github_scorer";
    pub const PORTFOLIO_SCORER: &str = "portfolio_scorer";
    pub const EXPERIENCE_SCORER: &str = "experience_scorer";
    pub const SCORE_AGGREGATOR: &str = "score_aggregator";
    pub const BENCHMARK_AGENT: &str = "benchmark_agent";
    pub const LLM_JUDGE: &str = "llm_judge";
    pub const IMPROVEMENT_GENERATOR: &str = "improvement_generator";
    pub const CONSENSUS_BUILDER: &str = "consensus_builder";
}

/// What one agent produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Agent-specific structured data
    pub payload: Value,
    /// Confidence in [0, 1], when the agent reports one
    pub confidence: Option<f64>,
}

impl AgentOutput {
    /// Output with a confidence
    pub fn new(payload: Value, confidence: f64) -> Self {
        Self {
            payload,
            confidence: Some(confidence.clamp(0.0, 1.0)),
        }
    }

    /// Output without a confidence
    pub fn without_confidence(payload: Value) -> Self {
        Self { payload, confidence: None }
    }
}

/// Per-job view handed to each agent
///
/// Only the orchestrator run that owns a context mutates it; agents receive a
/// snapshot with the outputs of every agent that has finished so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Job being processed
    pub job_id: String,
    /// Profile owner
    pub user_id: String,
    /// Raw input payload
    pub input: Value,
    /// Outputs of agents that succeeded or used their fallback
    pub outputs: BTreeMap<String, AgentOutput>,
}

impl AgentContext {
    /// Empty context for a job
    pub fn new(job_id: impl Into<String>, user_id: impl Into<String>, input: Value) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            input,
            outputs: BTreeMap::new(),
        }
    }

    /// Non-null input field
    pub fn input_field(&self, key: &str) -> Option<&Value> {
        self.input.get(key).filter(|v| !v.is_null())
    }

    /// Output of a finished agent
    pub fn output(&self, agent_id: &str) -> Option<&AgentOutput> {
        self.outputs.get(agent_id)
    }

    /// Payload of a finished agent
    pub fn payload(&self, agent_id: &str) -> Option<&Value> {
        self.outputs.get(agent_id).map(|o| &o.payload)
    }

    /// Confidence of a finished agent, `default` when absent
    pub fn confidence_of(&self, agent_id: &str, default: f64) -> f64 {
        self.outputs
            .get(agent_id)
            .and_then(|o| o.confidence)
            .unwrap_or(default)
    }

    /// Stores an agent's output
    pub fn record(&mut self, agent_id: &str, output: AgentOutput) {
        self.outputs.insert(agent_id.to_string(), output);
    }
}

/// One independently executable analysis unit
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identity, capabilities and dependencies
    fn descriptor(&self) -> &AgentDescriptor;

    /// Runs the agent once
    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput>;

    /// Output used when every attempt failed, or when a dependency did not
    /// finish; `None` means the agent declares no fallback
    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        None
    }
}

/// Shared state the built-in agents work with
#[derive(Clone)]
pub struct AgentServices {
    /// Effective configuration
    pub config: Config,
    /// Case store the aggregator writes to
    pub memory: Arc<AgentMemory>,
    /// Bus for score events
    pub bus: Arc<EventBus>,
    /// Source of the current scoring weights
    pub learner: Arc<AdaptiveLearner>,
    /// Judge used by the confidence loop
    pub judge: Arc<dyn Judge>,
}

impl AgentServices {
    /// Bundles the services; the judge is LLM-backed when an `llm` block is
    /// configured, rule-based otherwise
    pub fn new(config: Config, memory: Arc<AgentMemory>, bus: Arc<EventBus>, learner: Arc<AdaptiveLearner>) -> Self {
        let judge: Arc<dyn Judge> = match &config.judge.llm {
            Some(llm) => match HttpCompletionClient::new(llm) {
                Ok(client) => {
                    info!("Using language-model judge at {}", llm.endpoint);
                    Arc::new(LlmJudge::new(client))
                }
                Err(e) => {
                    warn!("Language-model judge unavailable ({}), using rule-based judge", e);
                    Arc::new(RuleBasedJudge)
                }
            },
            None => Arc::new(RuleBasedJudge),
        };
        Self {
            config,
            memory,
            bus,
            learner,
            judge,
        }
    }

    /// Replaces the judge
    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = judge;
        self
    }
}

/// The thirteen built-in agents in registration order
pub fn builtin_agents(services: &AgentServices) -> Vec<Arc<dyn Agent>> {
    vec![
        Arc::new(collectors::CvParser::new()),
        Arc::new(collectors::FormProcessor::new()),
        Arc::new(collectors::GithubCollector::new()),
        Arc::new(collectors::PortfolioCollector::new()),
        Arc::new(scorers::SkillScorer::new()),
        Arc::new(scorers::GithubScorer::new()),
        Arc::new(scorers::PortfolioScorer::new()),
        Arc::new(scorers::ExperienceScorer::new()),
        Arc::new(scorers::ScoreAggregator::new(
            Arc::clone(&services.memory),
            Arc::clone(&services.bus),
            Arc::clone(&services.learner),
        )),
        Arc::new(evaluators::BenchmarkAgent::new()),
        Arc::new(evaluators::LlmJudgeAgent::new(Arc::clone(&services.judge), &services.config.judge)),
        Arc::new(evaluators::ImprovementGenerator::new()),
        Arc::new(evaluators::ConsensusBuilder::new(
            Arc::clone(&services.memory),
            services.config.consensus.clone(),
        )),
    ]
}

/// Registers every built-in agent
pub fn register_builtin(registry: &AgentRegistry, services: &AgentServices) -> Result<()> {
    for agent in builtin_agents(services) {
        registry.register_agent(agent)?;
    }
    info!("Registered {} built-in agents", registry.len());
    Ok(())
}

/// Number field of a JSON value
pub(crate) fn num(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{LearningConfig, MemoryConfig};

    pub fn services() -> AgentServices {
        let memory = Arc::new(AgentMemory::new(MemoryConfig::default()));
        let bus = Arc::new(EventBus::new(100));
        let learner = Arc::new(AdaptiveLearner::new(LearningConfig::default(), Arc::clone(&memory)));
        AgentServices::new(Config::default(), memory, bus, learner)
    }

    pub fn context(input: Value) -> AgentContext {
        AgentContext::new("job-1", "user-1", input)
    }
}
