//! Agents that judge, compare and combine the aggregated score

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{ids, num, Agent, AgentContext, AgentOutput};
use crate::config::{ConsensusConfig, JudgeConfig};
use crate::consensus::{ConsensusEngine, Opinion};
use crate::error::{AgentError, Result};
use crate::judge::{ConfidenceLoop, Evaluation, EvaluationInput, Judge, RuleBasedJudge};
use crate::memory::AgentMemory;
use crate::registry::{AgentDescriptor, AgentKind};
use crate::scoring::{self, BenchmarkResult, Cohort, ScoreBreakdown};

fn score_result(ctx: &AgentContext) -> Option<ScoreBreakdown> {
    let value = ctx.payload(ids::SCORE_AGGREGATOR)?.get("score_result")?;
    serde_json::from_value(value.clone()).ok()
}

fn aggregated_skills(ctx: &AgentContext) -> Vec<String> {
    ctx.payload(ids::SCORE_AGGREGATOR)
        .and_then(|p| p.get("skills"))
        .map(scoring::extract_skills)
        .unwrap_or_default()
}

fn benchmark_result(ctx: &AgentContext) -> Option<BenchmarkResult> {
    let value = ctx.payload(ids::BENCHMARK_AGENT)?.get("benchmark")?;
    serde_json::from_value(value.clone()).ok()
}

/// Judge input assembled from the aggregator and benchmark outputs
pub fn evaluation_input(ctx: &AgentContext) -> Option<EvaluationInput> {
    let score = score_result(ctx)?;
    let benchmark = benchmark_result(ctx);
    Some(EvaluationInput {
        overall_score: score.overall_score,
        tier: score.tier,
        components: score.raw_scores(),
        levels: score
            .breakdown
            .iter()
            .map(|(k, c)| (k.clone(), c.level.clone()))
            .collect(),
        percentile: benchmark.as_ref().map_or(50, |b| b.user_percentile),
        avg_rate: benchmark.as_ref().map_or(Cohort::default().avg_rate, |b| b.avg_rate),
        skills: aggregated_skills(ctx),
        experience_years: ctx
            .payload(ids::SCORE_AGGREGATOR)
            .and_then(|p| num(p, "experience_years"))
            .unwrap_or(0.0),
    })
}

/// Places the overall score in the reference cohort
pub struct BenchmarkAgent {
    descriptor: AgentDescriptor,
    cohort: Cohort,
}

impl BenchmarkAgent {
    pub fn new() -> Self {
        Self::with_cohort(Cohort::default())
    }

    pub fn with_cohort(cohort: Cohort) -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::BENCHMARK_AGENT, AgentKind::Evaluator)
                .with_capabilities(["benchmarking", "comparison"])
                .with_dependencies([ids::SCORE_AGGREGATOR])
                .with_description("Compares the score against the benchmark cohort")
                .optional(),
            cohort,
        }
    }
}

impl Default for BenchmarkAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for BenchmarkAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let skills = aggregated_skills(ctx);
        let (overall, confidence) = match ctx.payload(ids::SCORE_AGGREGATOR).and_then(|p| num(p, "overall_score")) {
            Some(score) => (score, 0.85),
            None => (0.5, 0.5),
        };
        let benchmark = scoring::benchmark(overall, &skills, &self.cohort);
        Ok(AgentOutput::new(json!({ "benchmark": benchmark }), confidence))
    }
}

/// Runs the confidence loop over the configured judge
pub struct LlmJudgeAgent {
    descriptor: AgentDescriptor,
    judge: Arc<dyn Judge>,
    confidence_loop: ConfidenceLoop,
    threshold: f64,
}

impl LlmJudgeAgent {
    pub fn new(judge: Arc<dyn Judge>, config: &JudgeConfig) -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::LLM_JUDGE, AgentKind::Evaluator)
                .with_capabilities(["evaluation", "llm", "judgment"])
                .with_dependencies([ids::SCORE_AGGREGATOR, ids::BENCHMARK_AGENT])
                .with_description("Judge evaluation refined by the confidence loop")
                .optional(),
            judge,
            confidence_loop: ConfidenceLoop::new(config),
            threshold: config.confidence_threshold,
        }
    }

    fn output(evaluation: &Evaluation, iterations_used: u32, threshold_met: bool, judge: &str, trace: Value) -> AgentOutput {
        AgentOutput::new(
            json!({
                "evaluation": evaluation,
                "iterations_used": iterations_used,
                "threshold_met": threshold_met,
                "judge": judge,
                "trace": trace,
            }),
            evaluation.confidence,
        )
    }
}

#[async_trait]
impl Agent for LlmJudgeAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let input = evaluation_input(ctx)
            .ok_or_else(|| AgentError::Validation("no aggregated score to judge".to_string()))?;
        let outcome = self.confidence_loop.run(self.judge.as_ref(), &input).await?;
        Ok(Self::output(
            &outcome.evaluation,
            outcome.iterations_used,
            outcome.threshold_met,
            self.judge.name(),
            json!(outcome.trace),
        ))
    }

    fn fallback(&self, ctx: &AgentContext) -> Option<AgentOutput> {
        let evaluation = RuleBasedJudge::assess(&evaluation_input(ctx)?);
        let met = evaluation.confidence >= self.threshold;
        Some(Self::output(&evaluation, 1, met, "rule_based", json!([])))
    }
}

/// Prioritised improvement suggestions
pub struct ImprovementGenerator {
    descriptor: AgentDescriptor,
}

impl ImprovementGenerator {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::IMPROVEMENT_GENERATOR, AgentKind::Evaluator)
                .with_capabilities(["recommendations", "improvements"])
                .with_dependencies([ids::SCORE_AGGREGATOR])
                .with_description("Generates improvement recommendations")
                .optional(),
        }
    }
}

impl Default for ImprovementGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ImprovementGenerator {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        match score_result(ctx) {
            Some(score) => {
                let improvements = scoring::generate_improvements(&score.raw_scores());
                Ok(AgentOutput::new(json!({ "improvements": improvements }), 0.85))
            }
            None => Ok(AgentOutput::new(json!({ "improvements": [] }), 0.5)),
        }
    }
}

/// Reconciles the rubric score with the judge's opinion
///
/// Each source is weighted by its reviewed accuracy in memory; sources nobody
/// reviewed yet keep weight 1.0.
pub struct ConsensusBuilder {
    descriptor: AgentDescriptor,
    memory: Arc<AgentMemory>,
    config: ConsensusConfig,
}

impl ConsensusBuilder {
    pub fn new(memory: Arc<AgentMemory>, config: ConsensusConfig) -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::CONSENSUS_BUILDER, AgentKind::Evaluator)
                .with_capabilities(["consensus", "aggregation"])
                .with_dependencies([ids::SCORE_AGGREGATOR, ids::LLM_JUDGE])
                .with_description("Builds the final score from the rubric and judge opinions")
                .optional(),
            memory,
            config,
        }
    }

    fn opinions(ctx: &AgentContext) -> Vec<Opinion> {
        let mut opinions = Vec::new();
        if let Some(score) = ctx.payload(ids::SCORE_AGGREGATOR).and_then(|p| num(p, "overall_score")) {
            opinions.push(Opinion::new(
                ids::SCORE_AGGREGATOR,
                score,
                ctx.confidence_of(ids::SCORE_AGGREGATOR, 0.5),
            ));
        }
        let evaluation = ctx
            .payload(ids::LLM_JUDGE)
            .and_then(|p| p.get("evaluation"))
            .and_then(|e| serde_json::from_value::<Evaluation>(e.clone()).ok());
        if let Some(evaluation) = evaluation {
            let mut opinion = Opinion::new(ids::LLM_JUDGE, evaluation.score, evaluation.confidence)
                .with_notes(evaluation.strengths, evaluation.weaknesses);
            opinion.recommendations = evaluation.recommendations;
            opinions.push(opinion);
        }
        opinions
    }
}

#[async_trait]
impl Agent for ConsensusBuilder {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let opinions = Self::opinions(ctx);
        let mut engine = ConsensusEngine::new(self.config.clone());
        let mut weights = BTreeMap::new();
        for opinion in &opinions {
            let report = self.memory.agent_accuracy(&opinion.source_id);
            if report.total_reviewed > 0 {
                engine.set_source_weight(&opinion.source_id, report.accuracy);
            }
            weights.insert(opinion.source_id.clone(), engine.source_weight(&opinion.source_id));
        }
        debug!("Consensus over {} opinions with weights {:?}", opinions.len(), weights);

        let result = engine.build_consensus(&opinions, None)?;
        Ok(AgentOutput::new(
            json!({
                "final_score": scoring::round3(result.final_score),
                "consensus": result,
                "source_weights": weights,
            }),
            result.final_confidence,
        ))
    }
}
