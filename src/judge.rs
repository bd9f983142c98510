//! Judge evaluations and the bounded confidence loop around them
//!
//! A [`Judge`] produces an [`Evaluation`] of a scored profile. The
//! [`ConfidenceLoop`] asks the judge again (at a higher temperature) while the
//! confidence stays under the threshold, merging each re-ask into the running
//! evaluation, and stops at the threshold or the iteration cap.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{JudgeConfig, LlmConfig};
use crate::error::{AgentError, Result};
use crate::scoring::{self, Tier};

/// What the judge is asked to assess
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationInput {
    /// Overall rubric score
    pub overall_score: f64,
    /// Tier of the overall score
    pub tier: Tier,
    /// Raw score per component
    pub components: BTreeMap<String, f64>,
    /// Rubric level per component
    pub levels: BTreeMap<String, String>,
    /// Cohort percentile
    pub percentile: u32,
    /// Cohort average hourly rate
    pub avg_rate: f64,
    /// Declared skills
    pub skills: Vec<String>,
    /// Years of experience
    pub experience_years: f64,
}

impl EvaluationInput {
    fn component(&self, name: &str, default: f64) -> f64 {
        self.components.get(name).copied().unwrap_or(default)
    }
}

/// A judge's assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Score the judge assigns, in [0, 1]
    pub score: f64,
    /// Judge confidence, in [0, 1]
    pub confidence: f64,
    /// Short assessment
    pub summary: String,
    /// Noted strengths
    pub strengths: Vec<String>,
    /// Noted weaknesses
    pub weaknesses: Vec<String>,
    /// Suggested actions
    pub recommendations: Vec<String>,
    /// Market position notes
    #[serde(default)]
    pub market_position: Value,
    /// `rule_based`, `llm` or `refined`
    pub evaluation_type: String,
}

/// Confidence loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// First judgment
    Initial,
    /// Re-ask with altered temperature
    ConsistencyCheck,
    /// Merge of the re-ask into the running evaluation
    Refine,
    /// Terminal state
    Final,
}

/// Parameters of one judge call
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    /// 1-based call number
    pub iteration: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Loop state issuing the call
    pub state: LoopState,
}

/// One recorded loop transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStep {
    /// Judge call number
    pub iteration: u32,
    /// State entered
    pub state: LoopState,
    /// Confidence after this step
    pub confidence: f64,
    /// Score after this step
    pub score: f64,
}

/// Terminal result of the confidence loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// The chosen evaluation; never empty
    pub evaluation: Evaluation,
    /// Judge calls made
    pub iterations_used: u32,
    /// Whether the chosen evaluation reached the threshold
    pub threshold_met: bool,
    /// Every state transition, in order
    pub trace: Vec<LoopStep>,
}

/// Something that can evaluate a scored profile
#[async_trait]
pub trait Judge: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Produces one evaluation
    async fn evaluate(&self, input: &EvaluationInput, request: &JudgeRequest) -> Result<Evaluation>;
}

/// Bounded Initial → (ConsistencyCheck → Refine)* → Final state machine
#[derive(Debug, Clone)]
pub struct ConfidenceLoop {
    threshold: f64,
    max_iterations: u32,
    base_temperature: f32,
    temperature_step: f32,
}

impl ConfidenceLoop {
    /// Builds a loop from the judge config
    pub fn new(config: &JudgeConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
            max_iterations: config.max_iterations.max(1),
            base_temperature: config.base_temperature,
            temperature_step: config.temperature_step,
        }
    }

    /// Runs the loop to its Final state
    ///
    /// An error from the first judge call propagates. An error from a later
    /// call ends the loop early with the best evaluation seen so far.
    pub async fn run(&self, judge: &dyn Judge, input: &EvaluationInput) -> Result<LoopOutcome> {
        let mut trace = Vec::new();
        let first = judge
            .evaluate(
                input,
                &JudgeRequest {
                    iteration: 1,
                    temperature: self.base_temperature,
                    state: LoopState::Initial,
                },
            )
            .await?;
        trace.push(LoopStep {
            iteration: 1,
            state: LoopState::Initial,
            confidence: first.confidence,
            score: first.score,
        });
        debug!("{} initial confidence {:.2}", judge.name(), first.confidence);

        let mut iterations = 1;
        let mut current = first.clone();
        let mut best = first;

        while current.confidence < self.threshold && iterations < self.max_iterations {
            iterations += 1;
            let request = JudgeRequest {
                iteration: iterations,
                temperature: self.base_temperature + self.temperature_step * (iterations - 1) as f32,
                state: LoopState::ConsistencyCheck,
            };
            let second = match judge.evaluate(input, &request).await {
                Ok(e) => e,
                Err(e) => {
                    warn!("{} consistency check {} failed: {}", judge.name(), iterations, e);
                    iterations -= 1;
                    break;
                }
            };
            trace.push(LoopStep {
                iteration: iterations,
                state: LoopState::ConsistencyCheck,
                confidence: second.confidence,
                score: second.score,
            });

            current = refine(&current, &second);
            trace.push(LoopStep {
                iteration: iterations,
                state: LoopState::Refine,
                confidence: current.confidence,
                score: current.score,
            });
            if current.confidence > best.confidence {
                best = current.clone();
            }
        }

        let (evaluation, threshold_met) = if current.confidence >= self.threshold {
            (current, true)
        } else {
            let met = best.confidence >= self.threshold;
            (best, met)
        };
        trace.push(LoopStep {
            iteration: iterations,
            state: LoopState::Final,
            confidence: evaluation.confidence,
            score: evaluation.score,
        });
        info!(
            "{} finished after {} iteration(s), confidence {:.2}, threshold met: {}",
            judge.name(),
            iterations,
            evaluation.confidence,
            threshold_met
        );

        Ok(LoopOutcome {
            evaluation,
            iterations_used: iterations,
            threshold_met,
            trace,
        })
    }
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    a.iter()
        .chain(b)
        .filter(|s| seen.insert(s.to_lowercase()))
        .cloned()
        .collect()
}

/// Merges a re-ask into the running evaluation: mean score, union of notes,
/// confidence of the re-ask
pub fn refine(current: &Evaluation, recheck: &Evaluation) -> Evaluation {
    Evaluation {
        score: (current.score + recheck.score) / 2.0,
        confidence: recheck.confidence,
        summary: recheck.summary.clone(),
        strengths: union(&current.strengths, &recheck.strengths),
        weaknesses: union(&current.weaknesses, &recheck.weaknesses),
        recommendations: union(&current.recommendations, &recheck.recommendations),
        market_position: if recheck.market_position.is_null() {
            current.market_position.clone()
        } else {
            recheck.market_position.clone()
        },
        evaluation_type: "refined".to_string(),
    }
}

/// Deterministic judge built from the rubric scores
#[derive(Debug, Clone, Default)]
pub struct RuleBasedJudge;

impl RuleBasedJudge {
    /// Confidence reported by rule-based evaluations
    pub const CONFIDENCE: f64 = 0.85;

    /// Builds the evaluation synchronously
    pub fn assess(input: &EvaluationInput) -> Evaluation {
        let skill = input.component(scoring::SKILL_STRENGTH, 0.5);
        let github = input.component(scoring::GITHUB_ACTIVITY, 0.3);
        let portfolio = input.component(scoring::PORTFOLIO_QUALITY, 0.3);
        let overall = input.overall_score;

        let mut strengths = Vec::new();
        if skill >= 0.6 {
            strengths.push("Strong technical foundation with modern frontend skills");
        }
        if github >= 0.5 {
            strengths.push("Active GitHub presence showing consistent coding practice");
        }
        if portfolio >= 0.5 {
            strengths.push("Good portfolio demonstrating practical project experience");
        }
        if overall >= 0.6 {
            strengths.push("Well-rounded profile competitive in the junior market");
        }
        if strengths.is_empty() {
            let has = |name: &str| input.skills.iter().any(|s| s.eq_ignore_ascii_case(name));
            if has("react") {
                strengths.push("Learning React - the most in-demand frontend framework");
            }
            if has("javascript") {
                strengths.push("JavaScript knowledge - essential for frontend development");
            }
            strengths.push("Taking initiative to assess and improve your skills");
        }

        let mut weaknesses = Vec::new();
        if skill < 0.5 {
            weaknesses.push("Skill set needs expansion - focus on TypeScript and testing");
        }
        if github < 0.4 {
            weaknesses.push("GitHub activity is low - regular commits help build credibility");
        }
        if portfolio < 0.4 {
            weaknesses.push("Portfolio needs more polished projects with live demos");
        }
        if weaknesses.is_empty() {
            weaknesses.push("Continue building momentum - consistency is key");
        }

        let mut recommendations: Vec<&str> = match input.tier {
            Tier::EarlyStage => vec![
                "Complete a structured React course",
                "Build your first 3 projects: Todo app, Weather app, Portfolio site",
                "Set up GitHub and commit code daily, even small changes",
                "Join frontend communities for support",
            ],
            Tier::Developing => vec![
                "Learn TypeScript - it's becoming essential for frontend roles",
                "Add testing to your projects using Jest and React Testing Library",
                "Create detailed READMEs for your GitHub projects",
                "Build one complex project (e.g., e-commerce site, dashboard)",
            ],
            Tier::Competent => vec![
                "Learn Next.js for server-side rendering and better SEO",
                "Contribute to open source projects to gain visibility",
                "Write technical blog posts about what you're learning",
                "Start applying for junior frontend positions",
            ],
            Tier::StrongJunior => vec![
                "Consider learning backend basics (Node.js, APIs)",
                "Mentor other beginners to solidify your knowledge",
                "Build a complex full-stack project for your portfolio",
                "Network with senior developers for career guidance",
            ],
        };
        if skill < 0.5 && !recommendations.iter().any(|r| r.contains("TypeScript")) {
            recommendations.insert(0, "Priority: Learn TypeScript - most job postings require it");
        }
        if github < 0.3 {
            recommendations.insert(0, "Priority: Increase GitHub activity - aim for daily commits");
        }
        if portfolio < 0.3 {
            recommendations.insert(0, "Priority: Build 2-3 polished projects with live demos");
        }

        let percentile = input.percentile;
        let summary = match input.tier {
            Tier::StrongJunior => format!(
                "Excellent progress! You're in the top {}% of junior frontend developers and well-positioned for junior roles.",
                100u32.saturating_sub(percentile)
            ),
            Tier::Competent => format!(
                "You're doing well! At the {}th percentile you have a solid foundation; targeted improvements will make you very competitive.",
                percentile
            ),
            Tier::Developing => format!(
                "You're on the right track! At the {}th percentile you're building good habits; focus on the recommended improvements.",
                percentile
            ),
            Tier::EarlyStage => {
                "Welcome to your frontend journey! Follow the recommendations to build a strong foundation.".to_string()
            }
        };

        let (rate_position, multiplier) = match percentile {
            p if p >= 75 => ("above average", 1.2),
            p if p >= 50 => ("market rate", 1.0),
            p if p >= 25 => ("entry level", 0.8),
            _ => ("building experience", 0.6),
        };

        let owned = |v: Vec<&str>, n: usize| v.into_iter().take(n).map(String::from).collect::<Vec<_>>();
        Evaluation {
            score: overall,
            confidence: Self::CONFIDENCE,
            summary,
            strengths: owned(strengths, 3),
            weaknesses: owned(weaknesses, 3),
            recommendations: owned(recommendations, 4),
            market_position: json!({
                "rate_position": rate_position,
                "suggested_hourly_rate": (input.avg_rate * multiplier).round(),
            }),
            evaluation_type: "rule_based".to_string(),
        }
    }
}

#[async_trait]
impl Judge for RuleBasedJudge {
    fn name(&self) -> &str {
        "rule_based"
    }

    async fn evaluate(&self, input: &EvaluationInput, _request: &JudgeRequest) -> Result<Evaluation> {
        Ok(Self::assess(input))
    }
}

/// Black-box text completion service
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Completes `prompt` at `temperature`
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// Chat-completions client over HTTP
pub struct HttpCompletionClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    /// Builds a client; the API key is read from `config.api_key_env` when set
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": "You evaluate junior frontend developer profiles. Reply with JSON only." },
                { "role": "user", "content": prompt }
            ],
            "temperature": temperature
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body: Value = request.send().await?.error_for_status()?.json().await?;
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::Llm("completion response has no message content".to_string()))
    }
}

/// Judge backed by a language model
pub struct LlmJudge<C> {
    client: C,
}

impl<C: CompletionClient> LlmJudge<C> {
    /// Wraps a completion client
    pub fn new(client: C) -> Self {
        Self { client }
    }

    fn prompt(input: &EvaluationInput, request: &JudgeRequest) -> String {
        let pct = |name: &str| (input.component(name, 0.0) * 100.0).round();
        let level = |name: &str| input.levels.get(name).map(String::as_str).unwrap_or("unknown");
        let mut prompt = format!(
            "Evaluate a junior frontend developer (0-2 years experience).\n\
             Skills: {}\nExperience: {} years\n\
             Overall: {}% ({} tier)\n\
             Skills: {}% ({})\nGitHub: {}% ({})\nPortfolio: {}% ({})\nExperience: {}% ({})\n\
             Benchmark position: {}th percentile\n\n\
             Return JSON with keys: score (0-1), confidence (0-1), summary, strengths, \
             areas_for_improvement, recommendations, market_position.",
            if input.skills.is_empty() { "Not provided".to_string() } else { input.skills.join(", ") },
            input.experience_years,
            (input.overall_score * 100.0).round(),
            input.tier,
            pct(scoring::SKILL_STRENGTH),
            level(scoring::SKILL_STRENGTH),
            pct(scoring::GITHUB_ACTIVITY),
            level(scoring::GITHUB_ACTIVITY),
            pct(scoring::PORTFOLIO_QUALITY),
            level(scoring::PORTFOLIO_QUALITY),
            pct(scoring::EXPERIENCE_DEPTH),
            level(scoring::EXPERIENCE_DEPTH),
            input.percentile,
        );
        if request.state == LoopState::ConsistencyCheck {
            prompt.push_str("\nRe-examine the profile independently and state how certain you are.");
        }
        prompt
    }
}

/// Strips markdown code fences around a JSON reply
pub fn strip_code_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

/// Parses a model reply into an evaluation; missing score falls back to `default_score`
///
/// A reply that is not a JSON object is a validation error, so it is not retried.
pub fn parse_evaluation(reply: &str, default_score: f64) -> Result<Evaluation> {
    let value: Value = serde_json::from_str(strip_code_fences(reply))
        .map_err(|e| AgentError::Validation(format!("model reply is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(AgentError::Validation("model reply is not a JSON object".to_string()));
    }
    let unit = |key: &str, default: f64| {
        value
            .get(key)
            .and_then(Value::as_f64)
            .map_or(default, |v| v.clamp(0.0, 1.0))
    };
    Ok(Evaluation {
        score: unit("score", default_score),
        confidence: unit("confidence", 0.9),
        summary: value.get("summary").and_then(Value::as_str).unwrap_or_default().to_string(),
        strengths: string_list(&value, "strengths"),
        weaknesses: string_list(&value, "areas_for_improvement"),
        recommendations: string_list(&value, "recommendations"),
        market_position: value.get("market_position").cloned().unwrap_or(Value::Null),
        evaluation_type: "llm".to_string(),
    })
}

#[async_trait]
impl<C: CompletionClient> Judge for LlmJudge<C> {
    fn name(&self) -> &str {
        "llm"
    }

    async fn evaluate(&self, input: &EvaluationInput, request: &JudgeRequest) -> Result<Evaluation> {
        let reply = self.client.complete(&Self::prompt(input, request), request.temperature).await?;
        parse_evaluation(&reply, input.overall_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedJudge {
        script: Mutex<VecDeque<Result<f64>>>,
        temperatures: Mutex<Vec<f32>>,
    }

    impl ScriptedJudge {
        fn new(script: Vec<Result<f64>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Judge for ScriptedJudge {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn evaluate(&self, _input: &EvaluationInput, request: &JudgeRequest) -> Result<Evaluation> {
            self.temperatures.lock().push(request.temperature);
            let confidence = self.script.lock().pop_front().unwrap_or(Ok(0.5))?;
            Ok(Evaluation {
                score: confidence,
                confidence,
                summary: format!("call {}", request.iteration),
                strengths: vec![format!("s{}", request.iteration)],
                weaknesses: vec!["w".to_string()],
                recommendations: vec![],
                market_position: Value::Null,
                evaluation_type: "scripted".to_string(),
            })
        }
    }

    fn sample_input() -> EvaluationInput {
        EvaluationInput {
            overall_score: 0.55,
            tier: Tier::Competent,
            components: [
                (scoring::SKILL_STRENGTH, 0.62),
                (scoring::GITHUB_ACTIVITY, 0.35),
                (scoring::PORTFOLIO_QUALITY, 0.25),
                (scoring::EXPERIENCE_DEPTH, 0.55),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            levels: BTreeMap::new(),
            percentile: 50,
            avg_rate: 35.0,
            skills: vec!["react".into(), "typescript".into()],
            experience_years: 1.0,
        }
    }

    fn confidence_loop() -> ConfidenceLoop {
        ConfidenceLoop::new(&JudgeConfig::default())
    }

    #[tokio::test]
    async fn test_loop_reaches_threshold_on_third_call() {
        let judge = ScriptedJudge::new(vec![Ok(0.6), Ok(0.75), Ok(0.85)]);
        let outcome = confidence_loop().run(&judge, &sample_input()).await.unwrap();

        assert_eq!(outcome.iterations_used, 3);
        assert!(outcome.threshold_met);
        assert_eq!(outcome.evaluation.confidence, 0.85);
        assert_eq!(outcome.evaluation.strengths, vec!["s1", "s2", "s3"]);
        assert_eq!(outcome.trace.last().map(|s| s.state), Some(LoopState::Final));
        let temperatures = judge.temperatures.lock().clone();
        assert_eq!(temperatures.len(), 3);
        for (got, want) in temperatures.iter().zip([0.3f32, 0.5, 0.7]) {
            assert!((got - want).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_loop_stops_at_cap_with_best() {
        let judge = ScriptedJudge::new(vec![Ok(0.5), Ok(0.5), Ok(0.5)]);
        let outcome = confidence_loop().run(&judge, &sample_input()).await.unwrap();

        assert_eq!(outcome.iterations_used, 3);
        assert!(!outcome.threshold_met);
        assert_eq!(outcome.evaluation.confidence, 0.5);
        // ties keep the earliest evaluation
        assert_eq!(outcome.evaluation.summary, "call 1");
    }

    #[tokio::test]
    async fn test_loop_keeps_highest_confidence() {
        let judge = ScriptedJudge::new(vec![Ok(0.4), Ok(0.7), Ok(0.6)]);
        let outcome = confidence_loop().run(&judge, &sample_input()).await.unwrap();
        assert_eq!(outcome.evaluation.confidence, 0.7);
        assert_eq!(outcome.evaluation.evaluation_type, "refined");
    }

    #[tokio::test]
    async fn test_loop_direct_to_final() {
        let judge = ScriptedJudge::new(vec![Ok(0.9)]);
        let outcome = confidence_loop().run(&judge, &sample_input()).await.unwrap();
        assert_eq!(outcome.iterations_used, 1);
        assert!(outcome.threshold_met);
        let states: Vec<LoopState> = outcome.trace.iter().map(|s| s.state).collect();
        assert_eq!(states, vec![LoopState::Initial, LoopState::Final]);
    }

    #[tokio::test]
    async fn test_loop_errors() {
        let judge = ScriptedJudge::new(vec![Err(AgentError::Llm("down".into()))]);
        assert!(confidence_loop().run(&judge, &sample_input()).await.is_err());

        let judge = ScriptedJudge::new(vec![Ok(0.6), Err(AgentError::Llm("down".into()))]);
        let outcome = confidence_loop().run(&judge, &sample_input()).await.unwrap();
        assert_eq!(outcome.iterations_used, 1);
        assert_eq!(outcome.evaluation.confidence, 0.6);
    }

    #[test]
    fn test_rule_based_assessment() {
        let e = RuleBasedJudge::assess(&sample_input());
        assert_eq!(e.confidence, RuleBasedJudge::CONFIDENCE);
        assert_eq!(e.score, 0.55);
        assert_eq!(e.strengths, vec!["Strong technical foundation with modern frontend skills"]);
        assert_eq!(e.weaknesses.len(), 2);
        assert!(e.recommendations[0].starts_with("Priority: Build"));
        assert_eq!(e.market_position["suggested_hourly_rate"], json!(35.0));
    }

    #[test]
    fn test_parse_evaluation() {
        let reply = "```json\n{\"score\": 0.7, \"summary\": \"ok\", \"strengths\": [\"react\"], \"areas_for_improvement\": [\"tests\"]}\n```";
        let e = parse_evaluation(reply, 0.5).unwrap();
        assert_eq!(e.score, 0.7);
        assert_eq!(e.confidence, 0.9);
        assert_eq!(e.weaknesses, vec!["tests"]);

        let err = parse_evaluation("not json", 0.5).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(!err.is_transient());
        assert!(matches!(parse_evaluation("[1, 2]", 0.5), Err(AgentError::Validation(_))));
    }

    #[tokio::test]
    async fn test_llm_judge_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{ "message": { "content": "{\"score\": 0.6, \"confidence\": 0.82}" } }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let config = LlmConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            api_key_env: "FAIRFOUND_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        let judge = LlmJudge::new(HttpCompletionClient::new(&config).unwrap());
        let outcome = confidence_loop().run(&judge, &sample_input()).await.unwrap();

        assert_eq!(outcome.iterations_used, 1);
        assert_eq!(outcome.evaluation.score, 0.6);
        assert_eq!(outcome.evaluation.evaluation_type, "llm");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .create_async()
            .await;
        let config = LlmConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            ..LlmConfig::default()
        };
        let client = HttpCompletionClient::new(&config).unwrap();
        let err = client.complete("hi", 0.3).await.unwrap_err();
        assert!(err.is_transient());
    }
}
