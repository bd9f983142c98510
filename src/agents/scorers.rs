//! Component scorers and the score aggregator

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{ids, num, Agent, AgentContext, AgentOutput};
use crate::error::{AgentError, Result};
use crate::events::{EventBus, EventType};
use crate::learning::AdaptiveLearner;
use crate::memory::AgentMemory;
use crate::registry::{AgentDescriptor, AgentKind};
use crate::scoring::{self, ComponentScore};

fn component_output(score: &ComponentScore, confidence: f64) -> AgentOutput {
    AgentOutput::new(
        json!({ "score": score.score, "level": score.level, "details": score.details }),
        confidence,
    )
}

fn flat(score: f64, level: &str, confidence: f64) -> AgentOutput {
    AgentOutput::new(json!({ "score": score, "level": level, "details": {} }), confidence)
}

/// Collected block of a collector, `None` when absent or skipped
fn collected<'a>(ctx: &'a AgentContext, agent: &str, key: &str) -> Option<&'a Value> {
    let payload = ctx.payload(agent)?;
    if payload.get("skipped").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    payload.get(key).filter(|v| !v.is_null())
}

fn form_data(ctx: &AgentContext) -> Option<&Value> {
    collected(ctx, ids::FORM_PROCESSOR, "form_data")
}

/// Union of form and CV skills
pub struct SkillScorer {
    descriptor: AgentDescriptor,
}

impl SkillScorer {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::SKILL_SCORER, AgentKind::Scorer)
                .with_capabilities(["scoring", "skills"])
                .with_dependencies([ids::FORM_PROCESSOR, ids::CV_PARSER])
                .with_description("Scores technical skills from form and CV data"),
        }
    }
}

impl Default for SkillScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for SkillScorer {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let form_skills = form_data(ctx)
            .and_then(|f| f.get("skills"))
            .map(scoring::extract_skills)
            .unwrap_or_default();
        let cv_skills = collected(ctx, ids::CV_PARSER, "cv_data")
            .map(scoring::extract_skills)
            .unwrap_or_default();

        let mut skills = form_skills.clone();
        for skill in &cv_skills {
            if !skills.contains(skill) {
                skills.push(skill.clone());
            }
        }
        if skills.is_empty() && form_data(ctx).is_none() {
            return Err(AgentError::Validation(
                "no skill data: neither the form nor the CV produced output".to_string(),
            ));
        }

        let mut sources = Vec::new();
        if !form_skills.is_empty() {
            sources.push("form");
        }
        if !cv_skills.is_empty() {
            sources.push("cv");
        }
        let confidence = match sources.len() {
            2 => 0.95,
            _ if !skills.is_empty() => 0.85,
            _ => 0.5,
        };

        let score = scoring::skill_score(&skills);
        let mut output = component_output(&score, confidence);
        output.payload["skills"] = json!(skills);
        output.payload["total_skills"] = json!(skills.len());
        output.payload["skill_sources"] = json!(sources);
        Ok(output)
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(flat(0.3, "beginner", 0.3))
    }
}

/// Repository activity
pub struct GithubScorer {
    descriptor: AgentDescriptor,
}

impl GithubScorer {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::GITHUB_SCORER, AgentKind::Scorer)
                .with_capabilities(["scoring", "github"])
                .with_dependencies([ids::GITHUB_COLLECTOR])
                .with_description("Scores GitHub activity"),
        }
    }
}

impl Default for GithubScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for GithubScorer {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        if ctx.payload(ids::GITHUB_COLLECTOR).is_none() {
            return Err(AgentError::Validation(
                "no GitHub data: github_collector produced no output".to_string(),
            ));
        }
        match collected(ctx, ids::GITHUB_COLLECTOR, "github_data") {
            None => Ok(AgentOutput::new(
                json!({ "score": 0.2, "level": "minimal", "details": { "skipped": true } }),
                0.5,
            )),
            Some(data) => Ok(component_output(&scoring::github_score(data), 0.85)),
        }
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(flat(0.1, "minimal", 0.3))
    }
}

/// Portfolio quality, supplemented with the form's project answers
pub struct PortfolioScorer {
    descriptor: AgentDescriptor,
}

impl PortfolioScorer {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::PORTFOLIO_SCORER, AgentKind::Scorer)
                .with_capabilities(["scoring", "portfolio"])
                .with_dependencies([ids::PORTFOLIO_COLLECTOR, ids::FORM_PROCESSOR])
                .with_description("Scores portfolio quality"),
        }
    }
}

impl Default for PortfolioScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for PortfolioScorer {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let mut data = collected(ctx, ids::PORTFOLIO_COLLECTOR, "portfolio_data")
            .filter(|d| d.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));

        if let Some(form) = form_data(ctx) {
            let scraped = num(&data, "estimated_projects").filter(|n| *n > 0.0);
            let projects = scraped.or_else(|| num(form, "project_count")).unwrap_or(0.0);
            data["project_count"] = json!(projects);
            data["has_live_demos"] = json!(form.get("has_live_demos").and_then(Value::as_bool).unwrap_or(false));
            data["has_projects"] = json!(projects > 0.0);
        }
        if data.as_object().map_or(true, |m| m.is_empty()) {
            data = json!({
                "has_projects": false,
                "project_count": 0,
                "has_live_demos": false,
                "quality_score": 0.2,
            });
        }

        let has_projects = data.get("has_projects").and_then(Value::as_bool).unwrap_or(false);
        let confidence = if has_projects { 0.7 } else { 0.5 };
        Ok(component_output(&scoring::portfolio_score(&data), confidence))
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(flat(0.1, "minimal", 0.3))
    }
}

/// Years of experience, the larger of form and CV
pub struct ExperienceScorer {
    descriptor: AgentDescriptor,
}

impl ExperienceScorer {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::EXPERIENCE_SCORER, AgentKind::Scorer)
                .with_capabilities(["scoring", "experience"])
                .with_dependencies([ids::FORM_PROCESSOR, ids::CV_PARSER])
                .with_description("Scores experience level from form and CV data"),
        }
    }
}

impl Default for ExperienceScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ExperienceScorer {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let form_years = form_data(ctx).and_then(|f| num(f, "experience_years")).unwrap_or(0.0);
        let cv_years = collected(ctx, ids::CV_PARSER, "cv_data")
            .and_then(|cv| num(cv, "experience_years"))
            .unwrap_or(0.0);
        let years = form_years.max(cv_years);

        let mut score = scoring::experience_score(years);
        score.details["experience_source"] = json!(if cv_years > form_years { "cv" } else { "form" });
        score.details["form_years"] = json!(form_years);
        score.details["cv_years"] = json!(cv_years);

        let confidence = if cv_years > 0.0 { 0.95 } else { 0.85 };
        Ok(component_output(&score, confidence))
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(flat(0.1, "new", 0.3))
    }
}

/// Folds the component scores into the overall score with the learner's
/// current weights, remembers the decision and announces it
pub struct ScoreAggregator {
    descriptor: AgentDescriptor,
    memory: Arc<AgentMemory>,
    bus: Arc<EventBus>,
    learner: Arc<AdaptiveLearner>,
}

impl ScoreAggregator {
    const SOURCES: [(&'static str, &'static str); 4] = [
        (scoring::SKILL_STRENGTH, ids::SKILL_SCORER),
        (scoring::GITHUB_ACTIVITY, ids::GITHUB_SCORER),
        (scoring::PORTFOLIO_QUALITY, ids::PORTFOLIO_SCORER),
        (scoring::EXPERIENCE_DEPTH, ids::EXPERIENCE_SCORER),
    ];

    pub fn new(memory: Arc<AgentMemory>, bus: Arc<EventBus>, learner: Arc<AdaptiveLearner>) -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::SCORE_AGGREGATOR, AgentKind::Scorer)
                .with_capabilities(["scoring", "aggregation"])
                .with_dependencies(Self::SOURCES.iter().map(|(_, agent)| *agent))
                .with_description("Aggregates all component scores into the overall score"),
            memory,
            bus,
            learner,
        }
    }
}

fn component_from(payload: Option<&Value>) -> ComponentScore {
    match payload {
        Some(p) => ComponentScore {
            score: num(p, "score").unwrap_or(0.3),
            level: p.get("level").and_then(Value::as_str).unwrap_or("unknown").to_string(),
            details: p.get("details").cloned().unwrap_or_else(|| json!({})),
        },
        None => ComponentScore {
            score: 0.3,
            level: "unknown".to_string(),
            details: json!({}),
        },
    }
}

#[async_trait]
impl Agent for ScoreAggregator {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let mut components: BTreeMap<String, ComponentScore> = Self::SOURCES
            .iter()
            .map(|(component, agent)| (component.to_string(), component_from(ctx.payload(agent))))
            .collect();

        let momentum = match ctx.payload(ids::GITHUB_SCORER).and_then(|p| num(p, "score")) {
            Some(github) => scoring::learning_momentum(github),
            None => 0.5,
        };
        components.insert(
            scoring::LEARNING_MOMENTUM.to_string(),
            ComponentScore {
                score: scoring::round3(momentum),
                level: "derived".to_string(),
                details: json!({ "source": ids::GITHUB_SCORER }),
            },
        );

        let weights = self.learner.current_weights();
        let result = scoring::compute_overall(&components, &weights);
        let confidence = Self::SOURCES
            .iter()
            .map(|(_, agent)| ctx.confidence_of(agent, 0.5))
            .sum::<f64>()
            / Self::SOURCES.len() as f64;

        let skills = ctx
            .payload(ids::SKILL_SCORER)
            .and_then(|p| p.get("skills"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        let experience_years = ctx
            .payload(ids::EXPERIENCE_SCORER)
            .and_then(|p| p.get("details"))
            .and_then(|d| num(d, "years"))
            .unwrap_or(0.0);

        let entry_id = self.memory.store_interaction(
            ids::SCORE_AGGREGATOR,
            json!({
                "user_id": ctx.user_id,
                "job_id": ctx.job_id,
                "breakdown": result.raw_scores(),
                "skills": skills,
                "experience_years": experience_years,
                "tier": result.tier,
            }),
            json!({ "overall_score": result.overall_score, "tier": result.tier }),
            confidence,
        );
        self.bus.emit(
            EventType::ScoreCalculated,
            ids::SCORE_AGGREGATOR,
            Some(&ctx.job_id),
            json!({
                "overall_score": result.overall_score,
                "tier": result.tier,
                "confidence": confidence,
                "memory_entry_id": entry_id,
            }),
        );
        info!(
            "Job {} scored {:.3} ({}) with confidence {:.2}",
            ctx.job_id, result.overall_score, result.tier, confidence
        );

        Ok(AgentOutput::new(
            json!({
                "overall_score": result.overall_score,
                "tier": result.tier,
                "score_result": result,
                "skills": skills,
                "experience_years": experience_years,
                "memory_entry_id": entry_id,
            }),
            confidence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{context, services};
    use crate::events::HistoryFilter;
    use crate::scoring::Tier;
    use pretty_assertions::assert_eq;

    fn with(ctx: &mut AgentContext, agent: &str, payload: Value, confidence: f64) {
        ctx.record(agent, AgentOutput::new(payload, confidence));
    }

    #[tokio::test]
    async fn test_skill_sources_drive_confidence() {
        let mut ctx = context(json!({}));
        with(&mut ctx, ids::FORM_PROCESSOR, json!({ "form_data": { "skills": ["React", "CSS"] } }), 0.6);
        with(&mut ctx, ids::CV_PARSER, json!({ "cv_data": { "all_skills": ["css", "jest"] } }), 0.7);
        let out = SkillScorer::new().execute(&ctx).await.unwrap();
        assert_eq!(out.confidence, Some(0.95));
        assert_eq!(out.payload["skills"], json!(["react", "css", "jest"]));
        assert_eq!(out.payload["skill_sources"], json!(["form", "cv"]));

        let empty = context(json!({}));
        let scorer = SkillScorer::new();
        let err = scorer.execute(&empty).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        let fallback = scorer.fallback(&empty).unwrap();
        assert_eq!(fallback.payload["score"], 0.3);
        assert_eq!(fallback.confidence, Some(0.3));
    }

    #[tokio::test]
    async fn test_github_scorer_handles_skipped_collector() {
        let mut ctx = context(json!({}));
        assert!(matches!(
            GithubScorer::new().execute(&ctx).await,
            Err(AgentError::Validation(_))
        ));

        with(&mut ctx, ids::GITHUB_COLLECTOR, json!({ "github_data": null, "skipped": true }), 0.5);
        let out = GithubScorer::new().execute(&ctx).await.unwrap();
        assert_eq!(out.payload["score"], 0.2);
        assert_eq!(out.confidence, Some(0.5));

        with(
            &mut ctx,
            ids::GITHUB_COLLECTOR,
            json!({ "github_data": { "public_repos": 10, "total_stars": 20, "recent_active_repos": 5, "contributions_last_year": 200 } }),
            0.8,
        );
        let out = GithubScorer::new().execute(&ctx).await.unwrap();
        assert_eq!(out.payload["score"], 0.95);
        assert_eq!(out.payload["level"], "active");
    }

    #[tokio::test]
    async fn test_portfolio_uses_form_answers() {
        let mut ctx = context(json!({}));
        with(&mut ctx, ids::PORTFOLIO_COLLECTOR, json!({ "portfolio_data": null, "skipped": true }), 0.5);
        with(
            &mut ctx,
            ids::FORM_PROCESSOR,
            json!({ "form_data": { "project_count": 3, "has_live_demos": true } }),
            0.5,
        );
        let out = PortfolioScorer::new().execute(&ctx).await.unwrap();
        // 0.3 base + 0.1 projects + 0.15 demos
        assert_eq!(out.payload["score"], 0.55);
        assert_eq!(out.confidence, Some(0.7));
    }

    #[tokio::test]
    async fn test_experience_prefers_larger_source() {
        let mut ctx = context(json!({}));
        with(&mut ctx, ids::FORM_PROCESSOR, json!({ "form_data": { "experience_years": 0.5 } }), 0.5);
        with(&mut ctx, ids::CV_PARSER, json!({ "cv_data": { "experience_years": 2 } }), 0.7);
        let out = ExperienceScorer::new().execute(&ctx).await.unwrap();
        assert_eq!(out.payload["score"], 0.85);
        assert_eq!(out.payload["details"]["experience_source"], "cv");
        assert_eq!(out.confidence, Some(0.95));
    }

    #[tokio::test]
    async fn test_aggregator_stores_and_announces() {
        let services = services();
        let aggregator = ScoreAggregator::new(
            Arc::clone(&services.memory),
            Arc::clone(&services.bus),
            Arc::clone(&services.learner),
        );
        let mut ctx = context(json!({}));
        with(&mut ctx, ids::SKILL_SCORER, json!({ "score": 0.8, "level": "strong", "skills": ["react"] }), 0.9);
        with(&mut ctx, ids::GITHUB_SCORER, json!({ "score": 0.6, "level": "active" }), 0.7);
        with(&mut ctx, ids::EXPERIENCE_SCORER, json!({ "score": 0.7, "details": { "years": 1.5 } }), 0.9);

        let out = aggregator.execute(&ctx).await.unwrap();
        // 0.8×0.35 + 0.6×0.25 + 0.3×0.20 + 0.7×0.15 + 0.6×0.05
        assert_eq!(out.payload["overall_score"], 0.625);
        assert_eq!(out.payload["tier"], json!(Tier::Competent));
        // portfolio missing counts as 0.5
        assert!((out.confidence.unwrap() - 0.75).abs() < 1e-9);

        let entry_id = out.payload["memory_entry_id"].as_str().unwrap();
        let entry = services.memory.get(entry_id).unwrap();
        assert_eq!(entry.context["user_id"], "user-1");
        assert_eq!(entry.context["breakdown"][scoring::PORTFOLIO_QUALITY], 0.3);

        let events = services.bus.history(&HistoryFilter::of_type(EventType::ScoreCalculated), 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].job_id.as_deref(), Some("job-1"));
    }
}
