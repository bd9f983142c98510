//! Agents that gather raw profile data from the job input
//!
//! The actual CV parsing, GitHub scraping and portfolio crawling happen in
//! external collaborators; these agents validate and normalise what those
//! collaborators delivered into the job input.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{ids, Agent, AgentContext, AgentOutput};
use crate::error::{AgentError, Result};
use crate::registry::{AgentDescriptor, AgentKind};

/// Default title when the form leaves it empty
pub const DEFAULT_TITLE: &str = "Junior Frontend Developer";

/// Reads a collaborator's output from `input[key]`
///
/// A missing block yields `{key: null, skipped: true}`; a block carrying an
/// `error` field is reported as a transient failure so the orchestrator retries.
fn collected(ctx: &AgentContext, key: &str, default_confidence: f64, agent: &str) -> Result<AgentOutput> {
    match ctx.input_field(key) {
        None => {
            debug!("{}: no {} supplied", agent, key);
            Ok(AgentOutput::new(json!({ key: null, "skipped": true }), 0.5))
        }
        Some(data) => {
            if let Some(error) = data.get("error") {
                let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
                return Err(AgentError::Transient(format!("{}: {}", agent, message)));
            }
            if !data.is_object() {
                return Err(AgentError::Validation(format!("{} must be an object", key)));
            }
            let confidence = data.get("confidence").and_then(Value::as_f64).unwrap_or(default_confidence);
            Ok(AgentOutput::new(json!({ key: data }), confidence))
        }
    }
}

fn skipped(key: &str, confidence: f64, reason: &str) -> AgentOutput {
    AgentOutput::new(json!({ key: null, "skipped": true, "reason": reason }), confidence)
}

/// Structured CV produced by the parsing collaborator
pub struct CvParser {
    descriptor: AgentDescriptor,
}

impl CvParser {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::CV_PARSER, AgentKind::Collector)
                .with_capabilities(["data_collection", "cv_parsing", "document_processing"])
                .with_description("Reads parsed CV data: skills, experience and contact info"),
        }
    }
}

impl Default for CvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CvParser {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        collected(ctx, "cv_data", 0.7, ids::CV_PARSER)
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(skipped("cv_data", 0.3, "CV parsing failed"))
    }
}

/// Validates and normalises the submitted form
pub struct FormProcessor {
    descriptor: AgentDescriptor,
}

impl FormProcessor {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::FORM_PROCESSOR, AgentKind::Collector)
                .with_capabilities(["data_collection", "validation"])
                .with_description("Processes and validates user form input"),
        }
    }
}

impl Default for FormProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn text(form: &Map<String, Value>, key: &str) -> String {
    form.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Number or numeric string; `None` when absent or empty
fn number(form: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    let invalid = || AgentError::Validation(format!("{} must be a number", key));
    match form.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn skills(form: &Map<String, Value>) -> Vec<String> {
    let raw: Vec<String> = match form.get("skills") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(String::from).collect(),
        Some(Value::String(s)) => s.split(',').map(String::from).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn flag(form: &Map<String, Value>, key: &str) -> bool {
    match form.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "on" | "1"),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |v| v != 0.0),
        _ => false,
    }
}

#[async_trait]
impl Agent for FormProcessor {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        let empty = Map::new();
        let form = match ctx.input_field("form_fields") {
            None => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return Err(AgentError::Validation("form_fields must be an object".to_string())),
        };

        let experience_years = number(form, "experience_years")?.unwrap_or(0.0);
        if experience_years < 0.0 {
            return Err(AgentError::Validation("experience_years must not be negative".to_string()));
        }
        let hourly_rate = number(form, "hourly_rate")?.filter(|r| *r > 0.0);
        let project_count = number(form, "project_count")?.unwrap_or(0.0).max(0.0).floor() as u64;
        let title = match text(form, "title") {
            t if t.is_empty() => DEFAULT_TITLE.to_string(),
            t => t,
        };

        let processed = json!({
            "name": text(form, "name"),
            "email": text(form, "email"),
            "title": title,
            "skills": skills(form),
            "experience_years": experience_years,
            "hourly_rate": hourly_rate,
            "bio": text(form, "bio"),
            "location": text(form, "location"),
            "project_count": project_count,
            "has_live_demos": flag(form, "has_live_demos"),
        });

        let fields = processed.as_object().map(|m| m.values().collect::<Vec<_>>()).unwrap_or_default();
        let filled = fields
            .iter()
            .filter(|v| match v {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Number(n) => n.as_f64().map_or(false, |x| x != 0.0),
                Value::Object(o) => !o.is_empty(),
            })
            .count();
        let completeness = filled as f64 / fields.len().max(1) as f64;

        Ok(AgentOutput::new(
            json!({ "form_data": processed, "completeness": completeness }),
            completeness,
        ))
    }
}

/// Repository metrics fetched by the GitHub collaborator
pub struct GithubCollector {
    descriptor: AgentDescriptor,
}

impl GithubCollector {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::GITHUB_COLLECTOR, AgentKind::Collector)
                .with_capabilities(["data_collection", "github"])
                .with_description("Reads GitHub profile metrics"),
        }
    }
}

impl Default for GithubCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for GithubCollector {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        collected(ctx, "github_data", 0.8, ids::GITHUB_COLLECTOR)
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(skipped("github_data", 0.3, "GitHub metrics unavailable"))
    }
}

/// Site metadata fetched by the portfolio collaborator
pub struct PortfolioCollector {
    descriptor: AgentDescriptor,
}

impl PortfolioCollector {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(ids::PORTFOLIO_COLLECTOR, AgentKind::Collector)
                .with_capabilities(["data_collection", "portfolio"])
                .with_description("Reads portfolio website metadata"),
        }
    }
}

impl Default for PortfolioCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for PortfolioCollector {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<AgentOutput> {
        collected(ctx, "portfolio_data", 0.7, ids::PORTFOLIO_COLLECTOR)
    }

    fn fallback(&self, _ctx: &AgentContext) -> Option<AgentOutput> {
        Some(skipped("portfolio_data", 0.3, "portfolio metadata unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::context;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_form_normalisation() {
        let ctx = context(json!({
            "form_fields": {
                "name": " Ada ",
                "skills": "React, css, ,TypeScript",
                "experience_years": "1.5",
                "project_count": 3,
                "has_live_demos": "yes"
            }
        }));
        let out = FormProcessor::new().execute(&ctx).await.unwrap();
        let form = &out.payload["form_data"];
        assert_eq!(form["name"], "Ada");
        assert_eq!(form["title"], DEFAULT_TITLE);
        assert_eq!(form["skills"], json!(["React", "css", "TypeScript"]));
        assert_eq!(form["experience_years"], 1.5);
        assert_eq!(form["hourly_rate"], Value::Null);
        assert_eq!(form["has_live_demos"], true);
        // name, title, skills, experience, projects, demos
        assert!((out.confidence.unwrap() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_form_rejects_non_numeric_experience() {
        let ctx = context(json!({ "form_fields": { "experience_years": "two" } }));
        let err = FormProcessor::new().execute(&ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_collaborator_output_is_skipped() {
        let ctx = context(json!({}));
        let out = GithubCollector::new().execute(&ctx).await.unwrap();
        assert_eq!(out.payload, json!({ "github_data": null, "skipped": true }));
        assert_eq!(out.confidence, Some(0.5));

        let fallback = CvParser::new().fallback(&ctx).unwrap();
        assert_eq!(fallback.confidence, Some(0.3));
        assert_eq!(fallback.payload["skipped"], true);
    }

    #[tokio::test]
    async fn test_collaborator_error_is_transient() {
        let ctx = context(json!({ "portfolio_data": { "error": "site unreachable" } }));
        let err = PortfolioCollector::new().execute(&ctx).await.unwrap_err();
        assert!(err.is_transient());

        let ctx = context(json!({ "github_data": { "public_repos": 4, "confidence": 0.9 } }));
        let out = GithubCollector::new().execute(&ctx).await.unwrap();
        assert_eq!(out.payload["github_data"]["public_repos"], 4);
        assert_eq!(out.confidence, Some(0.9));
    }
}
