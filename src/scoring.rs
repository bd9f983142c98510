//! Rubric scoring for junior frontend profiles
//!
//! Each component scorer returns a [`ComponentScore`] (score, rubric level and
//! details). [`compute_overall`] folds the components with the current weight
//! table into a [`ScoreBreakdown`]; [`benchmark`] places an overall score in
//! a cohort.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Skill component
pub const SKILL_STRENGTH: &str = "skill_strength";
/// Repository activity component
pub const GITHUB_ACTIVITY: &str = "github_activity";
/// Portfolio component
pub const PORTFOLIO_QUALITY: &str = "portfolio_quality";
/// Experience component
pub const EXPERIENCE_DEPTH: &str = "experience_depth";
/// Growth trajectory component
pub const LEARNING_MOMENTUM: &str = "learning_momentum";

/// Every component in weight-table order
pub const COMPONENTS: [&str; 5] = [
    SKILL_STRENGTH,
    GITHUB_ACTIVITY,
    PORTFOLIO_QUALITY,
    EXPERIENCE_DEPTH,
    LEARNING_MOMENTUM,
];

/// Component name to weight
pub type Weights = BTreeMap<String, f64>;

/// Weights tuned for junior frontend developers
pub fn default_weights() -> Weights {
    [
        (SKILL_STRENGTH, 0.35),
        (GITHUB_ACTIVITY, 0.25),
        (PORTFOLIO_QUALITY, 0.20),
        (EXPERIENCE_DEPTH, 0.15),
        (LEARNING_MOMENTUM, 0.05),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Human-readable component name
pub fn component_label(component: &str) -> &'static str {
    match component {
        SKILL_STRENGTH => "Technical Skills",
        GITHUB_ACTIVITY => "GitHub Activity",
        PORTFOLIO_QUALITY => "Portfolio Quality",
        EXPERIENCE_DEPTH => "Experience",
        LEARNING_MOMENTUM => "Learning Momentum",
        _ => "Other",
    }
}

/// Overall classification bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Below 0.35
    #[serde(rename = "Early Stage")]
    EarlyStage,
    /// At least 0.35
    #[serde(rename = "Developing")]
    Developing,
    /// At least 0.50
    #[serde(rename = "Competent")]
    Competent,
    /// At least 0.70
    #[serde(rename = "Strong Junior")]
    StrongJunior,
}

impl Tier {
    /// Tier for an overall score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.70 {
            Self::StrongJunior
        } else if score >= 0.50 {
            Self::Competent
        } else if score >= 0.35 {
            Self::Developing
        } else {
            Self::EarlyStage
        }
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Self::StrongJunior => "Strong Junior",
            Self::Competent => "Competent",
            Self::Developing => "Developing",
            Self::EarlyStage => "Early Stage",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Score, rubric level and details for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    /// Score in [0, 1]
    pub score: f64,
    /// Rubric level name
    pub level: String,
    /// Scorer-specific details
    pub details: Value,
}

impl ComponentScore {
    fn new(score: f64, level: &str, details: Value) -> Self {
        Self {
            score: round3(score),
            level: level.to_string(),
            details,
        }
    }
}

struct SkillTier {
    name: &'static str,
    skills: &'static [&'static str],
    weight: f64,
}

const SKILL_TIERS: [SkillTier; 7] = [
    SkillTier { name: "essential", skills: &["html", "css", "javascript"], weight: 1.0 },
    SkillTier { name: "framework", skills: &["react", "vue", "angular", "svelte"], weight: 1.2 },
    SkillTier {
        name: "modern_css",
        skills: &["tailwind", "sass", "styled-components", "bootstrap"],
        weight: 0.8,
    },
    SkillTier { name: "typescript", skills: &["typescript"], weight: 1.3 },
    SkillTier { name: "tooling", skills: &["git", "npm", "webpack", "vite"], weight: 0.7 },
    SkillTier {
        name: "testing",
        skills: &["jest", "cypress", "react-testing-library", "vitest"],
        weight: 1.1,
    },
    SkillTier {
        name: "bonus",
        skills: &["next.js", "graphql", "rest-api", "accessibility", "responsive-design", "figma"],
        weight: 0.9,
    },
];

const SKILL_LEVELS: [(f64, &str); 4] = [(0.70, "strong"), (0.50, "solid"), (0.30, "developing"), (0.0, "beginner")];
const GITHUB_LEVELS: [(f64, &str); 4] = [(0.60, "active"), (0.40, "regular"), (0.20, "occasional"), (0.0, "minimal")];
const PORTFOLIO_LEVELS: [(f64, &str); 4] = [(0.70, "impressive"), (0.45, "good"), (0.25, "basic"), (0.0, "minimal")];
const EXPERIENCE_LEVELS: [(f64, &str); 4] = [(0.60, "experienced"), (0.35, "some"), (0.15, "early"), (0.0, "new")];

fn level_for(score: f64, table: &[(f64, &'static str)]) -> &'static str {
    table
        .iter()
        .find(|(min, _)| score >= *min)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

/// Rounds to three decimals
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Collects lowercase skill names from a list, an `all_skills` object or an
/// object of category lists
pub fn extract_skills(value: &Value) -> Vec<String> {
    fn strings(list: &[Value]) -> impl Iterator<Item = String> + '_ {
        list.iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |s: String| {
        if seen.insert(s.clone()) {
            out.push(s);
        }
    };
    match value {
        Value::Array(list) => strings(list).for_each(&mut push),
        Value::Object(map) => match map.get("all_skills").and_then(Value::as_array) {
            Some(list) => strings(list).for_each(&mut push),
            None => map
                .values()
                .filter_map(Value::as_array)
                .for_each(|list| strings(list).for_each(&mut push)),
        },
        _ => {}
    }
    out
}

/// Scores a skill list against the weighted skill tiers
pub fn skill_score(skills: &[String]) -> ComponentScore {
    if skills.is_empty() {
        return ComponentScore::new(0.15, "beginner", json!({ "message": "No skills detected" }));
    }
    let owned: BTreeSet<String> = skills.iter().map(|s| s.to_lowercase()).collect();

    let mut total_weight = 0.0;
    let mut earned = 0.0;
    let mut matched = serde_json::Map::new();
    let mut missing_important = Vec::new();
    for tier in &SKILL_TIERS {
        let hits: Vec<&str> = tier.skills.iter().copied().filter(|s| owned.contains(*s)).collect();
        total_weight += tier.weight;
        earned += hits.len() as f64 / tier.skills.len() as f64 * tier.weight;
        if matches!(tier.name, "essential" | "framework" | "typescript") {
            missing_important.extend(tier.skills.iter().filter(|s| !owned.contains(**s)).take(2).copied());
        }
        matched.insert(tier.name.to_string(), json!(hits));
    }
    let score = (earned / total_weight).clamp(0.1, 0.95);
    missing_important.truncate(5);

    let recommendation = if score >= 0.7 {
        "Strong skill set! Consider adding testing or TypeScript to stand out.".to_string()
    } else if score >= 0.5 {
        let focus = if missing_important.is_empty() {
            "TypeScript, testing".to_string()
        } else {
            missing_important.iter().take(3).copied().collect::<Vec<_>>().join(", ")
        };
        format!("Good foundation. Focus on learning: {}", focus)
    } else {
        "Build your core skills: HTML, CSS, JavaScript, then learn React.".to_string()
    };

    ComponentScore::new(
        score,
        level_for(score, &SKILL_LEVELS),
        json!({
            "matched_skills": matched,
            "total_skills": owned.len(),
            "missing_important": missing_important,
            "recommendation": recommendation,
        }),
    )
}

fn field_f64(data: &Value, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn field_bool(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn has_data(data: &Value) -> bool {
    data.as_object().map_or(false, |m| !m.is_empty() && !m.contains_key("error"))
}

/// Scores repository metrics (`public_repos`, `total_stars`,
/// `recent_active_repos`, `contributions_last_year`)
pub fn github_score(data: &Value) -> ComponentScore {
    if !has_data(data) {
        return ComponentScore::new(0.1, "minimal", json!({ "message": "No GitHub data available" }));
    }
    let repos = field_f64(data, "public_repos");
    let stars = field_f64(data, "total_stars");
    let recent = field_f64(data, "recent_active_repos");
    let contributions = field_f64(data, "contributions_last_year");

    let score = ((repos / 10.0).min(1.0) * 0.25
        + (stars / 20.0).min(1.0) * 0.20
        + (recent / 5.0).min(1.0) * 0.30
        + (contributions / 200.0).min(1.0) * 0.25)
        .clamp(0.05, 0.95);

    let recommendation = if score >= 0.6 {
        "Great GitHub presence! Keep contributing consistently."
    } else if repos < 5.0 {
        "Create more public repositories showcasing your projects."
    } else if recent < 3.0 {
        "Increase your recent activity - aim for weekly commits."
    } else {
        "Good start! Focus on quality projects with good READMEs."
    };

    ComponentScore::new(
        score,
        level_for(score, &GITHUB_LEVELS),
        json!({
            "repos": repos,
            "stars": stars,
            "recent_active": recent,
            "contributions": contributions,
            "recommendation": recommendation,
        }),
    )
}

/// Scores portfolio metadata (`quality_score`, `project_count`, `has_projects`,
/// `has_descriptions`, `has_live_demos`, `has_code_links`)
pub fn portfolio_score(data: &Value) -> ComponentScore {
    if !has_data(data) {
        return ComponentScore::new(0.1, "minimal", json!({ "message": "No portfolio data" }));
    }
    let project_count = field_f64(data, "project_count");
    let has_projects = field_bool(data, "has_projects") || project_count > 0.0;
    let has_live_demos = field_bool(data, "has_live_demos");
    let has_code_links = field_bool(data, "has_code_links");

    let mut score = data.get("quality_score").and_then(Value::as_f64).unwrap_or(0.3);
    if has_projects && project_count >= 3.0 {
        score += 0.1;
    }
    if field_bool(data, "has_descriptions") {
        score += 0.1;
    }
    if has_live_demos {
        score += 0.15;
    }
    if has_code_links {
        score += 0.1;
    }
    let score = score.clamp(0.1, 0.95);

    let recommendation = if score >= 0.7 {
        "Impressive portfolio! Consider adding case studies."
    } else if !has_live_demos {
        "Add live demos to your projects - this is crucial for juniors."
    } else if project_count < 3.0 {
        "Build 2-3 more polished projects to showcase your skills."
    } else {
        "Improve project descriptions and add screenshots/videos."
    };

    ComponentScore::new(
        score,
        level_for(score, &PORTFOLIO_LEVELS),
        json!({
            "project_count": project_count,
            "has_live_demos": has_live_demos,
            "has_code_links": has_code_links,
            "recommendation": recommendation,
        }),
    )
}

/// Scores years of experience on the zero-to-two-year junior scale
pub fn experience_score(years: f64) -> ComponentScore {
    let years = if years.is_finite() { years.max(0.0) } else { 0.0 };
    let score = if years >= 2.0 {
        0.85
    } else if years >= 1.5 {
        0.70
    } else if years >= 1.0 {
        0.55
    } else if years >= 0.5 {
        0.35
    } else if years > 0.0 {
        0.20
    } else {
        0.10
    };

    let recommendation = if years >= 1.5 {
        "Good experience level. Document your achievements with metrics."
    } else if years >= 0.5 {
        "Keep building experience through projects and freelance work."
    } else {
        "Focus on learning and building projects to gain experience."
    };

    ComponentScore::new(
        score,
        level_for(score, &EXPERIENCE_LEVELS),
        json!({ "years": years, "recommendation": recommendation }),
    )
}

/// Momentum derived from the repository-activity score
pub fn learning_momentum(github: f64) -> f64 {
    if github > 0.3 {
        (0.3 + github * 0.5).min(0.9)
    } else {
        0.5
    }
}

/// One component's contribution to the overall score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentBreakdown {
    /// Component score before weighting
    pub raw_score: f64,
    /// Weight applied
    pub weight: f64,
    /// raw_score × weight
    pub weighted: f64,
    /// Rubric level
    pub level: String,
    /// Scorer details
    pub details: Value,
}

/// Overall score with its per-component breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Weighted sum clamped to [0.1, 0.95]
    pub overall_score: f64,
    /// Tier of the overall score
    pub tier: Tier,
    /// Per-component contributions
    pub breakdown: BTreeMap<String, ComponentBreakdown>,
    /// Weight table used
    pub weights_used: Weights,
}

impl ScoreBreakdown {
    /// Raw score per component
    pub fn raw_scores(&self) -> BTreeMap<String, f64> {
        self.breakdown.iter().map(|(k, c)| (k.clone(), c.raw_score)).collect()
    }
}

fn default_component(component: &str) -> ComponentScore {
    match component {
        SKILL_STRENGTH => ComponentScore::new(0.3, "beginner", json!({})),
        LEARNING_MOMENTUM => ComponentScore::new(0.5, "n/a", json!({})),
        EXPERIENCE_DEPTH => ComponentScore::new(0.2, "new", json!({})),
        _ => ComponentScore::new(0.2, "minimal", json!({})),
    }
}

/// Folds component scores with `weights` into an overall score
///
/// Components missing from `scores` use conservative defaults; components
/// missing from `weights` contribute nothing.
pub fn compute_overall(scores: &BTreeMap<String, ComponentScore>, weights: &Weights) -> ScoreBreakdown {
    let breakdown: BTreeMap<String, ComponentBreakdown> = COMPONENTS
        .iter()
        .map(|&name| {
            let component = scores.get(name).cloned().unwrap_or_else(|| default_component(name));
            let weight = weights.get(name).copied().unwrap_or(0.0);
            (
                name.to_string(),
                ComponentBreakdown {
                    raw_score: component.score,
                    weight,
                    weighted: (component.score * weight * 10_000.0).round() / 10_000.0,
                    level: component.level,
                    details: component.details,
                },
            )
        })
        .collect();

    let overall = round3(breakdown.values().map(|c| c.weighted).sum::<f64>().clamp(0.1, 0.95));
    ScoreBreakdown {
        overall_score: overall,
        tier: Tier::from_score(overall),
        breakdown,
        weights_used: weights.clone(),
    }
}

/// A prioritised improvement suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    /// 1 is most urgent
    pub priority: u8,
    /// Area to work on
    pub area: String,
    /// Concrete action
    pub action: String,
    /// Expected impact
    pub impact: String,
    /// Rough time to complete
    pub time_estimate: String,
}

impl Improvement {
    fn new(priority: u8, area: &str, action: &str, impact: &str, time_estimate: &str) -> Self {
        Self {
            priority,
            area: area.to_string(),
            action: action.to_string(),
            impact: impact.to_string(),
            time_estimate: time_estimate.to_string(),
        }
    }
}

/// Suggestions for components under their thresholds, most urgent first
pub fn generate_improvements(scores: &BTreeMap<String, f64>) -> Vec<Improvement> {
    let below = |k: &str, t: f64| scores.get(k).map_or(false, |s| *s < t);
    let mut out = Vec::new();
    if below(SKILL_STRENGTH, 0.5) {
        out.push(Improvement::new(1, "Skills", "Learn TypeScript and a testing framework (Jest)", "high", "2-4 weeks"));
    }
    if below(GITHUB_ACTIVITY, 0.4) {
        out.push(Improvement::new(2, "GitHub", "Commit code daily and build 2-3 public projects", "high", "1-2 months"));
    }
    if below(PORTFOLIO_QUALITY, 0.45) {
        out.push(Improvement::new(
            3,
            "Portfolio",
            "Create 3 polished projects with live demos and documentation",
            "medium",
            "3-6 weeks",
        ));
    }
    if below(EXPERIENCE_DEPTH, 0.4) {
        out.push(Improvement::new(
            4,
            "Experience",
            "Take on freelance projects or contribute to open source",
            "medium",
            "ongoing",
        ));
    }
    if out.is_empty() {
        out.push(Improvement::new(
            1,
            "Growth",
            "You are doing great! Consider learning Next.js or advanced React patterns",
            "medium",
            "2-4 weeks",
        ));
    }
    out
}

/// Reference distribution of overall scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    /// Percentile to overall score
    pub percentiles: BTreeMap<u32, f64>,
    /// Average hourly rate of the cohort
    pub avg_rate: f64,
    /// Skills most requested for the cohort
    pub in_demand_skills: Vec<String>,
}

impl Default for Cohort {
    fn default() -> Self {
        Self {
            percentiles: [(10, 0.25), (25, 0.35), (50, 0.50), (75, 0.65), (90, 0.78)].into_iter().collect(),
            avg_rate: 35.0,
            in_demand_skills: ["react", "javascript", "typescript", "tailwind", "git"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Suggested hourly rate band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSuggestion {
    /// Suggested rate
    pub suggested_rate: f64,
    /// Band name
    pub range: String,
    /// Lower end of the band
    pub min: f64,
    /// Upper end of the band
    pub max: f64,
}

/// Position of one score inside a cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Largest cohort percentile whose score is at or below the user's
    pub user_percentile: u32,
    /// Tier label for the percentile
    pub tier: String,
    /// Percentile table used
    pub benchmark_percentiles: BTreeMap<u32, f64>,
    /// Cohort average rate
    pub avg_rate: f64,
    /// Rate band suggestion
    pub rate_suggestion: RateSuggestion,
    /// High-value in-demand skills the user lacks
    pub skill_gaps: Vec<String>,
}

/// Places `score` inside `cohort`
pub fn benchmark(score: f64, user_skills: &[String], cohort: &Cohort) -> BenchmarkResult {
    let user_percentile = cohort
        .percentiles
        .iter()
        .filter(|(_, v)| score >= **v)
        .map(|(p, _)| *p)
        .max()
        .unwrap_or(0);

    let tier = match user_percentile {
        p if p >= 90 => "Top Performer",
        p if p >= 75 => "Strong",
        p if p >= 50 => "Competitive",
        p if p >= 25 => "Developing",
        _ => "Early Stage",
    };

    let (multiplier, range) = if score >= 0.7 {
        (1.3, "premium")
    } else if score >= 0.55 {
        (1.1, "above average")
    } else if score >= 0.4 {
        (1.0, "market rate")
    } else {
        (0.8, "entry level")
    };
    let suggested = (cohort.avg_rate * multiplier).round();

    let owned: BTreeSet<String> = user_skills.iter().map(|s| s.to_lowercase()).collect();
    let skill_gaps = ["typescript", "react", "next.js", "tailwind", "jest"]
        .into_iter()
        .filter(|s| cohort.in_demand_skills.iter().any(|d| d == s) && !owned.contains(*s))
        .map(String::from)
        .collect();

    BenchmarkResult {
        user_percentile,
        tier: tier.to_string(),
        benchmark_percentiles: cohort.percentiles.clone(),
        avg_rate: cohort.avg_rate,
        rate_suggestion: RateSuggestion {
            suggested_rate: suggested,
            range: range.to_string(),
            min: (suggested * 0.85).round(),
            max: (suggested * 1.15).round(),
        },
        skill_gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn skills(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::from_score(0.70), Tier::StrongJunior);
        assert_eq!(Tier::from_score(0.6999), Tier::Competent);
        assert_eq!(Tier::from_score(0.50), Tier::Competent);
        assert_eq!(Tier::from_score(0.35), Tier::Developing);
        assert_eq!(Tier::from_score(0.349), Tier::EarlyStage);
        assert_eq!(serde_json::to_value(Tier::StrongJunior).unwrap(), json!("Strong Junior"));
    }

    #[test]
    fn test_skill_score() {
        assert_eq!(skill_score(&[]).score, 0.15);

        // essential 1.0 + framework 0.25·1.2 + typescript 1.3 over a total weight of 7.0
        let s = skill_score(&skills(&["HTML", "css", "javascript", "react", "typescript"]));
        assert!((s.score - round3(2.6 / 7.0)).abs() < 1e-9);
        assert_eq!(s.level, "developing");
        assert_eq!(s.details["matched_skills"]["framework"], json!(["react"]));
    }

    #[test]
    fn test_extract_skills_shapes() {
        assert_eq!(extract_skills(&json!(["React", " git ", "react"])), skills(&["react", "git"]));
        assert_eq!(extract_skills(&json!({ "all_skills": ["Vue"] })), skills(&["vue"]));
        assert_eq!(extract_skills(&json!({ "frontend": ["css"], "tools": ["npm"] })), skills(&["css", "npm"]));
        assert!(extract_skills(&json!(42)).is_empty());
    }

    #[test]
    fn test_github_score() {
        assert_eq!(github_score(&Value::Null).score, 0.1);
        assert_eq!(github_score(&json!({ "error": "rate limited" })).score, 0.1);

        let g = github_score(&json!({
            "public_repos": 10, "total_stars": 20, "recent_active_repos": 5, "contributions_last_year": 400
        }));
        assert_eq!(g.score, 0.95);
        assert_eq!(g.level, "active");

        let g = github_score(&json!({ "public_repos": 2 }));
        assert_eq!(g.score, 0.05);
        assert_eq!(g.level, "minimal");
    }

    #[test]
    fn test_portfolio_score() {
        let p = portfolio_score(&json!({
            "project_count": 4, "has_descriptions": true, "has_live_demos": true, "has_code_links": false
        }));
        assert_eq!(p.score, 0.65);
        assert_eq!(p.level, "good");
        assert_eq!(portfolio_score(&json!({})).score, 0.1);
    }

    #[test_case(3.0, 0.85, "experienced" ; "over two years")]
    #[test_case(1.5, 0.70, "experienced" ; "eighteen months")]
    #[test_case(1.0, 0.55, "some" ; "one year")]
    #[test_case(0.5, 0.35, "some" ; "six months")]
    #[test_case(0.1, 0.20, "early" ; "a few weeks")]
    #[test_case(0.0, 0.10, "new" ; "none")]
    #[test_case(-1.0, 0.10, "new" ; "negative input")]
    fn test_experience_score(years: f64, expected: f64, level: &str) {
        let s = experience_score(years);
        assert_eq!(s.score, expected);
        assert_eq!(s.level, level);
    }

    #[test]
    fn test_compute_overall() {
        let scores: BTreeMap<String, ComponentScore> = [
            (SKILL_STRENGTH, ComponentScore::new(0.8, "strong", json!({}))),
            (GITHUB_ACTIVITY, ComponentScore::new(0.6, "active", json!({}))),
            (PORTFOLIO_QUALITY, ComponentScore::new(0.5, "good", json!({}))),
            (EXPERIENCE_DEPTH, ComponentScore::new(0.6, "experienced", json!({}))),
            (LEARNING_MOMENTUM, ComponentScore::new(0.6, "n/a", json!({}))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let result = compute_overall(&scores, &default_weights());
        // 0.28 + 0.15 + 0.10 + 0.09 + 0.03
        assert!((result.overall_score - 0.65).abs() < 1e-9);
        assert_eq!(result.tier, Tier::Competent);
        assert_eq!(result.breakdown.len(), 5);
    }

    #[test]
    fn test_overall_is_clamped_and_defaults_fill_in() {
        let result = compute_overall(&BTreeMap::new(), &default_weights());
        // 0.3·0.35 + 0.2·0.25 + 0.2·0.20 + 0.2·0.15 + 0.5·0.05
        assert!((result.overall_score - 0.25).abs() < 1e-9);
        assert_eq!(result.tier, Tier::EarlyStage);
    }

    #[test]
    fn test_improvements() {
        let scores: BTreeMap<String, f64> =
            [(SKILL_STRENGTH, 0.4), (GITHUB_ACTIVITY, 0.6), (PORTFOLIO_QUALITY, 0.3), (EXPERIENCE_DEPTH, 0.5)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        let areas: Vec<String> = generate_improvements(&scores).into_iter().map(|i| i.area).collect();
        assert_eq!(areas, vec!["Skills", "Portfolio"]);

        let strong: BTreeMap<String, f64> = COMPONENTS.iter().map(|c| (c.to_string(), 0.9)).collect();
        assert_eq!(generate_improvements(&strong)[0].area, "Growth");
    }

    #[test]
    fn test_benchmark() {
        let cohort = Cohort::default();
        let b = benchmark(0.66, &skills(&["react"]), &cohort);
        assert_eq!(b.user_percentile, 75);
        assert_eq!(b.tier, "Strong");
        assert_eq!(b.rate_suggestion.suggested_rate, 39.0);
        assert_eq!(b.rate_suggestion.range, "above average");
        assert_eq!(b.skill_gaps, skills(&["typescript", "tailwind"]));

        let low = benchmark(0.2, &[], &cohort);
        assert_eq!(low.user_percentile, 0);
        assert_eq!(low.tier, "Early Stage");
        assert_eq!(low.rate_suggestion.suggested_rate, 28.0);
    }
}
