//! Human-readable explanations of a scored profile.

use serde::{Deserialize, Serialize};

use crate::scoring::{self, BenchmarkResult, Improvement, ScoreBreakdown, Tier};

/// Confidence assumed when no judge confidence is available
pub const DEFAULT_CONFIDENCE: f64 = 0.85;

/// How much a component's weight moves the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    /// Weight ≥ 0.25
    High,
    /// Weight ≥ 0.15
    Medium,
    /// Anything lighter
    Low,
}

impl Impact {
    fn from_weight(weight: f64) -> Self {
        if weight >= 0.25 {
            Self::High
        } else if weight >= 0.15 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One component line of the explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentExplanation {
    pub component: String,
    pub label: String,
    pub score: f64,
    pub weight: f64,
    pub contribution: f64,
    pub level: String,
    pub explanation: String,
    pub impact: Impact,
}

/// A "what if" improvement scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterfactual {
    pub component: String,
    pub label: String,
    pub scenario: String,
    pub current_component_score: f64,
    pub new_component_score: f64,
    pub current_total: f64,
    pub new_total: f64,
    /// Gain in overall score
    pub improvement: f64,
    pub action: String,
}

/// Full explanation of one score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    /// Components by contribution, largest first
    pub detailed_breakdown: Vec<ComponentExplanation>,
    pub key_factors: Vec<String>,
    /// At most five, largest gain first
    pub counterfactuals: Vec<Counterfactual>,
    pub confidence_explanation: String,
}

fn pct(x: f64) -> i64 {
    (x * 100.0) as i64
}

fn tier_description(tier: Tier) -> &'static str {
    match tier {
        Tier::StrongJunior => "You have a strong foundation and are ready for junior developer roles.",
        Tier::Competent => "You have solid skills and are close to being job-ready.",
        Tier::Developing => "You are building good habits and making progress.",
        Tier::EarlyStage => "You are just starting your journey - focus on fundamentals.",
    }
}

fn component_text(component: &str, level: &str) -> String {
    let text = match (component, level) {
        (scoring::SKILL_STRENGTH, "strong") => {
            "Excellent technical skills! You have a strong foundation in modern frontend technologies."
        }
        (scoring::SKILL_STRENGTH, "solid") => "Good skill set. Consider adding TypeScript or testing to stand out.",
        (scoring::SKILL_STRENGTH, "developing") => {
            "Building your skills. Focus on mastering React and JavaScript fundamentals."
        }
        (scoring::SKILL_STRENGTH, "beginner") => "Just starting out. Learn HTML, CSS, and JavaScript basics first.",
        (scoring::GITHUB_ACTIVITY, "active") => "Great GitHub presence! Your consistent activity shows dedication.",
        (scoring::GITHUB_ACTIVITY, "regular") => "Good activity level. Try to commit more frequently.",
        (scoring::GITHUB_ACTIVITY, "occasional") => "Some GitHub activity. Aim for daily commits to build momentum.",
        (scoring::GITHUB_ACTIVITY, "minimal") => {
            "Limited GitHub activity. Start pushing code regularly to showcase your work."
        }
        (scoring::PORTFOLIO_QUALITY, "impressive") => {
            "Impressive portfolio! Your projects demonstrate real-world skills."
        }
        (scoring::PORTFOLIO_QUALITY, "good") => "Good portfolio. Add live demos and detailed case studies.",
        (scoring::PORTFOLIO_QUALITY, "basic") => "Basic portfolio. Build 2-3 more polished projects.",
        (scoring::PORTFOLIO_QUALITY, "minimal") => {
            "Portfolio needs work. Create projects with live demos and documentation."
        }
        (scoring::EXPERIENCE_DEPTH, "experienced") => "Good experience level for a junior developer.",
        (scoring::EXPERIENCE_DEPTH, "some") => "Building experience. Keep working on projects.",
        (scoring::EXPERIENCE_DEPTH, "early") => "Early in your journey. Focus on learning and building.",
        (scoring::EXPERIENCE_DEPTH, "new") => "Just starting. Everyone begins somewhere - keep going!",
        _ => return format!("Your {} is at the {} level.", component.replace('_', " "), level),
    };
    text.to_string()
}

fn improvement_action(component: &str, step: f64) -> &'static str {
    let idx = if step <= 0.1 {
        0
    } else if step <= 0.2 {
        1
    } else {
        2
    };
    let actions: [&str; 3] = match component {
        scoring::SKILL_STRENGTH => [
            "Learn one new technology (e.g., TypeScript)",
            "Master a testing framework and TypeScript",
            "Add TypeScript, testing, and a CSS framework",
        ],
        scoring::GITHUB_ACTIVITY => [
            "Commit code 3-4 times per week",
            "Create 2-3 new public repositories",
            "Maintain daily commits and contribute to open source",
        ],
        scoring::PORTFOLIO_QUALITY => [
            "Add live demos to existing projects",
            "Build one polished project with documentation",
            "Create 3 portfolio projects with case studies",
        ],
        scoring::EXPERIENCE_DEPTH => [
            "Complete a few freelance projects",
            "Work on a substantial side project",
            "Gain 6+ months of practical experience",
        ],
        _ => [
            "Make small improvements",
            "Make moderate improvements",
            "Make significant improvements",
        ],
    };
    actions[idx]
}

/// Explains `score`, optionally placed in a cohort and annotated with the
/// judge's confidence
pub fn explain(
    score: &ScoreBreakdown,
    benchmark: Option<&BenchmarkResult>,
    judge_confidence: Option<f64>,
) -> Explanation {
    Explanation {
        summary: summary(score, benchmark),
        detailed_breakdown: detailed_breakdown(score),
        key_factors: key_factors(score),
        counterfactuals: counterfactuals(score),
        confidence_explanation: confidence_text(judge_confidence.unwrap_or(DEFAULT_CONFIDENCE)),
    }
}

fn summary(score: &ScoreBreakdown, benchmark: Option<&BenchmarkResult>) -> String {
    let percentile = match benchmark.map(|b| b.user_percentile) {
        Some(p) if p >= 75 => format!(" You're in the top {}% of junior frontend developers!", 100 - p),
        Some(p) if p >= 50 => format!(" You're above average, ranking at the {}th percentile.", p),
        Some(p) => format!(" You're at the {}th percentile - there's room to grow.", p),
        None => String::new(),
    };
    format!(
        "Your overall score is {}% ({} tier). {}{}",
        pct(score.overall_score),
        score.tier,
        tier_description(score.tier),
        percentile
    )
}

fn detailed_breakdown(score: &ScoreBreakdown) -> Vec<ComponentExplanation> {
    let mut lines: Vec<ComponentExplanation> = score
        .breakdown
        .iter()
        .map(|(component, c)| ComponentExplanation {
            component: component.clone(),
            label: scoring::component_label(component).to_string(),
            score: c.raw_score,
            weight: c.weight,
            contribution: c.weighted,
            level: c.level.clone(),
            explanation: component_text(component, &c.level),
            impact: Impact::from_weight(c.weight),
        })
        .collect();
    lines.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
    lines
}

fn key_factors(score: &ScoreBreakdown) -> Vec<String> {
    let mut ranked: Vec<(&String, f64, f64)> = score
        .breakdown
        .iter()
        .map(|(k, c)| (k, c.raw_score, c.weight))
        .collect();
    if ranked.is_empty() {
        return vec!["Unable to identify key factors".to_string()];
    }
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut factors = Vec::new();
    if let (Some(high), Some(low)) = (ranked.first(), ranked.last()) {
        factors.push(format!(
            "Your strongest area is {} ({}%)",
            scoring::component_label(high.0),
            pct(high.1)
        ));
        factors.push(format!(
            "Your biggest opportunity for improvement is {} ({}%)",
            scoring::component_label(low.0),
            pct(low.1)
        ));
    }
    for (component, raw, weight) in &ranked {
        if *weight >= 0.25 && *raw < 0.5 {
            factors.push(format!(
                "{} has high weight ({}%) but low score - focus here for maximum impact",
                scoring::component_label(component),
                pct(*weight)
            ));
        }
    }
    factors.truncate(5);
    factors
}

// Gains at or under this are not worth showing; the slack absorbs float noise
const MIN_GAIN: f64 = 0.02 + 1e-9;

fn counterfactuals(score: &ScoreBreakdown) -> Vec<Counterfactual> {
    const STEPS: [(f64, &str); 3] = [
        (0.1, "small improvement"),
        (0.2, "moderate improvement"),
        (0.3, "significant improvement"),
    ];
    let current = score.overall_score;
    let mut out: Vec<Counterfactual> = score
        .breakdown
        .iter()
        .filter(|(_, c)| c.raw_score < 0.8)
        .filter_map(|(component, c)| {
            let (step, description) = STEPS.iter().find(|(step, _)| step * c.weight > MIN_GAIN)?;
            let gain = step * c.weight;
            let label = scoring::component_label(component);
            Some(Counterfactual {
                component: component.clone(),
                label: label.to_string(),
                scenario: format!("If you made a {} in {}", description, label),
                current_component_score: c.raw_score,
                new_component_score: (c.raw_score + step).min(1.0),
                current_total: current,
                new_total: scoring::round3(current + gain),
                improvement: scoring::round3(gain),
                action: improvement_action(component, *step).to_string(),
            })
        })
        .collect();
    out.sort_by(|a, b| b.improvement.total_cmp(&a.improvement));
    out.truncate(5);
    out
}

fn confidence_text(confidence: f64) -> String {
    let p = pct(confidence);
    if confidence >= 0.9 {
        format!("High confidence evaluation ({}%). The data provided was comprehensive and consistent.", p)
    } else if confidence >= 0.8 {
        format!("Good confidence ({}%). The evaluation is reliable based on the available data.", p)
    } else if confidence >= 0.7 {
        format!(
            "Moderate confidence ({}%). Some data may be incomplete. Consider adding more information.",
            p
        )
    } else {
        format!(
            "Lower confidence ({}%). The evaluation may improve with more complete data (GitHub, portfolio, etc.).",
            p
        )
    }
}

/// One-paragraph rendering of an improvement suggestion
pub fn explain_recommendation(improvement: &Improvement) -> String {
    let impact = match improvement.impact.as_str() {
        "high" => "This will significantly improve your profile.",
        "medium" => "This will noticeably improve your profile.",
        "low" => "This is a nice-to-have improvement.",
        _ => "",
    };
    format!(
        "**{}**: {}\n\n{} Estimated time: {}.",
        improvement.area, improvement.action, impact, improvement.time_estimate
    )
}
