//! Append-only case memory.
//!
//! Every decision an agent makes can be stored with the context it was made
//! in. A human review later attaches an outcome, exactly once. Stored cases
//! are searchable by similarity and feed accuracy and learning statistics.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::{AgentError, Result};

/// Human review outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The decision was accepted as is
    Approved,
    /// The decision was wrong
    Rejected,
    /// The decision was corrected by the reviewer
    Modified,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Modified => "modified",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Outcome {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "modified" => Ok(Self::Modified),
            other => Err(AgentError::Validation(format!("unknown outcome '{}'", other))),
        }
    }
}

/// One stored decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Entry id
    pub id: String,
    /// Agent that made the decision
    pub agent_id: String,
    /// Snapshot of the input context
    pub context: Value,
    /// The decision itself
    pub decision: Value,
    /// Confidence reported with the decision
    pub confidence: f64,
    /// Time the decision was stored
    pub created_at: DateTime<Utc>,
    /// Review outcome, set at most once
    pub outcome: Option<Outcome>,
    /// Reviewer feedback attached with the outcome
    pub feedback: Option<Value>,
    /// Time the outcome was recorded
    pub outcome_recorded_at: Option<DateTime<Utc>>,
}

/// A stored case and how close it is to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarCase {
    /// Similarity in [0, 1]
    pub similarity: f64,
    /// The stored entry
    pub entry: MemoryEntry,
}

/// Review statistics for one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    /// Agent the report is about
    pub agent_id: String,
    /// Entries with a recorded outcome
    pub total_reviewed: usize,
    /// Approved outcomes
    pub approved: usize,
    /// Rejected outcomes
    pub rejected: usize,
    /// Modified outcomes
    pub modified: usize,
    /// approved / reviewed, zero without reviews
    pub accuracy: f64,
    /// Same as accuracy; kept for downstream readers
    pub approval_rate: f64,
    /// rejected / reviewed
    pub rejection_rate: f64,
}

/// Patterns found among rejected and modified cases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningInsights {
    /// Agent the insights are about
    pub agent_id: String,
    /// Problematic cases examined
    pub sample_size: usize,
    /// Counts such as `tier_Early Stage` or `low_experience`
    pub patterns: BTreeMap<String, usize>,
    /// Reasons collected from reviewer feedback
    pub disagreement_reasons: Vec<String>,
    /// Suggested rubric reviews
    pub recommendations: Vec<String>,
}

/// Store-wide counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Entries stored
    pub total_entries: usize,
    /// Entries carrying an outcome
    pub reviewed_entries: usize,
    /// Entries per agent
    pub per_agent: BTreeMap<String, usize>,
    /// Outcome histogram
    pub outcomes: BTreeMap<String, usize>,
    /// Oldest entry time
    pub oldest: Option<DateTime<Utc>>,
    /// Newest entry time
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryInner {
    entries: Vec<MemoryEntry>,
    index: HashMap<String, usize>,
}

/// Case store shared across jobs
pub struct AgentMemory {
    inner: RwLock<MemoryInner>,
    config: MemoryConfig,
}

impl AgentMemory {
    /// Creates an empty store
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            config,
        }
    }

    /// Stores a decision and returns the new entry id
    pub fn store_interaction(&self, agent_id: &str, context: Value, decision: Value, confidence: f64) -> String {
        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            context,
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
            outcome: None,
            feedback: None,
            outcome_recorded_at: None,
        };
        let id = entry.id.clone();
        let mut inner = self.inner.write();
        let position = inner.entries.len();
        inner.index.insert(id.clone(), position);
        inner.entries.push(entry);
        debug!("Stored interaction {} for {}", id, agent_id);
        id
    }

    /// Attaches a review outcome; fails when the entry is unknown or already reviewed
    pub fn record_outcome(&self, entry_id: &str, outcome: Outcome, feedback: Option<Value>) -> Result<()> {
        let mut inner = self.inner.write();
        let i = *inner
            .index
            .get(entry_id)
            .ok_or_else(|| AgentError::NotFound(format!("memory entry {}", entry_id)))?;
        let entry = &mut inner.entries[i];
        if entry.outcome.is_some() {
            warn!("Rejected second outcome for entry {}", entry_id);
            return Err(AgentError::AlreadyRecorded(entry_id.to_string()));
        }
        entry.outcome = Some(outcome);
        entry.feedback = feedback;
        entry.outcome_recorded_at = Some(Utc::now());
        info!("Recorded outcome {} for entry {}", outcome, entry_id);
        Ok(())
    }

    /// Fetches one entry
    pub fn get(&self, entry_id: &str) -> Option<MemoryEntry> {
        let inner = self.inner.read();
        inner.index.get(entry_id).map(|&i| inner.entries[i].clone())
    }

    /// Top `limit` stored cases ranked by similarity, most recent first on ties
    pub fn retrieve_similar_cases(&self, context: &Value, agent_id: Option<&str>, limit: usize) -> Vec<SimilarCase> {
        let inner = self.inner.read();
        let mut ranked: Vec<(usize, SimilarCase)> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| agent_id.map_or(true, |a| e.agent_id == a))
            .filter_map(|(i, e)| {
                let similarity = self.similarity(context, &e.context);
                (similarity >= self.config.similarity_floor).then(|| {
                    (i, SimilarCase { similarity, entry: e.clone() })
                })
            })
            .collect();
        // Same timestamp falls back to insertion position, later is more recent
        ranked.sort_by(|(ia, a), (ib, b)| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
                .then_with(|| ib.cmp(ia))
        });
        let mut cases: Vec<SimilarCase> = ranked.into_iter().map(|(_, c)| c).collect();
        cases.truncate(limit);
        cases
    }

    /// Mean of the available comparisons: skill overlap, experience distance
    /// and tier equality
    pub fn similarity(&self, a: &Value, b: &Value) -> f64 {
        let mut score = 0.0;
        let mut comparisons = 0u32;

        let skills_a = skill_set(a);
        let skills_b = skill_set(b);
        if !skills_a.is_empty() && !skills_b.is_empty() {
            let union = skills_a.union(&skills_b).count();
            let overlap = skills_a.intersection(&skills_b).count();
            score += overlap as f64 / union.max(1) as f64;
            comparisons += 1;
        }

        let exp_a = a.get("experience_years").and_then(Value::as_f64);
        let exp_b = b.get("experience_years").and_then(Value::as_f64);
        if let (Some(x), Some(y)) = (exp_a, exp_b) {
            let span = self.config.experience_span_years.max(f64::EPSILON);
            score += (1.0 - (x - y).abs() / span).max(0.0);
            comparisons += 1;
        }

        let tier_a = a.get("tier").and_then(Value::as_str);
        let tier_b = b.get("tier").and_then(Value::as_str);
        if let (Some(x), Some(y)) = (tier_a, tier_b) {
            if x == y {
                score += 1.0;
            }
            comparisons += 1;
        }

        if comparisons == 0 {
            0.0
        } else {
            score / f64::from(comparisons)
        }
    }

    /// approved / (approved + rejected + modified) over the agent's reviewed entries
    pub fn agent_accuracy(&self, agent_id: &str) -> AccuracyReport {
        let inner = self.inner.read();
        let mut report = AccuracyReport {
            agent_id: agent_id.to_string(),
            ..AccuracyReport::default()
        };
        for entry in inner.entries.iter().filter(|e| e.agent_id == agent_id) {
            match entry.outcome {
                Some(Outcome::Approved) => report.approved += 1,
                Some(Outcome::Rejected) => report.rejected += 1,
                Some(Outcome::Modified) => report.modified += 1,
                None => continue,
            }
            report.total_reviewed += 1;
        }
        if report.total_reviewed > 0 {
            let total = report.total_reviewed as f64;
            report.accuracy = report.approved as f64 / total;
            report.approval_rate = report.accuracy;
            report.rejection_rate = report.rejected as f64 / total;
        }
        report
    }

    /// Reviewed entries whose outcome was recorded at or after `cutoff`
    pub fn entries_with_outcomes_since(&self, cutoff: Option<DateTime<Utc>>) -> Vec<MemoryEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| match (e.outcome_recorded_at, cutoff) {
                (Some(at), Some(c)) => at >= c,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect()
    }

    /// Entries stored for an agent, oldest first
    pub fn entries_for_agent(&self, agent_id: &str) -> Vec<MemoryEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Patterns among the agent's rejected and modified cases
    pub fn learning_insights(&self, agent_id: &str) -> LearningInsights {
        let inner = self.inner.read();
        let problematic: Vec<&MemoryEntry> = inner
            .entries
            .iter()
            .rev()
            .filter(|e| e.agent_id == agent_id)
            .filter(|e| matches!(e.outcome, Some(Outcome::Rejected) | Some(Outcome::Modified)))
            .take(50)
            .collect();

        let mut insights = LearningInsights {
            agent_id: agent_id.to_string(),
            sample_size: problematic.len(),
            ..LearningInsights::default()
        };
        for entry in problematic {
            let tier = entry.context.get("tier").and_then(Value::as_str).unwrap_or("unknown");
            *insights.patterns.entry(format!("tier_{}", tier)).or_insert(0) += 1;
            let experience = entry.context.get("experience_years").and_then(Value::as_f64).unwrap_or(0.0);
            if experience < 1.0 {
                *insights.patterns.entry("low_experience".to_string()).or_insert(0) += 1;
            }
            if let Some(reasons) = entry
                .feedback
                .as_ref()
                .and_then(|f| f.get("disagreement_reasons"))
                .and_then(Value::as_array)
            {
                insights
                    .disagreement_reasons
                    .extend(reasons.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }

        if insights.patterns.get("low_experience").copied().unwrap_or(0) > 5 {
            insights
                .recommendations
                .push("Consider adjusting evaluation criteria for candidates with <1 year experience".to_string());
        }
        if insights.patterns.get("tier_Early Stage").copied().unwrap_or(0) > 5 {
            insights
                .recommendations
                .push("Early Stage tier evaluations are frequently modified - review rubrics".to_string());
        }
        insights
    }

    /// Store-wide counters
    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.read();
        let mut stats = MemoryStats {
            total_entries: inner.entries.len(),
            ..MemoryStats::default()
        };
        for entry in &inner.entries {
            *stats.per_agent.entry(entry.agent_id.clone()).or_insert(0) += 1;
            if let Some(outcome) = entry.outcome {
                stats.reviewed_entries += 1;
                *stats.outcomes.entry(outcome.to_string()).or_insert(0) += 1;
            }
        }
        stats.oldest = inner.entries.first().map(|e| e.created_at);
        stats.newest = inner.entries.last().map(|e| e.created_at);
        stats
    }

    /// Drops entries older than `days`; returns how many were removed
    pub fn clear_older_than(&self, days: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.created_at >= cutoff);
        let removed = before - inner.entries.len();
        inner.index = inner
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        if removed > 0 {
            info!("Removed {} memory entries older than {} days", removed, days);
        }
        removed
    }
}

impl Default for AgentMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

fn skill_set(context: &Value) -> HashSet<String> {
    context
        .get("skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
