//! Adaptive weight learning from human reviews.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::agents::ids::SCORE_AGGREGATOR;
use crate::config::LearningConfig;
use crate::events::{EventBus, EventType};
use crate::memory::{AgentMemory, MemoryEntry, Outcome};
use crate::scoring::{self, Weights};

/// A proposed change to one component weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightUpdate {
    /// Component name
    pub component: String,
    /// Weight when the proposal was made
    pub current_weight: f64,
    /// Weight after the change, clamped to the configured bounds
    pub proposed_weight: f64,
    /// proposed − current
    pub change: f64,
    /// Why the change is proposed
    pub reason: String,
    /// Proposal confidence, grows with the number of supporting reviews
    pub confidence: f64,
}

/// Audit record of one weight swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightChange {
    /// When the swap happened
    pub timestamp: DateTime<Utc>,
    /// Weights before
    pub old_weights: Weights,
    /// Weights after, summing to 1
    pub new_weights: Weights,
    /// Components whose proposals were applied
    pub updates_applied: Vec<String>,
    /// Reasons of the applied proposals
    pub reason: String,
}

/// A component where the user trails the cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusArea {
    /// Component name
    pub component: String,
    /// User's mean raw score
    pub user_mean: f64,
    /// Cohort mean raw score
    pub cohort_mean: f64,
    /// cohort_mean − user_mean
    pub gap: f64,
}

/// Direction of a user's overall score over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trajectory {
    /// Latest score above the earliest
    Improving,
    /// No measurable change
    Stable,
    /// Latest score below the earliest
    Declining,
}

/// Read-only focus recommendations for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personalization {
    /// User id
    pub user_id: String,
    /// False when the user has no scored history
    pub personalized: bool,
    /// Scored jobs considered
    pub history_len: usize,
    /// Components lagging the cohort, largest gap first, at most two
    pub focus_areas: Vec<FocusArea>,
    /// Latest minus earliest overall score
    pub score_change: f64,
    /// Score change per elapsed day
    pub daily_progress: f64,
    /// Direction of the overall score
    pub trajectory: Trajectory,
    /// Suggested next steps
    pub recommendations: Vec<String>,
}

/// Snapshot of learning activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSummary {
    /// Weights in use
    pub current_weights: Weights,
    /// Weight swaps recorded
    pub weight_updates: usize,
    /// Proposals waiting to be applied
    pub pending_updates: usize,
    /// Reviewed aggregator decisions per outcome
    pub review_counts: BTreeMap<String, usize>,
    /// Configured learning rate
    pub learning_rate: f64,
}

/// Proposes and applies scoring weight changes from reviewed decisions
pub struct AdaptiveLearner {
    config: LearningConfig,
    memory: Arc<AgentMemory>,
    bus: Option<Arc<EventBus>>,
    weights: RwLock<Weights>,
    pending: RwLock<Vec<WeightUpdate>>,
    history: RwLock<Vec<WeightChange>>,
}

fn breakdown(entry: &MemoryEntry) -> BTreeMap<String, f64> {
    entry
        .context
        .get("breakdown")
        .and_then(Value::as_object)
        .map(|m| m.iter().filter_map(|(k, v)| v.as_f64().map(|s| (k.clone(), s))).collect())
        .unwrap_or_default()
}

fn overall(entry: &MemoryEntry) -> Option<f64> {
    entry.decision.get("overall_score").and_then(Value::as_f64)
}

impl AdaptiveLearner {
    /// Starts from the default weight table
    pub fn new(config: LearningConfig, memory: Arc<AgentMemory>) -> Self {
        Self {
            config,
            memory,
            bus: None,
            weights: RwLock::new(scoring::default_weights()),
            pending: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Publishes `weights_updated` on `bus` after each swap
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Weights in use
    pub fn current_weights(&self) -> Weights {
        self.weights.read().clone()
    }

    /// Proposals from the last learning pass not yet applied
    pub fn pending_updates(&self) -> Vec<WeightUpdate> {
        self.pending.read().clone()
    }

    /// Mines reviewed aggregator decisions and proposes weight changes
    ///
    /// Only reviews recorded inside `window` (measured back from now) count.
    /// Nothing is proposed under `min_reviews` reviews. The proposals replace
    /// the pending list.
    pub fn learn_from_human_reviews(&self, window: Option<Duration>) -> Vec<WeightUpdate> {
        let cutoff = window.map(|w| Utc::now() - w);
        let reviews: Vec<MemoryEntry> = self
            .memory
            .entries_with_outcomes_since(cutoff)
            .into_iter()
            .filter(|e| e.agent_id == SCORE_AGGREGATOR)
            .collect();
        if reviews.len() < self.config.min_reviews {
            info!(
                "Not enough reviews for learning ({} < {})",
                reviews.len(),
                self.config.min_reviews
            );
            return Vec::new();
        }
        info!("Learning from {} human reviews", reviews.len());

        let mut signals: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for review in &reviews {
            let components = breakdown(review);
            let mut push = |component: &str, delta: f64| {
                signals.entry(component.to_string()).or_default().push(delta);
            };
            match review.outcome {
                Some(Outcome::Rejected) => {
                    for (component, raw) in &components {
                        if *raw > 0.7 {
                            push(component, -0.02);
                        } else if *raw < 0.3 {
                            push(component, 0.01);
                        }
                    }
                }
                Some(Outcome::Modified) => {
                    let modified = review
                        .feedback
                        .as_ref()
                        .and_then(|f| f.get("modified_score"))
                        .and_then(Value::as_f64);
                    if let (Some(modified), Some(original)) = (modified, overall(review)) {
                        let diff = modified - original;
                        for (component, raw) in &components {
                            if diff > 0.1 && *raw < 0.5 {
                                push(component, 0.01);
                            } else if diff < -0.1 && *raw > 0.5 {
                                push(component, -0.01);
                            }
                        }
                    }
                }
                Some(Outcome::Approved) => {
                    for component in components.keys() {
                        push(component, 0.002);
                    }
                }
                None => {}
            }
        }

        let weights = self.current_weights();
        let c = &self.config;
        let updates: Vec<WeightUpdate> = signals
            .into_iter()
            .filter_map(|(component, deltas)| {
                let current = *weights.get(&component)?;
                let n = deltas.len() as f64;
                let mean = deltas.iter().sum::<f64>() / n;
                let change = (mean * c.learning_rate * n).clamp(-c.max_change, c.max_change);
                if change.abs() <= c.min_change {
                    return None;
                }
                let proposed = (current + change).clamp(c.min_weight, c.max_weight);
                Some(WeightUpdate {
                    reason: format!(
                        "{} {} signal(s) from {} reviews, mean {:+.4}",
                        deltas.len(),
                        component,
                        reviews.len(),
                        mean
                    ),
                    confidence: (n / c.full_confidence_reviews.max(1) as f64).min(1.0),
                    change: proposed - current,
                    current_weight: current,
                    proposed_weight: proposed,
                    component,
                })
            })
            .collect();

        debug!("Proposed {} weight updates", updates.len());
        *self.pending.write() = updates.clone();
        updates
    }

    /// Applies proposals with confidence ≥ `min_confidence` (configured default
    /// when `None`), renormalises the weights to sum to 1 and records the swap
    ///
    /// Returns the weights in use afterwards. When nothing qualifies, the
    /// weights stay as they are and no history entry is written.
    pub fn apply_weight_updates(&self, updates: &[WeightUpdate], min_confidence: Option<f64>) -> Weights {
        let min_confidence = min_confidence.unwrap_or(self.config.min_apply_confidence);
        let accepted: Vec<&WeightUpdate> = updates
            .iter()
            .filter(|u| u.confidence >= min_confidence)
            .collect();
        if accepted.is_empty() {
            info!("No weight updates reached confidence {:.2}", min_confidence);
            return self.current_weights();
        }

        let change = {
            let mut weights = self.weights.write();
            let old = weights.clone();
            let mut next = old.clone();
            for update in &accepted {
                next.insert(update.component.clone(), update.proposed_weight);
            }
            let total: f64 = next.values().sum();
            if total > 0.0 {
                next.values_mut().for_each(|w| *w /= total);
            }
            *weights = next.clone();
            WeightChange {
                timestamp: Utc::now(),
                old_weights: old,
                new_weights: next,
                updates_applied: accepted.iter().map(|u| u.component.clone()).collect(),
                reason: accepted.iter().map(|u| u.reason.as_str()).collect::<Vec<_>>().join("; "),
            }
        };

        self.pending
            .write()
            .retain(|p| !change.updates_applied.contains(&p.component));
        info!("Applied {} weight updates", change.updates_applied.len());
        if let Some(bus) = &self.bus {
            bus.emit(
                EventType::WeightsUpdated,
                "adaptive_learner",
                None,
                json!({
                    "old_weights": change.old_weights,
                    "new_weights": change.new_weights,
                    "updates_applied": change.updates_applied,
                }),
            );
        }
        let weights = change.new_weights.clone();
        self.history.write().push(change);
        weights
    }

    /// Most recent weight swaps, oldest first
    pub fn weight_history(&self, limit: usize) -> Vec<WeightChange> {
        let history = self.history.read();
        history[history.len().saturating_sub(limit)..].to_vec()
    }

    /// Focus areas where `user_id`'s scores trail the cohort; read-only
    pub fn personalize_for_user(&self, user_id: &str) -> Personalization {
        let cohort = self.memory.entries_for_agent(SCORE_AGGREGATOR);
        let mut mine: Vec<&MemoryEntry> = cohort
            .iter()
            .filter(|e| e.context.get("user_id").and_then(Value::as_str) == Some(user_id))
            .collect();
        mine.sort_by_key(|e| e.created_at);

        if mine.is_empty() {
            return Personalization {
                user_id: user_id.to_string(),
                personalized: false,
                history_len: 0,
                focus_areas: Vec::new(),
                score_change: 0.0,
                daily_progress: 0.0,
                trajectory: Trajectory::Stable,
                recommendations: vec!["Complete an assessment to get personalised focus areas".to_string()],
            };
        }

        let means = |entries: &mut dyn Iterator<Item = &MemoryEntry>| {
            let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            for entry in entries {
                for (component, raw) in breakdown(entry) {
                    let slot = sums.entry(component).or_default();
                    slot.0 += raw;
                    slot.1 += 1;
                }
            }
            sums.into_iter()
                .map(|(k, (sum, n))| (k, sum / n as f64))
                .collect::<BTreeMap<String, f64>>()
        };
        let user_means = means(&mut mine.iter().copied());
        let cohort_means = means(&mut cohort.iter());

        let mut focus_areas: Vec<FocusArea> = user_means
            .iter()
            .filter_map(|(component, user_mean)| {
                let cohort_mean = *cohort_means.get(component)?;
                let gap = cohort_mean - user_mean;
                (gap > 0.0).then(|| FocusArea {
                    component: component.clone(),
                    user_mean: *user_mean,
                    cohort_mean,
                    gap,
                })
            })
            .collect();
        focus_areas.sort_by(|a, b| b.gap.total_cmp(&a.gap));
        focus_areas.truncate(2);

        let (score_change, daily_progress) = match (mine.first(), mine.last()) {
            (Some(first), Some(last)) if mine.len() >= 2 => {
                let change = overall(last).unwrap_or(0.0) - overall(first).unwrap_or(0.0);
                let days = (last.created_at - first.created_at).num_seconds() as f64 / 86_400.0;
                (change, if days > 0.0 { change / days } else { 0.0 })
            }
            _ => (0.0, 0.0),
        };
        let trajectory = if score_change > 1e-9 {
            Trajectory::Improving
        } else if score_change < -1e-9 {
            Trajectory::Declining
        } else {
            Trajectory::Stable
        };

        let mut recommendations: Vec<String> = focus_areas
            .iter()
            .filter_map(|f| match f.component.as_str() {
                scoring::SKILL_STRENGTH => Some("Focus on learning TypeScript and testing frameworks"),
                scoring::GITHUB_ACTIVITY => Some("Increase your GitHub activity - aim for daily commits"),
                scoring::PORTFOLIO_QUALITY => Some("Add 2-3 polished projects with live demos"),
                scoring::EXPERIENCE_DEPTH => Some("Take on freelance projects to build experience"),
                _ => None,
            })
            .map(String::from)
            .collect();
        match trajectory {
            Trajectory::Declining => {
                recommendations.push("Your scores have been declining - review recent changes and refocus".to_string())
            }
            Trajectory::Improving => {
                recommendations.push("You're making great progress! Keep up the momentum".to_string())
            }
            Trajectory::Stable => {}
        }
        if focus_areas.is_empty() {
            recommendations.push("You are at or above the cohort in every area".to_string());
        }
        recommendations.truncate(4);

        Personalization {
            user_id: user_id.to_string(),
            personalized: true,
            history_len: mine.len(),
            focus_areas,
            score_change,
            daily_progress,
            trajectory,
            recommendations,
        }
    }

    /// Snapshot of learning activity
    pub fn learning_summary(&self) -> LearningSummary {
        let mut review_counts = BTreeMap::new();
        for entry in self.memory.entries_for_agent(SCORE_AGGREGATOR) {
            if let Some(outcome) = entry.outcome {
                *review_counts.entry(outcome.to_string()).or_insert(0) += 1;
            }
        }
        LearningSummary {
            current_weights: self.current_weights(),
            weight_updates: self.history.read().len(),
            pending_updates: self.pending.read().len(),
            review_counts,
            learning_rate: self.config.learning_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::events::HistoryFilter;

    fn store(memory: &AgentMemory, user: &str, components: [f64; 5], overall: f64) -> String {
        let breakdown: serde_json::Map<String, Value> = scoring::COMPONENTS
            .iter()
            .zip(components)
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        memory.store_interaction(
            SCORE_AGGREGATOR,
            json!({ "user_id": user, "breakdown": breakdown }),
            json!({ "overall_score": overall }),
            0.8,
        )
    }

    fn learner() -> (Arc<AgentMemory>, AdaptiveLearner) {
        let memory = Arc::new(AgentMemory::new(MemoryConfig::default()));
        let learner = AdaptiveLearner::new(LearningConfig::default(), Arc::clone(&memory));
        (memory, learner)
    }

    #[test]
    fn test_needs_minimum_reviews() {
        let (memory, learner) = learner();
        for _ in 0..9 {
            let id = store(&memory, "u", [0.8, 0.2, 0.5, 0.5, 0.5], 0.5);
            memory.record_outcome(&id, Outcome::Rejected, None).unwrap();
        }
        assert!(learner.learn_from_human_reviews(None).is_empty());
    }

    #[test]
    fn test_rejections_shift_weights() {
        let (memory, learner) = learner();
        for _ in 0..12 {
            let id = store(&memory, "u", [0.8, 0.2, 0.5, 0.5, 0.5], 0.5);
            memory.record_outcome(&id, Outcome::Rejected, None).unwrap();
        }
        // an unrelated agent's reviews are ignored
        let other = memory.store_interaction("llm_judge", json!({}), json!({}), 0.5);
        memory.record_outcome(&other, Outcome::Rejected, None).unwrap();

        let updates = learner.learn_from_human_reviews(Some(Duration::days(30)));
        assert_eq!(updates.len(), 2);
        let skill = updates.iter().find(|u| u.component == scoring::SKILL_STRENGTH).unwrap();
        let github = updates.iter().find(|u| u.component == scoring::GITHUB_ACTIVITY).unwrap();
        assert!((skill.change + 0.012).abs() < 1e-9);
        assert!((github.change - 0.006).abs() < 1e-9);
        assert!((skill.confidence - 0.24).abs() < 1e-9);
        assert_eq!(learner.pending_updates().len(), 2);

        // default gate of 0.5 rejects both
        let unchanged = learner.apply_weight_updates(&updates, None);
        assert_eq!(unchanged, scoring::default_weights());
        assert!(learner.weight_history(10).is_empty());

        let weights = learner.apply_weight_updates(&updates, Some(0.2));
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(weights[scoring::SKILL_STRENGTH] < 0.35);
        assert!(weights[scoring::GITHUB_ACTIVITY] > 0.25);
        assert_eq!(learner.weight_history(10).len(), 1);
        assert!(learner.pending_updates().is_empty());
    }

    #[test]
    fn test_modified_and_approved_signals() {
        let (memory, learner) = learner();
        for i in 0..10 {
            let id = store(&memory, "u", [0.4, 0.6, 0.5, 0.5, 0.5], 0.5);
            if i % 2 == 0 {
                memory
                    .record_outcome(&id, Outcome::Modified, Some(json!({ "modified_score": 0.7 })))
                    .unwrap();
            } else {
                memory.record_outcome(&id, Outcome::Approved, None).unwrap();
            }
        }
        let updates = learner.learn_from_human_reviews(None);
        let skill = updates.iter().find(|u| u.component == scoring::SKILL_STRENGTH).unwrap();
        // five +0.01 and five +0.002 signals: mean 0.006 × 0.05 × 10
        assert!((skill.change - 0.003).abs() < 1e-9);
        // approved alone gives 5 × 0.002 × 0.05 = 0.0005, under the floor
        assert!(updates.iter().all(|u| u.component == scoring::SKILL_STRENGTH));
    }

    #[test]
    fn test_weights_updated_event() {
        let memory = Arc::new(AgentMemory::new(MemoryConfig::default()));
        let bus = Arc::new(EventBus::new(10));
        let learner = AdaptiveLearner::new(LearningConfig::default(), memory).with_event_bus(Arc::clone(&bus));
        let update = WeightUpdate {
            component: scoring::LEARNING_MOMENTUM.to_string(),
            current_weight: 0.05,
            proposed_weight: 0.10,
            change: 0.05,
            reason: "test".to_string(),
            confidence: 1.0,
        };
        let weights = learner.apply_weight_updates(&[update], None);
        assert!((weights[scoring::LEARNING_MOMENTUM] - 0.10 / 1.05).abs() < 1e-9);
        assert_eq!(bus.history(&HistoryFilter::of_type(EventType::WeightsUpdated), 5).len(), 1);
    }

    #[test]
    fn test_personalize_for_user() {
        let (memory, learner) = learner();
        store(&memory, "alice", [0.3, 0.2, 0.6, 0.5, 0.5], 0.40);
        store(&memory, "alice", [0.4, 0.3, 0.6, 0.5, 0.5], 0.48);
        store(&memory, "bob", [0.9, 0.9, 0.4, 0.5, 0.5], 0.70);

        let p = learner.personalize_for_user("alice");
        assert!(p.personalized);
        assert_eq!(p.history_len, 2);
        let areas: Vec<&str> = p.focus_areas.iter().map(|f| f.component.as_str()).collect();
        assert_eq!(areas, vec![scoring::GITHUB_ACTIVITY, scoring::SKILL_STRENGTH]);
        assert_eq!(p.trajectory, Trajectory::Improving);
        assert!(p.recommendations[0].contains("GitHub"));
        assert_eq!(learner.current_weights(), scoring::default_weights());

        assert!(!learner.personalize_for_user("nobody").personalized);
    }
}
