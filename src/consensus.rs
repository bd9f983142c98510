//! Reconciles several scoring opinions into one result.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConsensusConfig;
use crate::error::{AgentError, Result};
use crate::scoring::Tier;

/// How opinions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    /// Most populated tier wins; mean score of that tier
    MajorityVote,
    /// Confidence and source-accuracy weighted mean
    #[default]
    WeightedAverage,
    /// Single most confident opinion
    HighestConfidence,
    /// Iteratively drop the outlier furthest from the mean
    Debate,
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MajorityVote => "majority_vote",
            Self::WeightedAverage => "weighted_average",
            Self::HighestConfidence => "highest_confidence",
            Self::Debate => "debate",
        })
    }
}

impl std::str::FromStr for ConsensusMethod {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "majority_vote" => Ok(Self::MajorityVote),
            "weighted_average" => Ok(Self::WeightedAverage),
            "highest_confidence" => Ok(Self::HighestConfidence),
            "debate" => Ok(Self::Debate),
            other => Err(AgentError::Validation(format!("unknown consensus method '{}'", other))),
        }
    }
}

/// One source's judgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    /// Source (agent) id
    pub source_id: String,
    /// Score in [0, 1]
    pub score: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Noted strengths
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Noted weaknesses
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// Suggested next steps
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Opinion {
    /// Opinion without qualitative notes
    pub fn new(source_id: impl Into<String>, score: f64, confidence: f64) -> Self {
        Self {
            source_id: source_id.into(),
            score,
            confidence,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Attaches strengths and weaknesses
    pub fn with_notes(mut self, strengths: Vec<String>, weaknesses: Vec<String>) -> Self {
        self.strengths = strengths;
        self.weaknesses = weaknesses;
        self
    }
}

/// What happened to an opinion or a group of opinions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Left out of the final score
    Excluded,
    /// Weighted by something other than its confidence alone
    Reweighted,
    /// Scores spread further than 0.2
    ScoreDisagreement,
    /// The same item is noted both as a strength and a weakness
    Contradiction,
}

/// A resolved conflict and the reason it was resolved that way
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConflict {
    /// Conflict class
    pub kind: ConflictKind,
    /// Sources involved
    pub sources: Vec<String>,
    /// Explanation
    pub reason: String,
}

impl ResolvedConflict {
    fn new(kind: ConflictKind, sources: Vec<String>, reason: String) -> Self {
        Self { kind, sources, reason }
    }
}

/// Outcome of [`ConsensusEngine::build_consensus`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Combined score
    pub final_score: f64,
    /// Combined confidence
    pub final_confidence: f64,
    /// Method applied
    pub method: ConsensusMethod,
    /// 1 − population standard deviation of all input scores, in [0, 1]
    pub agreement_level: f64,
    /// Agreement under the configured threshold
    pub low_agreement: bool,
    /// Sources in input order
    pub participating_sources: Vec<String>,
    /// Reweighted or excluded opinions and disagreements
    pub conflicts_resolved: Vec<ResolvedConflict>,
    /// Union of strengths, first five
    pub merged_strengths: Vec<String>,
    /// Union of weaknesses, first five
    pub merged_weaknesses: Vec<String>,
    /// Union of recommendations, first five
    pub merged_recommendations: Vec<String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

/// Agreement level of a score set: 1 − population standard deviation, clamped to [0, 1]
pub fn agreement_level(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 1.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt()).clamp(0.0, 1.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn merge_lists<'a>(lists: impl Iterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    lists
        .flatten()
        .filter(|s| seen.insert(s.to_lowercase()))
        .take(5)
        .cloned()
        .collect()
}

/// Reconciles opinions with per-source accuracy weights
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    source_weights: HashMap<String, f64>,
}

impl ConsensusEngine {
    /// Creates an engine with every source weighted 1.0
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            source_weights: HashMap::new(),
        }
    }

    /// Sets the accuracy weight of a source, clamped to [0.1, 2.0]
    pub fn set_source_weight(&mut self, source_id: &str, weight: f64) {
        self.source_weights.insert(source_id.to_string(), weight.clamp(0.1, 2.0));
    }

    /// Accuracy weight of a source, 1.0 when unset
    pub fn source_weight(&self, source_id: &str) -> f64 {
        self.source_weights.get(source_id).copied().unwrap_or(1.0)
    }

    /// Combines `opinions` with `method`, or the configured default
    ///
    /// Fails with a validation error when there are no opinions or a score or
    /// confidence lies outside [0, 1]. Disagreement is not an error; it shows
    /// up as a low `agreement_level`.
    pub fn build_consensus(&self, opinions: &[Opinion], method: Option<ConsensusMethod>) -> Result<ConsensusResult> {
        if opinions.is_empty() {
            return Err(AgentError::Validation("no opinions provided".to_string()));
        }
        if let Some(bad) = opinions.iter().find(|o| {
            !(0.0..=1.0).contains(&o.score) || !(0.0..=1.0).contains(&o.confidence)
        }) {
            return Err(AgentError::Validation(format!(
                "opinion from '{}' has score {} and confidence {}; both must lie in [0, 1]",
                bad.source_id, bad.score, bad.confidence
            )));
        }

        let method = method.unwrap_or(self.config.default_method);
        let scores: Vec<f64> = opinions.iter().map(|o| o.score).collect();
        let agreement = agreement_level(&scores);
        let low_agreement = agreement < self.config.low_agreement_threshold;

        let mut conflicts = Vec::new();
        let (final_score, final_confidence) = match method {
            ConsensusMethod::MajorityVote => self.majority_vote(opinions, &mut conflicts),
            ConsensusMethod::WeightedAverage => self.weighted_average(opinions, &mut conflicts),
            ConsensusMethod::HighestConfidence => self.highest_confidence(opinions, &mut conflicts),
            ConsensusMethod::Debate => self.debate(opinions, &mut conflicts),
        };

        if low_agreement {
            conflicts.extend(self.disagreements(opinions));
            warn!("Low agreement {:.2} across {} opinions", agreement, opinions.len());
        }
        info!(
            "Consensus via {}: score {:.3}, confidence {:.3}, agreement {:.2}",
            method, final_score, final_confidence, agreement
        );

        Ok(ConsensusResult {
            final_score,
            final_confidence,
            method,
            agreement_level: agreement,
            low_agreement,
            participating_sources: opinions.iter().map(|o| o.source_id.clone()).collect(),
            conflicts_resolved: conflicts,
            merged_strengths: merge_lists(opinions.iter().map(|o| &o.strengths)),
            merged_weaknesses: merge_lists(opinions.iter().map(|o| &o.weaknesses)),
            merged_recommendations: merge_lists(opinions.iter().map(|o| &o.recommendations)),
            timestamp: Utc::now(),
        })
    }

    fn majority_vote(&self, opinions: &[Opinion], conflicts: &mut Vec<ResolvedConflict>) -> (f64, f64) {
        // Buckets in order of first appearance so a tie goes to the earliest opinion.
        let mut buckets: Vec<(Tier, Vec<&Opinion>)> = Vec::new();
        for opinion in opinions {
            let tier = Tier::from_score(opinion.score);
            match buckets.iter_mut().find(|(t, _)| *t == tier) {
                Some((_, members)) => members.push(opinion),
                None => buckets.push((tier, vec![opinion])),
            }
        }
        let mut winner = 0;
        for (i, (_, members)) in buckets.iter().enumerate() {
            if members.len() > buckets[winner].1.len() {
                winner = i;
            }
        }
        let (tier, members) = &buckets[winner];
        for opinion in opinions.iter().filter(|o| Tier::from_score(o.score) != *tier) {
            conflicts.push(ResolvedConflict::new(
                ConflictKind::Excluded,
                vec![opinion.source_id.clone()],
                format!("voted {} against the majority tier {}", Tier::from_score(opinion.score), tier),
            ));
        }
        (
            mean(members.iter().map(|o| o.score)),
            members.len() as f64 / opinions.len() as f64,
        )
    }

    fn weighted_average(&self, opinions: &[Opinion], conflicts: &mut Vec<ResolvedConflict>) -> (f64, f64) {
        let mut total = 0.0;
        let mut score_sum = 0.0;
        let mut confidence_sum = 0.0;
        for opinion in opinions {
            let accuracy = self.source_weight(&opinion.source_id);
            if (accuracy - 1.0).abs() > f64::EPSILON {
                conflicts.push(ResolvedConflict::new(
                    ConflictKind::Reweighted,
                    vec![opinion.source_id.clone()],
                    format!("historical accuracy weight {:.2}", accuracy),
                ));
            }
            let weight = opinion.confidence * accuracy;
            score_sum += opinion.score * weight;
            confidence_sum += opinion.confidence * weight;
            total += weight;
        }
        if total <= 0.0 {
            return (mean(opinions.iter().map(|o| o.score)), 0.0);
        }
        (score_sum / total, confidence_sum / total)
    }

    fn highest_confidence(&self, opinions: &[Opinion], conflicts: &mut Vec<ResolvedConflict>) -> (f64, f64) {
        let mut best = &opinions[0];
        for opinion in &opinions[1..] {
            if opinion.confidence > best.confidence {
                best = opinion;
            }
        }
        for opinion in opinions.iter().filter(|o| !std::ptr::eq(*o, best)) {
            conflicts.push(ResolvedConflict::new(
                ConflictKind::Excluded,
                vec![opinion.source_id.clone()],
                format!("confidence {:.2} below {:.2} from {}", opinion.confidence, best.confidence, best.source_id),
            ));
        }
        (best.score, best.confidence)
    }

    fn debate(&self, opinions: &[Opinion], conflicts: &mut Vec<ResolvedConflict>) -> (f64, f64) {
        let mut remaining: Vec<&Opinion> = opinions.iter().collect();
        for round in 1..=self.config.debate_max_rounds {
            if remaining.len() <= 2 {
                break;
            }
            let (lo, hi) = remaining
                .iter()
                .fold((f64::MAX, f64::MIN), |(lo, hi), o| (lo.min(o.score), hi.max(o.score)));
            if hi - lo < self.config.debate_tolerance {
                break;
            }
            let centre = mean(remaining.iter().map(|o| o.score));
            let mut outlier = 0;
            for (i, o) in remaining.iter().enumerate() {
                if (o.score - centre).abs() >= (remaining[outlier].score - centre).abs() {
                    outlier = i;
                }
            }
            let dropped = remaining.remove(outlier);
            conflicts.push(ResolvedConflict::new(
                ConflictKind::Excluded,
                vec![dropped.source_id.clone()],
                format!(
                    "debate round {}: score {:.2} furthest from mean {:.2}",
                    round, dropped.score, centre
                ),
            ));
        }
        (
            mean(remaining.iter().map(|o| o.score)),
            mean(remaining.iter().map(|o| o.confidence)),
        )
    }

    fn disagreements(&self, opinions: &[Opinion]) -> Vec<ResolvedConflict> {
        let mut out = Vec::new();
        let lowest = opinions.iter().min_by(|a, b| a.score.total_cmp(&b.score));
        let highest = opinions.iter().max_by(|a, b| a.score.total_cmp(&b.score));
        if let (Some(lo), Some(hi)) = (lowest, highest) {
            if hi.score - lo.score > 0.2 {
                out.push(ResolvedConflict::new(
                    ConflictKind::ScoreDisagreement,
                    vec![lo.source_id.clone(), hi.source_id.clone()],
                    format!("scores differ by {:.2}", hi.score - lo.score),
                ));
            }
        }

        let strengths: BTreeSet<String> =
            opinions.iter().flat_map(|o| o.strengths.iter().map(|s| s.to_lowercase())).collect();
        let weaknesses: BTreeSet<String> =
            opinions.iter().flat_map(|o| o.weaknesses.iter().map(|s| s.to_lowercase())).collect();
        let contradictions: Vec<&String> = strengths.intersection(&weaknesses).collect();
        if !contradictions.is_empty() {
            out.push(ResolvedConflict::new(
                ConflictKind::Contradiction,
                opinions.iter().map(|o| o.source_id.clone()).collect(),
                format!(
                    "noted as both strength and weakness: {}",
                    contradictions.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ),
            ));
        }
        out
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(ConsensusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weighted_average_two_opinions() {
        let engine = ConsensusEngine::default();
        let opinions = [Opinion::new("rules", 0.8, 0.9), Opinion::new("judge", 0.4, 0.3)];
        let result = engine.build_consensus(&opinions, Some(ConsensusMethod::WeightedAverage)).unwrap();

        assert!(close(result.final_score, 0.70));
        assert!(close(result.agreement_level, 0.8));
        assert!(!result.low_agreement);
        assert!(result.conflicts_resolved.is_empty());
        // (0.9·0.9 + 0.3·0.3) / 1.2
        assert!(close(result.final_confidence, 0.75));
    }

    #[test]
    fn test_source_weights_reweight() {
        let mut engine = ConsensusEngine::default();
        engine.set_source_weight("judge", 5.0);
        assert_eq!(engine.source_weight("judge"), 2.0);

        let opinions = [Opinion::new("rules", 0.8, 0.5), Opinion::new("judge", 0.4, 0.5)];
        let result = engine.build_consensus(&opinions, None).unwrap();
        // weights 0.5 and 1.0
        assert!(close(result.final_score, (0.8 * 0.5 + 0.4 * 1.0) / 1.5));
        assert_eq!(result.conflicts_resolved.len(), 1);
        assert_eq!(result.conflicts_resolved[0].kind, ConflictKind::Reweighted);
    }

    #[test]
    fn test_majority_vote() {
        let engine = ConsensusEngine::default();
        let opinions = [
            Opinion::new("a", 0.55, 0.8),
            Opinion::new("b", 0.75, 0.8),
            Opinion::new("c", 0.65, 0.8),
        ];
        let result = engine.build_consensus(&opinions, Some(ConsensusMethod::MajorityVote)).unwrap();
        assert!(close(result.final_score, 0.60));
        assert!(close(result.final_confidence, 2.0 / 3.0));
        assert_eq!(result.conflicts_resolved[0].sources, vec!["b".to_string()]);

        // one-one tie: the bucket of the earliest opinion wins
        let tie = [Opinion::new("a", 0.2, 0.8), Opinion::new("b", 0.9, 0.8)];
        let result = engine.build_consensus(&tie, Some(ConsensusMethod::MajorityVote)).unwrap();
        assert!(close(result.final_score, 0.2));
    }

    #[test]
    fn test_highest_confidence_tie_keeps_first() {
        let engine = ConsensusEngine::default();
        let opinions = [
            Opinion::new("a", 0.3, 0.9),
            Opinion::new("b", 0.6, 0.9),
            Opinion::new("c", 0.9, 0.5),
        ];
        let result = engine.build_consensus(&opinions, Some(ConsensusMethod::HighestConfidence)).unwrap();
        assert_eq!(result.final_score, 0.3);
        assert_eq!(result.conflicts_resolved.iter().filter(|c| c.kind == ConflictKind::Excluded).count(), 2);
    }

    #[test]
    fn test_debate_drops_outlier() {
        let engine = ConsensusEngine::default();
        let opinions = [
            Opinion::new("a", 0.60, 0.8),
            Opinion::new("b", 0.62, 0.6),
            Opinion::new("c", 0.58, 0.7),
            Opinion::new("d", 0.10, 0.9),
        ];
        let result = engine.build_consensus(&opinions, Some(ConsensusMethod::Debate)).unwrap();
        assert!(close(result.final_score, 0.60));
        assert!(close(result.final_confidence, 0.7));
        let excluded: Vec<&str> = result
            .conflicts_resolved
            .iter()
            .filter(|c| c.kind == ConflictKind::Excluded)
            .map(|c| c.sources[0].as_str())
            .collect();
        assert_eq!(excluded, vec!["d"]);
        assert!(result.agreement_level < 0.8);
    }

    fn excluded(result: &ConsensusResult) -> Vec<&str> {
        result
            .conflicts_resolved
            .iter()
            .filter(|c| c.kind == ConflictKind::Excluded)
            .map(|c| c.sources[0].as_str())
            .collect()
    }

    fn spread() -> Vec<Opinion> {
        ["a", "b", "c", "d", "e"]
            .iter()
            .zip([0.0, 0.25, 0.5, 0.75, 1.0])
            .map(|(id, score)| Opinion::new(*id, score, 0.8))
            .collect()
    }

    #[test]
    fn test_debate_stops_at_round_cap() {
        let engine = ConsensusEngine::new(ConsensusConfig {
            debate_max_rounds: 1,
            ..ConsensusConfig::default()
        });
        let result = engine.build_consensus(&spread(), Some(ConsensusMethod::Debate)).unwrap();
        // range is still 0.75 after one round, far above the tolerance
        assert_eq!(excluded(&result), vec!["e"]);
        assert!(close(result.final_score, 0.375));

        let result = ConsensusEngine::default()
            .build_consensus(&spread(), Some(ConsensusMethod::Debate))
            .unwrap();
        assert_eq!(excluded(&result), vec!["e", "d", "c"]);
        assert!(close(result.final_score, 0.125));
    }

    #[test]
    fn test_debate_keeps_last_two_opinions() {
        let engine = ConsensusEngine::default();
        let pair = [Opinion::new("a", 0.2, 0.8), Opinion::new("b", 0.9, 0.6)];
        let result = engine.build_consensus(&pair, Some(ConsensusMethod::Debate)).unwrap();
        assert!(excluded(&result).is_empty());
        assert!(close(result.final_score, 0.55));
        assert!(close(result.final_confidence, 0.7));

        // rounds remain, but a third opinion is never dropped once two are left
        let three = [Opinion::new("a", 0.0, 0.8), Opinion::new("b", 0.5, 0.8), Opinion::new("c", 1.0, 0.8)];
        let result = engine.build_consensus(&three, Some(ConsensusMethod::Debate)).unwrap();
        assert_eq!(excluded(&result), vec!["c"]);
        assert!(close(result.final_score, 0.25));
    }

    #[test]
    fn test_contradictions_reported_on_low_agreement() {
        let engine = ConsensusEngine::default();
        let opinions = [
            Opinion::new("a", 0.9, 0.8).with_notes(vec!["Testing".into()], vec![]),
            Opinion::new("b", 0.1, 0.8).with_notes(vec![], vec!["testing".into()]),
        ];
        let result = engine.build_consensus(&opinions, None).unwrap();
        let kinds: Vec<ConflictKind> = result.conflicts_resolved.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ConflictKind::ScoreDisagreement, ConflictKind::Contradiction]);
        assert_eq!(result.merged_strengths, vec!["Testing".to_string()]);
    }

    #[test]
    fn test_rejects_empty_and_out_of_range() {
        let engine = ConsensusEngine::default();
        assert!(matches!(engine.build_consensus(&[], None), Err(AgentError::Validation(_))));
        assert!(engine.build_consensus(&[Opinion::new("a", 1.2, 0.5)], None).is_err());
    }

    #[test]
    fn test_method_names() {
        assert_eq!("debate".parse::<ConsensusMethod>().unwrap(), ConsensusMethod::Debate);
        assert_eq!(ConsensusMethod::default().to_string(), "weighted_average");
        assert!("vote".parse::<ConsensusMethod>().is_err());
    }

    proptest! {
        #[test]
        fn prop_agreement_is_bounded(scores in proptest::collection::vec(0.0f64..=1.0, 1..12)) {
            let level = agreement_level(&scores);
            prop_assert!((0.0..=1.0).contains(&level));
        }

        #[test]
        fn prop_final_score_within_input_range(
            pairs in proptest::collection::vec((0.0f64..=1.0, 0.01f64..=1.0), 1..8),
            method in prop_oneof![
                Just(ConsensusMethod::MajorityVote),
                Just(ConsensusMethod::WeightedAverage),
                Just(ConsensusMethod::HighestConfidence),
                Just(ConsensusMethod::Debate),
            ],
        ) {
            let opinions: Vec<Opinion> = pairs
                .iter()
                .enumerate()
                .map(|(i, (s, c))| Opinion::new(format!("s{}", i), *s, *c))
                .collect();
            let result = ConsensusEngine::default().build_consensus(&opinions, Some(method)).unwrap();
            let lo = pairs.iter().map(|p| p.0).fold(f64::MAX, f64::min);
            let hi = pairs.iter().map(|p| p.0).fold(f64::MIN, f64::max);
            prop_assert!(result.final_score >= lo - 1e-9 && result.final_score <= hi + 1e-9);
        }
    }
}
