use crate::types::{CandidateProfile, Evaluation, IdeaRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Requester-side inputs to one matching pass, derived from the idea and
/// its latest evaluation. Derived once so every candidate sees identical
/// inputs within a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub innovation_score: u8,
    pub feasibility_score: u8,
    pub overall_score: u8,
}

impl RequesterProfile {
    pub fn from_evaluation(idea: &IdeaRecord, evaluation: &Evaluation) -> Self {
        let mut tags = idea.tags.clone();
        tags.push(evaluation.classification.label().to_string());
        if let Some(category) = &idea.category {
            tags.push(category.clone());
        }

        let feasibility_score = evaluation
            .criterion_scores
            .iter()
            .find(|entry| entry.criterion == "feasibility")
            .map(|entry| entry.score)
            .unwrap_or(evaluation.overall_score);

        Self {
            tags,
            category: idea.category.clone(),
            innovation_score: evaluation.overall_score,
            feasibility_score,
            overall_score: evaluation.overall_score,
        }
    }
}

/// One ranked pairing produced by the engine, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoredMatch {
    pub candidate_id: String,
    pub score: u8,
    pub reasons: Vec<String>,
}

/// Deterministic candidate ranking.
///
/// Pure arithmetic over declared profiles: no I/O, no randomness, no clock.
/// Re-running with unchanged inputs yields the same ranked list.
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    min_match_score: u8,
}

impl MatchingEngine {
    pub fn new(min_match_score: u8) -> Self {
        Self { min_match_score }
    }

    pub fn min_match_score(&self) -> u8 {
        self.min_match_score
    }

    /// Rank all active candidates against the requester and keep those at or
    /// above the minimum match score.
    ///
    /// An empty result is a normal outcome, not a failure.
    pub fn find_matches(
        &self,
        requester: &RequesterProfile,
        candidates: &[CandidateProfile],
    ) -> Vec<ScoredMatch> {
        let mut matches: Vec<ScoredMatch> = candidates
            .iter()
            .filter(|candidate| candidate.active)
            .map(|candidate| self.score_candidate(requester, candidate))
            .filter(|scored| scored.score >= self.min_match_score)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        matches
    }

    /// Composite score for one candidate with its contributing reasons.
    pub fn score_candidate(
        &self,
        requester: &RequesterProfile,
        candidate: &CandidateProfile,
    ) -> ScoredMatch {
        let tag = tag_similarity(&requester.tags, &candidate.tags);
        let industry = industry_similarity(requester.category.as_deref(), &candidate.industries);
        let innovation_alignment =
            alignment(requester.innovation_score, candidate.innovation_score);
        let feasibility_alignment =
            alignment(requester.feasibility_score, candidate.feasibility_score);

        let enhanced = 0.4 * tag
            + 0.3 * industry
            + 0.15 * innovation_alignment
            + 0.15 * feasibility_alignment;
        let base = base_compatibility(requester, candidate);
        let final_score = 0.7 * enhanced + 0.3 * base;

        let mut reasons = vec![format!("tag similarity {}%", tag.round() as u8)];
        if industry >= 100.0 {
            reasons.push("industry aligned".to_string());
        }
        reasons.push(format!(
            "innovation alignment {}%",
            innovation_alignment.round() as u8
        ));
        reasons.push(format!(
            "feasibility alignment {}%",
            feasibility_alignment.round() as u8
        ));
        reasons.push(format!("base compatibility {}%", base.round() as u8));

        ScoredMatch {
            candidate_id: candidate.id.clone(),
            score: final_score.round().min(100.0) as u8,
            reasons,
        }
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(crate::config::ThresholdConfig::default().min_match_score)
    }
}

fn normalize(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Jaccard index over case-normalized tag sets, scaled to [0, 100].
/// Either side empty scores 0.
pub fn tag_similarity(requester: &[String], candidate: &[String]) -> f64 {
    let a = normalize(requester);
    let b = normalize(candidate);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    (intersection as f64 / union as f64) * 100.0
}

/// Binary industry overlap: any shared label scores 100.
pub fn industry_similarity(category: Option<&str>, industries: &[String]) -> f64 {
    let Some(category) = category else {
        return 0.0;
    };
    let category = category.trim().to_lowercase();
    if category.is_empty() {
        return 0.0;
    }

    let overlap = industries
        .iter()
        .any(|industry| industry.trim().to_lowercase() == category);
    if overlap {
        100.0
    } else {
        0.0
    }
}

/// Closeness of two dimension scores on the same 0..100 scale.
pub fn alignment(requester: u8, candidate: u8) -> f64 {
    100.0 - f64::from(requester.abs_diff(candidate))
}

/// Independent baseline blended against the enhanced score.
///
/// Category membership, shared keywords, and raw evaluation strength; the
/// components top out at 40 + 40 + 20.
pub fn base_compatibility(requester: &RequesterProfile, candidate: &CandidateProfile) -> f64 {
    let mut score = 0.0;

    if industry_similarity(requester.category.as_deref(), &candidate.industries) >= 100.0 {
        score += 40.0;
    }

    let requester_tags = normalize(&requester.tags);
    let candidate_tags = normalize(&candidate.tags);
    let shared = requester_tags.intersection(&candidate_tags).count().min(4);
    score += shared as f64 * 10.0;

    score += f64::from(requester.overall_score) / 5.0;
    score.min(100.0)
}
