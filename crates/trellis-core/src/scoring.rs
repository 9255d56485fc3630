use crate::config::{CriterionWeights, ThresholdConfig};
use crate::error::TrellisError;
use crate::types::{ClassificationPath, CriterionScore, Evaluation, IdeaRecord, IdeaSubmission};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const MIN_TITLE_CHARS: usize = 10;
pub const MIN_DESCRIPTION_CHARS: usize = 50;

/// The six scored criteria. Weights live in [`CriterionWeights`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Novelty,
    Impact,
    Feasibility,
    Commercial,
    Scalability,
    Sustainability,
}

impl Criterion {
    pub fn name(self) -> &'static str {
        match self {
            Self::Novelty => "novelty",
            Self::Impact => "impact",
            Self::Feasibility => "feasibility",
            Self::Commercial => "commercial",
            Self::Scalability => "scalability",
            Self::Sustainability => "sustainability",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "novelty" => Some(Self::Novelty),
            "impact" => Some(Self::Impact),
            "feasibility" => Some(Self::Feasibility),
            "commercial" => Some(Self::Commercial),
            "scalability" => Some(Self::Scalability),
            "sustainability" => Some(Self::Sustainability),
            _ => None,
        }
    }

    pub const ALL: [Criterion; 6] = [
        Self::Novelty,
        Self::Impact,
        Self::Feasibility,
        Self::Commercial,
        Self::Scalability,
        Self::Sustainability,
    ];
}

/// Raw scorer response before weighting and classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerOutput {
    pub criterion_scores: Vec<CriterionScore>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Scoring capability seam. Adapters provide heuristic or remote scorers;
/// the engine never blocks on this call without a timeout around it.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn scorer_id(&self) -> &'static str;
    async fn score(&self, idea: &IdeaRecord) -> Result<ScorerOutput, TrellisError>;
}

/// Deterministic weighting and classification over scorer output.
///
/// The engine is pure: same scores in, same evaluation out. All I/O stays
/// behind the [`Scorer`] seam.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: CriterionWeights,
    thresholds: ThresholdConfig,
}

impl ScoringEngine {
    pub fn new(
        weights: CriterionWeights,
        thresholds: ThresholdConfig,
    ) -> Result<Self, TrellisError> {
        weights
            .validate()
            .map_err(TrellisError::InvariantViolation)?;
        Ok(Self {
            weights,
            thresholds,
        })
    }

    /// Gate applied before any idea row is created.
    pub fn validate_submission(submission: &IdeaSubmission) -> Result<(), TrellisError> {
        if submission.owner.trim().is_empty() {
            return Err(TrellisError::InvariantViolation(
                "idea owner must not be empty".to_string(),
            ));
        }
        if submission.title.trim().chars().count() < MIN_TITLE_CHARS {
            return Err(TrellisError::InvariantViolation(format!(
                "idea title must be at least {MIN_TITLE_CHARS} characters"
            )));
        }
        if submission.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(TrellisError::InvariantViolation(format!(
                "idea description must be at least {MIN_DESCRIPTION_CHARS} characters"
            )));
        }
        Ok(())
    }

    fn weight_for(&self, criterion: Criterion) -> u32 {
        let weight = match criterion {
            Criterion::Novelty => self.weights.novelty,
            Criterion::Impact => self.weights.impact,
            Criterion::Feasibility => self.weights.feasibility,
            Criterion::Commercial => self.weights.commercial,
            Criterion::Scalability => self.weights.scalability,
            Criterion::Sustainability => self.weights.sustainability,
        };
        u32::from(weight)
    }

    /// Weighted average over the full criterion set, rounded to nearest.
    ///
    /// Scorer output that is incomplete, duplicated, or out of range is
    /// treated as a scoring outage: the caller leaves the idea untouched.
    pub fn weighted_overall(&self, scores: &[CriterionScore]) -> Result<u8, TrellisError> {
        let mut seen = BTreeSet::new();
        let mut total: u32 = 0;

        for entry in scores {
            let criterion = Criterion::parse(&entry.criterion).ok_or_else(|| {
                TrellisError::ScoringUnavailable(format!(
                    "scorer returned unknown criterion '{}'",
                    entry.criterion
                ))
            })?;
            if !seen.insert(criterion) {
                return Err(TrellisError::ScoringUnavailable(format!(
                    "scorer returned duplicate criterion '{}'",
                    criterion.name()
                )));
            }
            if entry.score > 100 {
                return Err(TrellisError::ScoringUnavailable(format!(
                    "scorer returned out-of-range score {} for '{}'",
                    entry.score,
                    criterion.name()
                )));
            }
            total += u32::from(entry.score) * self.weight_for(criterion);
        }

        for criterion in Criterion::ALL {
            if !seen.contains(&criterion) {
                return Err(TrellisError::ScoringUnavailable(format!(
                    "scorer omitted criterion '{}'",
                    criterion.name()
                )));
            }
        }

        // Weights sum to 100, so total is at most 10_000.
        Ok(((total + 50) / 100) as u8)
    }

    /// Single classification boundary for the whole system.
    pub fn classify(&self, overall: u8) -> ClassificationPath {
        if overall >= self.thresholds.innovation_floor {
            ClassificationPath::Innovation
        } else if overall >= self.thresholds.commercial_floor {
            ClassificationPath::Commercial
        } else {
            ClassificationPath::Guidance
        }
    }

    /// Turn validated scorer output into an immutable evaluation record.
    pub fn evaluate(
        &self,
        idea: &IdeaRecord,
        output: ScorerOutput,
    ) -> Result<Evaluation, TrellisError> {
        let overall_score = self.weighted_overall(&output.criterion_scores)?;
        let classification = self.classify(overall_score);

        Ok(Evaluation {
            id: Uuid::new_v4(),
            idea_id: idea.id,
            criterion_scores: output.criterion_scores,
            overall_score,
            classification,
            strengths: output.strengths,
            weaknesses: output.weaknesses,
            recommendations: output.recommendations,
            created_at: Utc::now(),
        })
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self {
            weights: CriterionWeights::default(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdeaSubmission;

    fn full_output(scores: [u8; 6]) -> ScorerOutput {
        let criterion_scores = Criterion::ALL
            .iter()
            .zip(scores)
            .map(|(criterion, score)| CriterionScore {
                criterion: criterion.name().to_string(),
                score,
                reasoning: format!("{} assessment", criterion.name()),
            })
            .collect();

        ScorerOutput {
            criterion_scores,
            strengths: vec!["clear problem statement".to_string()],
            weaknesses: vec!["no go-to-market plan".to_string()],
            recommendations: vec!["add a pilot partner".to_string()],
        }
    }

    fn sample_idea() -> IdeaRecord {
        IdeaRecord::from_submission(IdeaSubmission::new(
            "owner-1",
            "Solar microgrid planner",
            "Planning software for community solar microgrids with storage sizing and tariff modeling.",
        ))
    }

    #[test]
    fn uniform_scores_pass_through() {
        let engine = ScoringEngine::default();
        let overall = engine
            .weighted_overall(&full_output([80; 6]).criterion_scores)
            .unwrap();
        assert_eq!(overall, 80);
    }

    #[test]
    fn weighted_overall_rounds_to_nearest() {
        let engine = ScoringEngine::default();
        // 90*25 + 80*20 + 70*20 + 60*15 + 50*10 + 40*10 = 7050 -> 70.5 -> 71
        let overall = engine
            .weighted_overall(&full_output([90, 80, 70, 60, 50, 40]).criterion_scores)
            .unwrap();
        assert_eq!(overall, 71);
    }

    #[test]
    fn classification_boundaries() {
        let engine = ScoringEngine::default();
        assert_eq!(engine.classify(70), ClassificationPath::Innovation);
        assert_eq!(engine.classify(69), ClassificationPath::Commercial);
        assert_eq!(engine.classify(50), ClassificationPath::Commercial);
        assert_eq!(engine.classify(49), ClassificationPath::Guidance);
    }

    #[test]
    fn missing_criterion_reads_as_outage() {
        let engine = ScoringEngine::default();
        let mut output = full_output([75; 6]);
        output.criterion_scores.pop();

        let err = engine.weighted_overall(&output.criterion_scores).unwrap_err();
        assert!(matches!(err, TrellisError::ScoringUnavailable(_)));
        assert!(err.to_string().contains("omitted"));
    }

    #[test]
    fn duplicate_criterion_reads_as_outage() {
        let engine = ScoringEngine::default();
        let mut output = full_output([75; 6]);
        let dup = output.criterion_scores[0].clone();
        output.criterion_scores.push(dup);

        let err = engine.weighted_overall(&output.criterion_scores).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn out_of_range_score_reads_as_outage() {
        let engine = ScoringEngine::default();
        let mut output = full_output([75; 6]);
        output.criterion_scores[2].score = 101;

        let err = engine.weighted_overall(&output.criterion_scores).unwrap_err();
        assert!(err.to_string().contains("out-of-range"));
    }

    #[test]
    fn evaluate_classifies_and_keeps_narratives() {
        let engine = ScoringEngine::default();
        let idea = sample_idea();
        let evaluation = engine.evaluate(&idea, full_output([85; 6])).unwrap();

        assert_eq!(evaluation.idea_id, idea.id);
        assert_eq!(evaluation.overall_score, 85);
        assert_eq!(evaluation.classification, ClassificationPath::Innovation);
        assert_eq!(evaluation.strengths.len(), 1);
        assert_eq!(evaluation.criterion_scores.len(), 6);
    }

    #[test]
    fn submission_gate_enforces_minimum_lengths() {
        let ok = IdeaSubmission::new(
            "owner-1",
            "Ten chars!",
            "A description that is comfortably longer than the fifty character minimum requirement.",
        );
        assert!(ScoringEngine::validate_submission(&ok).is_ok());

        let short_title = IdeaSubmission::new("owner-1", "Too short", "x".repeat(60));
        let err = ScoringEngine::validate_submission(&short_title).unwrap_err();
        assert!(err.to_string().contains("title"));

        let short_description = IdeaSubmission::new("owner-1", "Valid title here", "too short");
        let err = ScoringEngine::validate_submission(&short_description).unwrap_err();
        assert!(err.to_string().contains("description"));
    }
}
