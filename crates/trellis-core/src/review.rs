use crate::config::ThresholdConfig;
use crate::error::TrellisError;
use crate::types::{Decision, DecisionVerdict, ExpertReview, ReviewRole};
use chrono::Utc;
use uuid::Uuid;

/// Scores of one complete review set, keyed by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleScores {
    pub legal: u8,
    pub technical: u8,
    pub commercial: u8,
}

impl RoleScores {
    pub fn sum(self) -> u32 {
        u32::from(self.legal) + u32::from(self.technical) + u32::from(self.commercial)
    }
}

/// The three-role decision gate sitting between matching and contracting.
///
/// A decision exists only once all three roles have filed a review for the
/// idea's current cycle, and exactly one decision is recorded per cycle.
#[derive(Debug, Clone)]
pub struct DecisionGate {
    thresholds: ThresholdConfig,
}

impl DecisionGate {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    /// Reject a second review for a role that already filed in this cycle.
    pub fn ensure_role_open(
        existing: &[ExpertReview],
        role: ReviewRole,
        cycle: u32,
    ) -> Result<(), TrellisError> {
        let taken = existing
            .iter()
            .any(|review| review.cycle == cycle && review.role == role);
        if taken {
            return Err(TrellisError::InvariantViolation(format!(
                "role '{}' already filed a review in cycle {}",
                role.name(),
                cycle
            )));
        }
        Ok(())
    }

    /// All three role scores for a cycle, or `None` while any role is missing.
    pub fn complete_set(reviews: &[ExpertReview], cycle: u32) -> Option<RoleScores> {
        let score_for = |role: ReviewRole| {
            reviews
                .iter()
                .find(|review| review.cycle == cycle && review.role == role)
                .map(|review| review.score)
        };

        Some(RoleScores {
            legal: score_for(ReviewRole::Legal)?,
            technical: score_for(ReviewRole::Technical)?,
            commercial: score_for(ReviewRole::Commercial)?,
        })
    }

    /// Integer average of the three role scores, rounded to nearest.
    pub fn average(scores: RoleScores) -> u8 {
        ((scores.sum() + 1) / 3) as u8
    }

    pub fn verdict(&self, average: u8) -> DecisionVerdict {
        if average >= self.thresholds.approval_floor {
            DecisionVerdict::Approved
        } else if average >= self.thresholds.rejection_floor {
            DecisionVerdict::NeedsRevision
        } else {
            DecisionVerdict::Rejected
        }
    }

    /// Build the cycle's decision once the review set is complete.
    ///
    /// Returns `None` while reviews are still outstanding; arriving reviews
    /// before that point are a plain no-op at the gate.
    pub fn decide(&self, idea_id: Uuid, reviews: &[ExpertReview], cycle: u32) -> Option<Decision> {
        let scores = Self::complete_set(reviews, cycle)?;
        let average = Self::average(scores);
        let verdict = self.verdict(average);
        let feedback = concat_feedback(reviews, cycle);

        Some(Decision {
            id: Uuid::new_v4(),
            idea_id,
            legal_score: scores.legal,
            technical_score: scores.technical,
            commercial_score: scores.commercial,
            average,
            verdict,
            feedback,
            cycle,
            decided_at: Utc::now(),
        })
    }
}

impl Default for DecisionGate {
    fn default() -> Self {
        Self::new(ThresholdConfig::default())
    }
}

/// Reviewer notes concatenated in fixed role order.
fn concat_feedback(reviews: &[ExpertReview], cycle: u32) -> String {
    let mut parts = Vec::new();
    for role in ReviewRole::ALL {
        let note = reviews
            .iter()
            .find(|review| review.cycle == cycle && review.role == role)
            .map(|review| review.notes.trim())
            .unwrap_or_default();
        if !note.is_empty() {
            parts.push(format!("{}: {}", role.name(), note));
        }
    }
    parts.join("; ")
}
