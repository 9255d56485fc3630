use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification and decision thresholds, hoisted to one place.
///
/// Every call site reads these fields; no threshold literal is re-declared
/// per module, so the historical 50-vs-60 drift cannot reappear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Overall score at or above this takes the innovation fast track.
    pub innovation_floor: u8,
    /// Overall score at or above this (and below the innovation floor)
    /// takes the commercial path; below it the idea stays for guidance.
    pub commercial_floor: u8,
    /// Review average at or above this approves the idea for contracting.
    pub approval_floor: u8,
    /// Review average below this rejects the idea back to origination;
    /// averages between this and the approval floor request revision.
    pub rejection_floor: u8,
    /// Minimum final score for a candidate pairing to be persisted.
    pub min_match_score: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            innovation_floor: 70,
            commercial_floor: 50,
            approval_floor: 70,
            rejection_floor: 50,
            min_match_score: 50,
        }
    }
}

/// Fixed criterion weight table for the scoring engine.
///
/// Weights are integer percentages and must sum to exactly 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionWeights {
    pub novelty: u8,
    pub impact: u8,
    pub feasibility: u8,
    pub commercial: u8,
    pub scalability: u8,
    pub sustainability: u8,
}

impl CriterionWeights {
    pub fn total(&self) -> u32 {
        u32::from(self.novelty)
            + u32::from(self.impact)
            + u32::from(self.feasibility)
            + u32::from(self.commercial)
            + u32::from(self.scalability)
            + u32::from(self.sustainability)
    }

    pub fn validate(&self) -> Result<(), String> {
        let total = self.total();
        if total != 100 {
            return Err(format!("criterion weights must sum to 100, got {total}"));
        }
        Ok(())
    }
}

impl Default for CriterionWeights {
    fn default() -> Self {
        Self {
            novelty: 25,
            impact: 20,
            feasibility: 20,
            commercial: 15,
            scalability: 10,
            sustainability: 10,
        }
    }
}

/// Engine-level configuration: thresholds, weights, and bounded timeouts
/// for the two I/O suspension points (scorer and anchor calls).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    pub weights: CriterionWeights,
    pub scoring_timeout: Duration,
    pub anchor_timeout: Duration,
    /// Total assigned to auto-drafted contract shells; amendable while draft.
    pub draft_contract_total_minor: u64,
    pub default_currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            weights: CriterionWeights::default(),
            scoring_timeout: Duration::from_secs(15),
            anchor_timeout: Duration::from_secs(10),
            draft_contract_total_minor: 0,
            default_currency: "USD".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one_hundred() {
        let weights = CriterionWeights::default();
        assert_eq!(weights.total(), 100);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn unbalanced_weights_are_rejected() {
        let weights = CriterionWeights {
            novelty: 50,
            ..CriterionWeights::default()
        };
        let err = weights.validate().unwrap_err();
        assert!(err.contains("must sum to 100"));
    }

    #[test]
    fn default_thresholds_resolve_the_commercial_floor_to_fifty() {
        let thresholds = ThresholdConfig::default();
        assert_eq!(thresholds.innovation_floor, 70);
        assert_eq!(thresholds.commercial_floor, 50);
        assert_eq!(thresholds.min_match_score, 50);
    }
}
