use crate::error::TrellisError;
use crate::types::Stage;

/// Legal stage edges.
///
/// Forward: origination -> matching -> contracting -> completed.
/// Backward: matching -> origination (feedback loop on rejection).
/// Every other pair is a violation; skips cannot happen silently.
pub fn allowed(from: Stage, to: Stage) -> bool {
    matches!(
        (from, to),
        (Stage::Origination, Stage::Matching)
            | (Stage::Matching, Stage::Contracting)
            | (Stage::Contracting, Stage::Completed)
            | (Stage::Matching, Stage::Origination)
    )
}

/// Guard for a conditional stage write: the record must still be at
/// `expected_from`, and the edge must exist in the transition table.
pub fn guard(current: Stage, expected_from: Stage, to: Stage) -> Result<(), TrellisError> {
    if current != expected_from {
        return Err(TrellisError::stage_violation(
            expected_from.name(),
            current.name(),
        ));
    }
    if !allowed(expected_from, to) {
        return Err(TrellisError::InvariantViolation(format!(
            "no transition edge from '{}' to '{}'",
            expected_from.name(),
            to.name()
        )));
    }
    Ok(())
}

/// Human-readable reason strings recorded in the transition log.
pub mod reasons {
    use crate::types::ClassificationPath;

    pub fn promotion(path: ClassificationPath, overall: u8) -> String {
        format!(
            "Classified as {} with score {}%, promoted to matching",
            path.label(),
            overall
        )
    }

    pub fn approval(average: u8) -> String {
        format!("Approved by Diamond Decision Point with score {average}%")
    }

    pub fn feedback(average: u8) -> String {
        format!("Rejected by Diamond Decision Point with score {average}% - Feedback Loop")
    }

    pub fn match_accepted(candidate_id: &str) -> String {
        format!("Match accepted with candidate '{candidate_id}'")
    }

    pub fn contract_completed() -> String {
        "All milestones released, contract completed".to_string()
    }
}
