//! In-memory reference implementation of the platform storage traits.
//!
//! Deterministic and test friendly. Production deployments should back the
//! source-of-truth records with a transactional store.

use crate::storage::{
    CandidateStore, ContractStore, DecisionStore, EvaluationStore, IdeaStore, MatchStore,
    QueryWindow, ReviewStore, StorageError, StorageResult,
};
use crate::types::{
    CandidateProfile, Contract, ContractStatus, Decision, EscrowAccount, EscrowTransaction,
    Evaluation, ExpertReview, IdeaRecord, IdeaStatus, MatchRecord, MatchStatus, Stage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory platform store.
#[derive(Default)]
pub struct MemoryStore {
    ideas: RwLock<HashMap<Uuid, IdeaRecord>>,
    evaluations: RwLock<Vec<Evaluation>>,
    reviews: RwLock<Vec<ExpertReview>>,
    decisions: RwLock<Vec<Decision>>,
    matches: RwLock<HashMap<Uuid, MatchRecord>>,
    candidates: RwLock<HashMap<String, CandidateProfile>>,
    contracts: RwLock<HashMap<Uuid, Contract>>,
    escrows: RwLock<HashMap<Uuid, EscrowAccount>>,
    escrow_journal: RwLock<Vec<EscrowTransaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_window<T>(values: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = values.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[async_trait]
impl IdeaStore for MemoryStore {
    async fn create_idea(&self, idea: IdeaRecord) -> StorageResult<()> {
        let mut guard = self
            .ideas
            .write()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        if guard.contains_key(&idea.id) {
            return Err(StorageError::Conflict(format!(
                "idea {} already exists",
                idea.id
            )));
        }
        guard.insert(idea.id, idea);
        Ok(())
    }

    async fn get_idea(&self, id: Uuid) -> StorageResult<Option<IdeaRecord>> {
        let guard = self
            .ideas
            .read()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_ideas(&self, window: QueryWindow) -> StorageResult<Vec<IdeaRecord>> {
        let guard = self
            .ideas
            .read()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(apply_window(values, window))
    }

    async fn move_stage(
        &self,
        id: Uuid,
        expected_from: Stage,
        to: Stage,
        status: IdeaStatus,
    ) -> StorageResult<IdeaRecord> {
        let mut guard = self
            .ideas
            .write()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("idea {id} not found")))?;

        if record.stage != expected_from {
            return Err(StorageError::Conflict(format!(
                "idea {} sits at stage '{}', expected '{}'",
                id,
                record.stage.name(),
                expected_from.name()
            )));
        }

        record.stage = to;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn set_status(&self, id: Uuid, status: IdeaStatus) -> StorageResult<IdeaRecord> {
        let mut guard = self
            .ideas
            .write()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("idea {id} not found")))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn append_feedback(&self, id: Uuid, entry: String) -> StorageResult<()> {
        let mut guard = self
            .ideas
            .write()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("idea {id} not found")))?;
        record.feedback.push(entry);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn bump_review_cycle(&self, id: Uuid) -> StorageResult<u32> {
        let mut guard = self
            .ideas
            .write()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("idea {id} not found")))?;
        record.review_cycle += 1;
        record.updated_at = Utc::now();
        Ok(record.review_cycle)
    }

    async fn ideas_in(&self, stage: Stage, status: IdeaStatus) -> StorageResult<Vec<IdeaRecord>> {
        let guard = self
            .ideas
            .read()
            .map_err(|_| StorageError::Backend("idea lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|idea| idea.stage == stage && idea.status == status)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(values)
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    async fn record_evaluation(&self, evaluation: Evaluation) -> StorageResult<()> {
        let mut guard = self
            .evaluations
            .write()
            .map_err(|_| StorageError::Backend("evaluation lock poisoned".to_string()))?;
        guard.push(evaluation);
        Ok(())
    }

    async fn latest_evaluation(&self, idea_id: Uuid) -> StorageResult<Option<Evaluation>> {
        let guard = self
            .evaluations
            .read()
            .map_err(|_| StorageError::Backend("evaluation lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .filter(|evaluation| evaluation.idea_id == idea_id)
            .last()
            .cloned())
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn add_review(&self, review: ExpertReview) -> StorageResult<()> {
        let mut guard = self
            .reviews
            .write()
            .map_err(|_| StorageError::Backend("review lock poisoned".to_string()))?;
        let taken = guard.iter().any(|existing| {
            existing.idea_id == review.idea_id
                && existing.cycle == review.cycle
                && existing.role == review.role
        });
        if taken {
            return Err(StorageError::Conflict(format!(
                "review for idea {} role '{}' cycle {} already filed",
                review.idea_id,
                review.role.name(),
                review.cycle
            )));
        }
        guard.push(review);
        Ok(())
    }

    async fn reviews_for(&self, idea_id: Uuid) -> StorageResult<Vec<ExpertReview>> {
        let guard = self
            .reviews
            .read()
            .map_err(|_| StorageError::Backend("review lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .filter(|review| review.idea_id == idea_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn create_decision(&self, decision: Decision) -> StorageResult<()> {
        let mut guard = self
            .decisions
            .write()
            .map_err(|_| StorageError::Backend("decision lock poisoned".to_string()))?;
        let exists = guard.iter().any(|existing| {
            existing.idea_id == decision.idea_id && existing.cycle == decision.cycle
        });
        if exists {
            return Err(StorageError::Conflict(format!(
                "decision for idea {} cycle {} already recorded",
                decision.idea_id, decision.cycle
            )));
        }
        guard.push(decision);
        Ok(())
    }

    async fn decision_for(&self, idea_id: Uuid, cycle: u32) -> StorageResult<Option<Decision>> {
        let guard = self
            .decisions
            .read()
            .map_err(|_| StorageError::Backend("decision lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .find(|decision| decision.idea_id == idea_id && decision.cycle == cycle)
            .cloned())
    }

    async fn list_decisions(&self, idea_id: Uuid) -> StorageResult<Vec<Decision>> {
        let guard = self
            .decisions
            .read()
            .map_err(|_| StorageError::Backend("decision lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .filter(|decision| decision.idea_id == idea_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn upsert_matches(
        &self,
        idea_id: Uuid,
        matches: Vec<MatchRecord>,
    ) -> StorageResult<Vec<MatchRecord>> {
        let mut guard = self
            .matches
            .write()
            .map_err(|_| StorageError::Backend("match lock poisoned".to_string()))?;

        for incoming in matches {
            let existing_id = guard
                .values()
                .find(|existing| {
                    existing.idea_id == idea_id && existing.candidate_id == incoming.candidate_id
                })
                .map(|existing| existing.id);

            match existing_id {
                Some(id) => {
                    let existing = guard.get_mut(&id).ok_or_else(|| {
                        StorageError::Backend("match index out of sync".to_string())
                    })?;
                    // Responded rows are settled history; only pending rows
                    // track the latest scoring pass.
                    if existing.status == MatchStatus::Pending {
                        existing.score = incoming.score;
                        existing.reasons = incoming.reasons;
                    }
                }
                None => {
                    guard.insert(incoming.id, incoming);
                }
            }
        }

        let mut values = guard
            .values()
            .filter(|record| record.idea_id == idea_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        Ok(values)
    }

    async fn get_match(&self, match_id: Uuid) -> StorageResult<Option<MatchRecord>> {
        let guard = self
            .matches
            .read()
            .map_err(|_| StorageError::Backend("match lock poisoned".to_string()))?;
        Ok(guard.get(&match_id).cloned())
    }

    async fn matches_for(&self, idea_id: Uuid) -> StorageResult<Vec<MatchRecord>> {
        let guard = self
            .matches
            .read()
            .map_err(|_| StorageError::Backend("match lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|record| record.idea_id == idea_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        Ok(values)
    }

    async fn respond_match(
        &self,
        match_id: Uuid,
        status: MatchStatus,
        responded_at: DateTime<Utc>,
    ) -> StorageResult<MatchRecord> {
        let mut guard = self
            .matches
            .write()
            .map_err(|_| StorageError::Backend("match lock poisoned".to_string()))?;
        let record = guard
            .get_mut(&match_id)
            .ok_or_else(|| StorageError::NotFound(format!("match {match_id} not found")))?;

        if record.status != MatchStatus::Pending {
            return Err(StorageError::Conflict(format!(
                "match {match_id} has already been responded to"
            )));
        }

        record.status = status;
        record.responded_at = Some(responded_at);
        Ok(record.clone())
    }
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn upsert_candidate(&self, candidate: CandidateProfile) -> StorageResult<()> {
        let mut guard = self
            .candidates
            .write()
            .map_err(|_| StorageError::Backend("candidate lock poisoned".to_string()))?;
        guard.insert(candidate.id.clone(), candidate);
        Ok(())
    }

    async fn list_candidates(&self) -> StorageResult<Vec<CandidateProfile>> {
        let guard = self
            .candidates
            .read()
            .map_err(|_| StorageError::Backend("candidate lock poisoned".to_string()))?;
        let mut values = guard.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(values)
    }
}

#[async_trait]
impl ContractStore for MemoryStore {
    async fn create_contract(&self, contract: Contract) -> StorageResult<()> {
        let mut guard = self
            .contracts
            .write()
            .map_err(|_| StorageError::Backend("contract lock poisoned".to_string()))?;
        if guard.contains_key(&contract.id) {
            return Err(StorageError::Conflict(format!(
                "contract {} already exists",
                contract.id
            )));
        }
        if let Some(idea_id) = contract.idea_id {
            let open_exists = guard.values().any(|existing| {
                existing.idea_id == Some(idea_id) && existing.status != ContractStatus::Terminated
            });
            if open_exists {
                return Err(StorageError::Conflict(format!(
                    "idea {idea_id} already has an open contract"
                )));
            }
        }
        guard.insert(contract.id, contract);
        Ok(())
    }

    async fn get_contract(&self, id: Uuid) -> StorageResult<Option<Contract>> {
        let guard = self
            .contracts
            .read()
            .map_err(|_| StorageError::Backend("contract lock poisoned".to_string()))?;
        Ok(guard.get(&id).cloned())
    }

    async fn contracts_for_idea(&self, idea_id: Uuid) -> StorageResult<Vec<Contract>> {
        let guard = self
            .contracts
            .read()
            .map_err(|_| StorageError::Backend("contract lock poisoned".to_string()))?;
        let mut values = guard
            .values()
            .filter(|contract| contract.idea_id == Some(idea_id))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }

    async fn update_contract(
        &self,
        contract: Contract,
        expected_version: u64,
    ) -> StorageResult<()> {
        let mut guard = self
            .contracts
            .write()
            .map_err(|_| StorageError::Backend("contract lock poisoned".to_string()))?;
        let existing = guard
            .get_mut(&contract.id)
            .ok_or_else(|| StorageError::NotFound(format!("contract {} not found", contract.id)))?;

        if existing.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "contract {} is at version {}, expected {}",
                contract.id, existing.version, expected_version
            )));
        }
        *existing = contract;
        Ok(())
    }

    async fn create_escrow(&self, escrow: EscrowAccount) -> StorageResult<()> {
        let mut guard = self
            .escrows
            .write()
            .map_err(|_| StorageError::Backend("escrow lock poisoned".to_string()))?;
        if guard.contains_key(&escrow.contract_id) {
            return Err(StorageError::Conflict(format!(
                "contract {} already holds an escrow account",
                escrow.contract_id
            )));
        }
        guard.insert(escrow.contract_id, escrow);
        Ok(())
    }

    async fn escrow_for_contract(
        &self,
        contract_id: Uuid,
    ) -> StorageResult<Option<EscrowAccount>> {
        let guard = self
            .escrows
            .read()
            .map_err(|_| StorageError::Backend("escrow lock poisoned".to_string()))?;
        Ok(guard.get(&contract_id).cloned())
    }

    async fn update_escrow(&self, escrow: EscrowAccount, expected_version: u64) -> StorageResult<()> {
        let mut guard = self
            .escrows
            .write()
            .map_err(|_| StorageError::Backend("escrow lock poisoned".to_string()))?;
        let existing = guard.get_mut(&escrow.contract_id).ok_or_else(|| {
            StorageError::NotFound(format!("escrow for contract {} not found", escrow.contract_id))
        })?;

        if existing.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "escrow for contract {} is at version {}, expected {}",
                escrow.contract_id, existing.version, expected_version
            )));
        }
        *existing = escrow;
        Ok(())
    }

    async fn append_escrow_entry(&self, entry: EscrowTransaction) -> StorageResult<()> {
        let mut guard = self
            .escrow_journal
            .write()
            .map_err(|_| StorageError::Backend("escrow journal lock poisoned".to_string()))?;
        guard.push(entry);
        Ok(())
    }

    async fn escrow_entries(&self, escrow_id: Uuid) -> StorageResult<Vec<EscrowTransaction>> {
        let guard = self
            .escrow_journal
            .read()
            .map_err(|_| StorageError::Backend("escrow journal lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .filter(|entry| entry.escrow_id == escrow_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdeaSubmission;

    fn seeded_idea() -> IdeaRecord {
        IdeaRecord::from_submission(IdeaSubmission::new(
            "owner-1",
            "Grid battery swaps",
            "Swappable battery packs with standardized cradles for light commercial fleets and depots.",
        ))
    }

    #[tokio::test]
    async fn stage_move_is_conditional() {
        let store = MemoryStore::new();
        let idea = seeded_idea();
        let id = idea.id;
        store.create_idea(idea).await.unwrap();

        let moved = store
            .move_stage(id, Stage::Origination, Stage::Matching, IdeaStatus::Evaluating)
            .await
            .unwrap();
        assert_eq!(moved.stage, Stage::Matching);

        // A second mover with the stale expectation loses.
        let err = store
            .move_stage(id, Stage::Origination, Stage::Matching, IdeaStatus::Evaluating)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn review_slot_is_single_writer_per_cycle() {
        use crate::types::ReviewRole;

        let store = MemoryStore::new();
        let idea_id = Uuid::new_v4();
        store
            .add_review(ExpertReview::new(idea_id, "alice", ReviewRole::Legal, 80, "", 0))
            .await
            .unwrap();

        let err = store
            .add_review(ExpertReview::new(idea_id, "bob", ReviewRole::Legal, 75, "", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // Next cycle reopens the slot.
        store
            .add_review(ExpertReview::new(idea_id, "bob", ReviewRole::Legal, 75, "", 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn decision_is_create_if_absent() {
        use crate::types::DecisionVerdict;

        let store = MemoryStore::new();
        let idea_id = Uuid::new_v4();
        let decision = Decision {
            id: Uuid::new_v4(),
            idea_id,
            legal_score: 80,
            technical_score: 75,
            commercial_score: 65,
            average: 73,
            verdict: DecisionVerdict::Approved,
            feedback: String::new(),
            cycle: 0,
            decided_at: Utc::now(),
        };

        store.create_decision(decision.clone()).await.unwrap();
        let err = store.create_decision(decision).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn responded_matches_survive_rescoring() {
        let store = MemoryStore::new();
        let idea_id = Uuid::new_v4();
        let first = MatchRecord {
            id: Uuid::new_v4(),
            idea_id,
            candidate_id: "cand-1".to_string(),
            score: 72,
            reasons: vec!["tag similarity 60%".to_string()],
            status: MatchStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        };
        store.upsert_matches(idea_id, vec![first.clone()]).await.unwrap();
        store
            .respond_match(first.id, MatchStatus::Accepted, Utc::now())
            .await
            .unwrap();

        let rescored = MatchRecord {
            id: Uuid::new_v4(),
            score: 55,
            ..first.clone()
        };
        let merged = store.upsert_matches(idea_id, vec![rescored]).await.unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, first.id);
        assert_eq!(merged[0].score, 72);
        assert_eq!(merged[0].status, MatchStatus::Accepted);
    }

    #[tokio::test]
    async fn escrow_update_requires_matching_version() {
        let store = MemoryStore::new();
        let contract_id = Uuid::new_v4();
        let escrow = EscrowAccount::open(contract_id, 100_000);
        store.create_escrow(escrow.clone()).await.unwrap();

        let mut updated = escrow.clone();
        updated.released_minor = 30_000;
        updated.version = 1;
        store.update_escrow(updated, 0).await.unwrap();

        // A writer that read version 0 must now lose.
        let mut stale = escrow;
        stale.released_minor = 40_000;
        stale.version = 1;
        let err = store.update_escrow(stale, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
