//! Lifecycle orchestration engine.
//!
//! Wires the scoring engine, decision gate, matching engine, and contract
//! ledger over a [`PlatformStore`], with pluggable scorer, anchor, and
//! notifier capabilities. Every stage move goes through a conditional write
//! plus a hash-chained transition log entry.

use crate::config::EngineConfig;
use crate::connectors::{Anchor, Notifier};
use crate::contract::{ContractDraft, MilestoneRelease, SignOutcome};
use crate::error::TrellisError;
use crate::flow::reasons;
use crate::ledger::{LogStorageConfig, PersistentTransitionLog, TransitionEntry};
use crate::matching::{MatchingEngine, RequesterProfile};
use crate::review::DecisionGate;
use crate::scoring::{Scorer, ScoringEngine};
use crate::storage::{
    CandidateStore, ContractStore, DecisionStore, EvaluationStore, IdeaStore, MatchStore,
    PlatformStore, QueryWindow, ReviewStore, StorageError,
};
use crate::types::{
    events, CandidateProfile, Contract, ContractStatus, Decision, DecisionVerdict, EscrowAccount,
    EscrowTransaction, Evaluation, ExpertReview, IdeaRecord, IdeaStatus, IdeaSubmission,
    LifecycleEvent, MatchRecord, MatchStatus, Milestone, ReviewRole, Stage,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of filing one expert review. The decision appears on the review
/// that completes the role set for the current cycle.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub review: ExpertReview,
    pub decision: Option<Decision>,
}

/// Escrow account plus its journal, scoped to contract parties.
#[derive(Debug, Clone, Serialize)]
pub struct EscrowStatement {
    pub account: EscrowAccount,
    pub entries: Vec<EscrowTransaction>,
}

/// Summary of one background sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub ideas_examined: usize,
    pub matches_refreshed: usize,
    pub decisions_recorded: usize,
}

/// Amendable terms for a draft contract shell.
#[derive(Debug, Clone)]
pub struct TermsUpdate {
    pub party_b: Option<String>,
    pub total_value_minor: u64,
    pub currency: Option<String>,
    pub milestones: Vec<Milestone>,
}

/// Orchestrates the gated idea lifecycle end to end.
pub struct LifecycleEngine {
    store: Arc<dyn PlatformStore>,
    scorer: Arc<dyn Scorer>,
    anchor: Option<Arc<dyn Anchor>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    scoring: ScoringEngine,
    gate: DecisionGate,
    matching: MatchingEngine,
    log: Arc<AsyncMutex<PersistentTransitionLog>>,
    config: EngineConfig,
}

impl LifecycleEngine {
    /// Build an engine over a store and scorer, restoring and verifying the
    /// transition log from the configured backend.
    pub async fn bootstrap(
        store: Arc<dyn PlatformStore>,
        scorer: Arc<dyn Scorer>,
        config: EngineConfig,
        log_storage: LogStorageConfig,
    ) -> Result<Self, TrellisError> {
        let scoring = ScoringEngine::new(config.weights.clone(), config.thresholds.clone())?;
        let gate = DecisionGate::new(config.thresholds.clone());
        let matching = MatchingEngine::new(config.thresholds.min_match_score);
        let log = PersistentTransitionLog::bootstrap(log_storage).await?;
        info!(
            backend = log.backend_label(),
            entries = log.entries().len(),
            "transition log ready"
        );

        Ok(Self {
            store,
            scorer,
            anchor: None,
            notifiers: Vec::new(),
            scoring,
            gate,
            matching,
            log: Arc::new(AsyncMutex::new(log)),
            config,
        })
    }

    pub fn with_anchor(mut self, anchor: Arc<dyn Anchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Origination
    // ------------------------------------------------------------------

    /// Validate and persist a new idea in origination.
    pub async fn submit_idea(
        &self,
        submission: IdeaSubmission,
    ) -> Result<IdeaRecord, TrellisError> {
        ScoringEngine::validate_submission(&submission)?;

        let idea = IdeaRecord::from_submission(submission);
        self.store.create_idea(idea.clone()).await?;
        info!(idea = %idea.id, owner = %idea.owner, "idea submitted");

        self.emit(
            LifecycleEvent::new(events::IDEA_CREATED, idea.id.to_string(), &idea.owner)
                .with_detail("title", &idea.title),
        )
        .await;
        Ok(idea)
    }

    pub async fn get_idea(&self, idea_id: Uuid) -> Result<IdeaRecord, TrellisError> {
        self.store
            .get_idea(idea_id)
            .await?
            .ok_or_else(|| TrellisError::not_found("idea", idea_id.to_string()))
    }

    pub async fn list_ideas(&self, window: QueryWindow) -> Result<Vec<IdeaRecord>, TrellisError> {
        Ok(self.store.list_ideas(window).await?)
    }

    /// Score an idea with the configured scorer, classify it, and promote
    /// innovation/commercial paths into matching. Promotion runs a first
    /// matching pass immediately. Guidance-path ideas stay in origination
    /// for rework.
    pub async fn evaluate_idea(
        &self,
        idea_id: Uuid,
        actor: &str,
    ) -> Result<Evaluation, TrellisError> {
        let idea = self.get_idea(idea_id).await?;
        if idea.stage != Stage::Origination {
            return Err(TrellisError::stage_violation(
                Stage::Origination.name(),
                idea.stage.name(),
            ));
        }

        let output = match timeout(self.config.scoring_timeout, self.scorer.score(&idea)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TrellisError::ScoringUnavailable(format!(
                    "scorer '{}' timed out after {:?}",
                    self.scorer.scorer_id(),
                    self.config.scoring_timeout
                )))
            }
        };

        let evaluation = self.scoring.evaluate(&idea, output)?;
        self.store.record_evaluation(evaluation.clone()).await?;
        info!(
            idea = %idea_id,
            overall = evaluation.overall_score,
            path = evaluation.classification.label(),
            "idea evaluated"
        );

        self.emit(
            LifecycleEvent::new(events::EVALUATION_COMPLETED, idea_id.to_string(), actor)
                .with_detail("overall", evaluation.overall_score.to_string())
                .with_detail("path", evaluation.classification.label()),
        )
        .await;

        if evaluation.classification.eligible_for_matching() {
            match self
                .store
                .move_stage(
                    idea_id,
                    Stage::Origination,
                    Stage::Matching,
                    IdeaStatus::Evaluating,
                )
                .await
            {
                Ok(moved) => {
                    self.log_transition(
                        idea_id,
                        actor,
                        Stage::Origination,
                        Stage::Matching,
                        &reasons::promotion(
                            evaluation.classification,
                            evaluation.overall_score,
                        ),
                        Some(evaluation.overall_score),
                        json!({ "evaluation": evaluation.id }),
                    )
                    .await;
                    self.emit_status_changed(&moved, actor).await;

                    if let Err(err) = self.request_matches(idea_id, actor).await {
                        // The evaluation and promotion stay committed; the
                        // sweep refreshes the match set later.
                        warn!(idea = %idea_id, error = %err, "entry matching pass failed");
                    }
                }
                Err(StorageError::Conflict(message)) => {
                    // Another evaluator promoted this idea first; the
                    // evaluation itself stays recorded.
                    warn!(idea = %idea_id, %message, "promotion lost a stage race");
                }
                Err(other) => return Err(other.into()),
            }
        }

        Ok(evaluation)
    }

    pub async fn latest_evaluation(
        &self,
        idea_id: Uuid,
    ) -> Result<Option<Evaluation>, TrellisError> {
        Ok(self.store.latest_evaluation(idea_id).await?)
    }

    // ------------------------------------------------------------------
    // Diamond Decision Point
    // ------------------------------------------------------------------

    /// File one role's review for the current cycle. When the legal,
    /// technical, and commercial slots are all filled the decision fires
    /// inline and its verdict is applied.
    pub async fn submit_review(
        &self,
        idea_id: Uuid,
        reviewer: &str,
        role: ReviewRole,
        score: u8,
        notes: &str,
    ) -> Result<ReviewOutcome, TrellisError> {
        let idea = self.get_idea(idea_id).await?;
        if idea.stage != Stage::Matching {
            return Err(TrellisError::stage_violation(
                Stage::Matching.name(),
                idea.stage.name(),
            ));
        }

        let existing = self.store.reviews_for(idea_id).await?;
        DecisionGate::ensure_role_open(&existing, role, idea.review_cycle)?;

        let review = ExpertReview::new(idea_id, reviewer, role, score, notes, idea.review_cycle);
        self.store.add_review(review.clone()).await?;
        info!(
            idea = %idea_id,
            role = role.name(),
            score = review.score,
            cycle = idea.review_cycle,
            "review filed"
        );

        let mut reviews = existing;
        reviews.push(review.clone());
        let decision = match self.gate.decide(idea_id, &reviews, idea.review_cycle) {
            Some(decision) => Some(self.apply_decision(&idea, decision).await?),
            None => None,
        };

        Ok(ReviewOutcome { review, decision })
    }

    pub async fn reviews_for(&self, idea_id: Uuid) -> Result<Vec<ExpertReview>, TrellisError> {
        Ok(self.store.reviews_for(idea_id).await?)
    }

    pub async fn decisions_for(&self, idea_id: Uuid) -> Result<Vec<Decision>, TrellisError> {
        Ok(self.store.list_decisions(idea_id).await?)
    }

    /// Record the decision and move the idea along the verdict's edge.
    ///
    /// The create-if-absent decision write is the idempotency guard: when two
    /// aggregators race on the same completed role set, the loser surfaces as
    /// `AlreadyDecided` and no edge is walked twice.
    async fn apply_decision(
        &self,
        idea: &IdeaRecord,
        decision: Decision,
    ) -> Result<Decision, TrellisError> {
        match self.store.create_decision(decision.clone()).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(TrellisError::AlreadyDecided {
                    idea_id: idea.id.to_string(),
                    cycle: decision.cycle,
                })
            }
            Err(other) => return Err(other.into()),
        }
        info!(
            idea = %idea.id,
            verdict = ?decision.verdict,
            average = decision.average,
            cycle = decision.cycle,
            "decision recorded"
        );

        match decision.verdict {
            DecisionVerdict::Approved => {
                match self
                    .store
                    .move_stage(
                        idea.id,
                        Stage::Matching,
                        Stage::Contracting,
                        IdeaStatus::Approved,
                    )
                    .await
                {
                    Ok(moved) => {
                        self.log_transition(
                            idea.id,
                            "decision-gate",
                            Stage::Matching,
                            Stage::Contracting,
                            &reasons::approval(decision.average),
                            Some(decision.average),
                            json!({ "cycle": decision.cycle }),
                        )
                        .await;
                        self.emit_status_changed(&moved, "decision-gate").await;
                    }
                    Err(StorageError::Conflict(message)) => {
                        warn!(idea = %idea.id, %message, "approval lost a stage race");
                    }
                    Err(other) => return Err(other.into()),
                }
                self.ensure_draft_contract(idea).await?;
            }
            DecisionVerdict::NeedsRevision => {
                let entry = if decision.feedback.is_empty() {
                    format!("Revision requested with review average {}%", decision.average)
                } else {
                    decision.feedback.clone()
                };
                self.store.append_feedback(idea.id, entry).await?;
                let cycle = self.store.bump_review_cycle(idea.id).await?;
                info!(idea = %idea.id, cycle, "revision requested, review cycle reopened");
            }
            DecisionVerdict::Rejected => {
                let entry = if decision.feedback.is_empty() {
                    reasons::feedback(decision.average)
                } else {
                    decision.feedback.clone()
                };
                self.store.append_feedback(idea.id, entry).await?;
                self.store.bump_review_cycle(idea.id).await?;

                match self
                    .store
                    .move_stage(
                        idea.id,
                        Stage::Matching,
                        Stage::Origination,
                        IdeaStatus::Rejected,
                    )
                    .await
                {
                    Ok(moved) => {
                        self.log_transition(
                            idea.id,
                            "decision-gate",
                            Stage::Matching,
                            Stage::Origination,
                            &reasons::feedback(decision.average),
                            Some(decision.average),
                            json!({ "cycle": decision.cycle }),
                        )
                        .await;
                        self.emit_status_changed(&moved, "decision-gate").await;
                    }
                    Err(StorageError::Conflict(message)) => {
                        warn!(idea = %idea.id, %message, "feedback loop lost a stage race");
                    }
                    Err(other) => return Err(other.into()),
                }
            }
        }

        self.emit(
            LifecycleEvent::new(events::DECISION_RECORDED, idea.id.to_string(), "decision-gate")
                .with_detail("verdict", format!("{:?}", decision.verdict).to_lowercase())
                .with_detail("average", decision.average.to_string())
                .with_detail("cycle", decision.cycle.to_string()),
        )
        .await;
        Ok(decision)
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    pub async fn upsert_candidate(
        &self,
        candidate: CandidateProfile,
    ) -> Result<(), TrellisError> {
        Ok(self.store.upsert_candidate(candidate).await?)
    }

    pub async fn list_candidates(&self) -> Result<Vec<CandidateProfile>, TrellisError> {
        Ok(self.store.list_candidates().await?)
    }

    /// Run one matching pass for an idea in the matching stage and persist
    /// every pairing that clears the validity threshold. Re-running is safe:
    /// pending pairings are re-scored in place, responded ones are kept.
    pub async fn request_matches(
        &self,
        idea_id: Uuid,
        actor: &str,
    ) -> Result<Vec<MatchRecord>, TrellisError> {
        let idea = self.get_idea(idea_id).await?;
        if idea.stage != Stage::Matching {
            return Err(TrellisError::stage_violation(
                Stage::Matching.name(),
                idea.stage.name(),
            ));
        }
        let evaluation = self
            .store
            .latest_evaluation(idea_id)
            .await?
            .ok_or_else(|| {
                TrellisError::InvariantViolation(
                    "matching requires a recorded evaluation".to_string(),
                )
            })?;

        let candidates = self.store.list_candidates().await?;
        let profile = RequesterProfile::from_evaluation(&idea, &evaluation);
        let scored = self.matching.find_matches(&profile, &candidates);

        let known: BTreeSet<String> = self
            .store
            .matches_for(idea_id)
            .await?
            .into_iter()
            .map(|record| record.candidate_id)
            .collect();

        let now = Utc::now();
        let records = scored
            .into_iter()
            .map(|scored| MatchRecord {
                id: Uuid::new_v4(),
                idea_id,
                candidate_id: scored.candidate_id,
                score: scored.score,
                reasons: scored.reasons,
                status: MatchStatus::Pending,
                created_at: now,
                responded_at: None,
            })
            .collect::<Vec<_>>();

        let persisted = self.store.upsert_matches(idea_id, records).await?;
        info!(idea = %idea_id, matches = persisted.len(), "matching pass persisted");

        for record in &persisted {
            if record.status == MatchStatus::Pending && !known.contains(&record.candidate_id) {
                self.emit(
                    LifecycleEvent::new(events::MATCH_SUGGESTED, idea_id.to_string(), actor)
                        .with_detail("candidate", &record.candidate_id)
                        .with_detail("score", record.score.to_string()),
                )
                .await;
            }
        }

        Ok(persisted)
    }

    pub async fn matches_for(&self, idea_id: Uuid) -> Result<Vec<MatchRecord>, TrellisError> {
        Ok(self.store.matches_for(idea_id).await?)
    }

    /// Accept or decline a pending match. Only the idea owner or the matched
    /// candidate may respond, and a match can be responded to exactly once.
    pub async fn respond_match(
        &self,
        match_id: Uuid,
        actor: &str,
        accept: bool,
    ) -> Result<MatchRecord, TrellisError> {
        let record = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| TrellisError::not_found("match", match_id.to_string()))?;
        let idea = self.get_idea(record.idea_id).await?;

        if actor != idea.owner && actor != record.candidate_id {
            return Err(TrellisError::unauthorized(actor, "respond to this match"));
        }

        let status = if accept {
            MatchStatus::Accepted
        } else {
            MatchStatus::Rejected
        };
        let updated = self.store.respond_match(match_id, status, Utc::now()).await?;

        if accept {
            if idea.stage == Stage::Matching {
                self.store.set_status(idea.id, IdeaStatus::Matched).await?;
            }
            self.emit(
                LifecycleEvent::new(events::MATCH_ACCEPTED, idea.id.to_string(), actor)
                    .with_detail("candidate", &updated.candidate_id)
                    .with_detail("note", reasons::match_accepted(&updated.candidate_id)),
            )
            .await;
        }

        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Contracting and escrow
    // ------------------------------------------------------------------

    /// Create a contract draft. When linked to an idea, the idea must have
    /// reached the contracting stage.
    pub async fn create_contract(
        &self,
        draft: ContractDraft,
        actor: &str,
    ) -> Result<Contract, TrellisError> {
        if actor != draft.party_a {
            return Err(TrellisError::unauthorized(actor, "draft this contract"));
        }
        if let Some(idea_id) = draft.idea_id {
            let idea = self.get_idea(idea_id).await?;
            if idea.stage != Stage::Contracting {
                return Err(TrellisError::stage_violation(
                    Stage::Contracting.name(),
                    idea.stage.name(),
                ));
            }
        }

        let contract = Contract::create(draft)?;
        self.store.create_contract(contract.clone()).await?;
        info!(contract = %contract.id, party_a = %contract.party_a, "contract drafted");
        Ok(contract)
    }

    pub async fn get_contract(
        &self,
        contract_id: Uuid,
        actor: &str,
    ) -> Result<Contract, TrellisError> {
        let contract = self.load_contract(contract_id).await?;
        if !contract.is_party(actor) {
            return Err(TrellisError::unauthorized(actor, "view this contract"));
        }
        Ok(contract)
    }

    /// Replace a draft shell's terms before any signature lands.
    pub async fn amend_contract_terms(
        &self,
        contract_id: Uuid,
        actor: &str,
        update: TermsUpdate,
    ) -> Result<Contract, TrellisError> {
        let mut contract = self.load_contract(contract_id).await?;
        let expected = contract.version;
        contract.set_terms(
            actor,
            update.party_b,
            update.total_value_minor,
            update.currency,
            update.milestones,
        )?;
        self.store.update_contract(contract.clone(), expected).await?;
        info!(contract = %contract_id, total = contract.total_value_minor, "contract terms amended");
        Ok(contract)
    }

    /// Record one party's signature. The second signature activates the
    /// contract, opens escrow, and anchors the activation externally on a
    /// best-effort basis.
    pub async fn sign_contract(
        &self,
        contract_id: Uuid,
        actor: &str,
        signature: &str,
    ) -> Result<Contract, TrellisError> {
        let mut contract = self.load_contract(contract_id).await?;
        let expected = contract.version;
        let outcome = contract.sign(actor, signature)?;
        self.store.update_contract(contract.clone(), expected).await?;

        if let SignOutcome::Activated(escrow) = outcome {
            self.store.create_escrow(escrow.clone()).await?;
            info!(
                contract = %contract_id,
                escrow = %escrow.id,
                total = escrow.total_minor,
                "contract active, escrow opened"
            );

            if let Some(reference) = self.request_anchor(&contract).await {
                let anchored_from = contract.version;
                contract.anchor_ref = Some(reference);
                contract.version += 1;
                contract.updated_at = Utc::now();
                if let Err(err) = self
                    .store
                    .update_contract(contract.clone(), anchored_from)
                    .await
                {
                    warn!(contract = %contract_id, error = %err, "anchor reference not persisted");
                }
            }

            if let Some(idea_id) = contract.idea_id {
                match self.store.set_status(idea_id, IdeaStatus::Contracted).await {
                    Ok(idea) => self.emit_status_changed(&idea, actor).await,
                    Err(err) => warn!(idea = %idea_id, error = %err, "idea status not updated"),
                }
            }

            self.emit(
                LifecycleEvent::new(events::CONTRACT_ACTIVATED, contract_id.to_string(), actor)
                    .with_detail("escrow", escrow.id.to_string())
                    .with_detail("total_minor", escrow.total_minor.to_string()),
            )
            .await;
        }

        Ok(contract)
    }

    /// Settle one milestone: mark it complete and release its amount from
    /// escrow. The contract write lands first and serializes concurrent
    /// completions; the escrow write then cannot race. Settling the final
    /// milestone anchors the completed contract and closes out the idea.
    pub async fn complete_milestone(
        &self,
        contract_id: Uuid,
        actor: &str,
        index: usize,
    ) -> Result<MilestoneRelease, TrellisError> {
        let mut contract = self.load_contract(contract_id).await?;
        let mut escrow = self.load_escrow(contract_id).await?;
        let contract_expected = contract.version;
        let escrow_expected = escrow.version;

        let release = contract.complete_milestone(&mut escrow, actor, index)?;
        self.store
            .update_contract(contract.clone(), contract_expected)
            .await?;
        self.store.update_escrow(escrow.clone(), escrow_expected).await?;
        self.store
            .append_escrow_entry(release.transaction.clone())
            .await?;
        info!(
            contract = %contract_id,
            milestone = index,
            released = release.released_minor,
            "milestone settled"
        );

        self.emit(
            LifecycleEvent::new(events::ESCROW_RELEASED, contract_id.to_string(), actor)
                .with_detail("milestone", index.to_string())
                .with_detail("amount_minor", release.transaction.amount_minor.to_string()),
        )
        .await;

        if release.contract_completed {
            if let Some(reference) = self.request_anchor(&contract).await {
                let anchored_from = contract.version;
                contract.anchor_ref = Some(reference);
                contract.version += 1;
                contract.updated_at = Utc::now();
                if let Err(err) = self
                    .store
                    .update_contract(contract.clone(), anchored_from)
                    .await
                {
                    warn!(contract = %contract_id, error = %err, "anchor reference not persisted");
                }
            }

            if let Some(idea_id) = contract.idea_id {
                match self
                    .store
                    .move_stage(
                        idea_id,
                        Stage::Contracting,
                        Stage::Completed,
                        IdeaStatus::Completed,
                    )
                    .await
                {
                    Ok(moved) => {
                        self.log_transition(
                            idea_id,
                            actor,
                            Stage::Contracting,
                            Stage::Completed,
                            &reasons::contract_completed(),
                            None,
                            json!({ "contract": contract_id }),
                        )
                        .await;
                        self.emit_status_changed(&moved, actor).await;
                    }
                    Err(StorageError::Conflict(message)) => {
                        warn!(idea = %idea_id, %message, "completion lost a stage race");
                    }
                    Err(other) => return Err(other.into()),
                }
            }
        }

        Ok(release)
    }

    /// Journal a party A deposit against an active contract's escrow.
    pub async fn record_deposit(
        &self,
        contract_id: Uuid,
        actor: &str,
        amount_minor: u64,
    ) -> Result<EscrowTransaction, TrellisError> {
        let contract = self.load_contract(contract_id).await?;
        let escrow = self.load_escrow(contract_id).await?;
        let entry = contract.record_deposit(&escrow, actor, amount_minor)?;
        self.store.append_escrow_entry(entry.clone()).await?;
        info!(contract = %contract_id, amount = amount_minor, "deposit journaled");
        Ok(entry)
    }

    /// Terminate a draft or active contract. Pending milestones are
    /// cancelled and any unreleased escrow balance is refunded.
    pub async fn terminate_contract(
        &self,
        contract_id: Uuid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Contract, TrellisError> {
        let mut contract = self.load_contract(contract_id).await?;
        let contract_expected = contract.version;
        let mut escrow = self.store.escrow_for_contract(contract_id).await?;
        let escrow_expected = escrow.as_ref().map(|account| account.version);

        let termination = contract.terminate(escrow.as_mut(), actor, reason)?;
        self.store
            .update_contract(contract.clone(), contract_expected)
            .await?;

        if let Some(refund) = termination.refund {
            if let (Some(account), Some(expected)) = (escrow, escrow_expected) {
                self.store.update_escrow(account, expected).await?;
            }
            self.store.append_escrow_entry(refund.clone()).await?;
            info!(
                contract = %contract_id,
                refunded = refund.amount_minor,
                "unreleased escrow refunded"
            );
        }

        self.emit(
            LifecycleEvent::new(events::CONTRACT_TERMINATED, contract_id.to_string(), actor)
                .with_detail(
                    "reason",
                    contract
                        .termination_reason
                        .clone()
                        .unwrap_or_else(|| "terminated".to_string()),
                ),
        )
        .await;

        Ok(contract)
    }

    /// Escrow account and journal for a contract, visible to its parties.
    pub async fn escrow_statement(
        &self,
        contract_id: Uuid,
        actor: &str,
    ) -> Result<EscrowStatement, TrellisError> {
        let contract = self.load_contract(contract_id).await?;
        if !contract.is_party(actor) {
            return Err(TrellisError::unauthorized(actor, "view this escrow account"));
        }
        let account = self.load_escrow(contract_id).await?;
        let entries = self.store.escrow_entries(account.id).await?;
        Ok(EscrowStatement { account, entries })
    }

    // ------------------------------------------------------------------
    // Transition log and sweep
    // ------------------------------------------------------------------

    pub async fn transitions_for(&self, idea_id: Uuid) -> Vec<TransitionEntry> {
        self.log.lock().await.for_idea(idea_id)
    }

    pub async fn verify_transition_log(&self) -> bool {
        self.log.lock().await.verify_chain()
    }

    pub async fn log_backend(&self) -> &'static str {
        self.log.lock().await.backend_label()
    }

    /// One pass over ideas parked in the matching stage: refresh missing
    /// match sets and fire decisions whose role set completed without an
    /// inline aggregation (for example after a partial outage).
    pub async fn run_sweep(&self, actor: &str) -> Result<SweepReport, TrellisError> {
        let mut parked = self
            .store
            .ideas_in(Stage::Matching, IdeaStatus::Evaluating)
            .await?;
        parked.extend(
            self.store
                .ideas_in(Stage::Matching, IdeaStatus::Matched)
                .await?,
        );

        let mut report = SweepReport {
            ideas_examined: parked.len(),
            ..SweepReport::default()
        };

        for idea in parked {
            if self.store.matches_for(idea.id).await?.is_empty()
                && self.store.latest_evaluation(idea.id).await?.is_some()
            {
                self.request_matches(idea.id, actor).await?;
                report.matches_refreshed += 1;
            }

            if self.store.decision_for(idea.id, idea.review_cycle).await?.is_none() {
                let reviews = self.store.reviews_for(idea.id).await?;
                if let Some(decision) = self.gate.decide(idea.id, &reviews, idea.review_cycle) {
                    match self.apply_decision(&idea, decision).await {
                        Ok(_) => report.decisions_recorded += 1,
                        Err(TrellisError::AlreadyDecided { .. }) => {
                            // An inline aggregation beat the sweep to it.
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        info!(
            examined = report.ideas_examined,
            matches = report.matches_refreshed,
            decisions = report.decisions_recorded,
            "sweep pass finished"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load_contract(&self, contract_id: Uuid) -> Result<Contract, TrellisError> {
        self.store
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| TrellisError::not_found("contract", contract_id.to_string()))
    }

    async fn load_escrow(&self, contract_id: Uuid) -> Result<EscrowAccount, TrellisError> {
        self.store
            .escrow_for_contract(contract_id)
            .await?
            .ok_or_else(|| TrellisError::not_found("escrow", contract_id.to_string()))
    }

    /// Auto-draft a zero-value contract shell when an idea reaches
    /// contracting. Party B defaults to the accepted counterpart when one
    /// exists; terms stay amendable until signing begins.
    async fn ensure_draft_contract(&self, idea: &IdeaRecord) -> Result<(), TrellisError> {
        let existing = self.store.contracts_for_idea(idea.id).await?;
        if existing
            .iter()
            .any(|contract| contract.status != ContractStatus::Terminated)
        {
            return Ok(());
        }

        let party_b = self
            .store
            .matches_for(idea.id)
            .await?
            .into_iter()
            .find(|record| record.status == MatchStatus::Accepted)
            .map(|record| record.candidate_id)
            .unwrap_or_else(|| "counterparty-tbd".to_string());

        let draft = ContractDraft::new(
            idea.owner.clone(),
            party_b,
            self.config.draft_contract_total_minor,
            self.config.default_currency.clone(),
        )
        .for_idea(idea.id);

        let shell = Contract::create(draft)?;
        match self.store.create_contract(shell.clone()).await {
            Ok(()) => {
                info!(idea = %idea.id, contract = %shell.id, "contract shell drafted");
                Ok(())
            }
            Err(StorageError::Conflict(message)) => {
                warn!(idea = %idea.id, %message, "contract shell already present");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Anchor the contract payload externally within the configured
    /// timeout. Failures are logged and swallowed; the domain ledger stays
    /// the source of truth.
    async fn request_anchor(&self, contract: &Contract) -> Option<String> {
        let anchor = self.anchor.as_ref()?;
        let payload = match serde_json::to_vec(contract) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(contract = %contract.id, error = %err, "anchor payload not serializable");
                return None;
            }
        };
        let digest = blake3::hash(&payload).to_hex().to_string();

        match timeout(
            self.config.anchor_timeout,
            anchor.anchor_contract(contract.id, &digest),
        )
        .await
        {
            Ok(Ok(receipt)) => Some(receipt.reference),
            Ok(Err(err)) => {
                warn!(
                    anchor = anchor.anchor_id(),
                    contract = %contract.id,
                    error = %err,
                    "anchor call failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    anchor = anchor.anchor_id(),
                    contract = %contract.id,
                    timeout = ?self.config.anchor_timeout,
                    "anchor call timed out"
                );
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_transition(
        &self,
        idea_id: Uuid,
        actor: &str,
        from: Stage,
        to: Stage,
        reason: &str,
        score: Option<u8>,
        metadata: serde_json::Value,
    ) {
        let mut log = self.log.lock().await;
        if let Err(err) = log
            .append(idea_id, actor, from, to, reason, score, metadata)
            .await
        {
            warn!(idea = %idea_id, error = %err, "transition log append failed");
        }
    }

    async fn emit_status_changed(&self, idea: &IdeaRecord, actor: &str) {
        self.emit(
            LifecycleEvent::new(events::IDEA_STATUS_CHANGED, idea.id.to_string(), actor)
                .with_detail("stage", idea.stage.name())
                .with_detail("status", idea.status.name()),
        )
        .await;
    }

    async fn emit(&self, event: LifecycleEvent) {
        for notifier in &self.notifiers {
            if let Err(err) = notifier.notify(&event).await {
                warn!(
                    notifier = notifier.notifier_id(),
                    event = %event.name,
                    error = %err,
                    "notification failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::scoring::{Criterion, ScorerOutput};
    use crate::types::CriterionScore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedScorer {
        scores: [u8; 6],
    }

    #[async_trait]
    impl Scorer for FixedScorer {
        fn scorer_id(&self) -> &'static str {
            "fixed"
        }

        async fn score(&self, _idea: &IdeaRecord) -> Result<ScorerOutput, TrellisError> {
            let criterion_scores = Criterion::ALL
                .iter()
                .zip(self.scores)
                .map(|(criterion, score)| CriterionScore {
                    criterion: criterion.name().to_string(),
                    score,
                    reasoning: String::new(),
                })
                .collect();
            Ok(ScorerOutput {
                criterion_scores,
                strengths: vec!["clear problem".to_string()],
                weaknesses: Vec::new(),
                recommendations: Vec::new(),
            })
        }
    }

    struct StalledScorer;

    #[async_trait]
    impl Scorer for StalledScorer {
        fn scorer_id(&self) -> &'static str {
            "stalled"
        }

        async fn score(&self, _idea: &IdeaRecord) -> Result<ScorerOutput, TrellisError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(TrellisError::ScoringUnavailable("unreachable".to_string()))
        }
    }

    struct RecordingNotifier {
        seen: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn names(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn notifier_id(&self) -> &'static str {
            "recording"
        }

        async fn notify(&self, event: &LifecycleEvent) -> Result<(), TrellisError> {
            self.seen.lock().unwrap().push(event.name.clone());
            Ok(())
        }
    }

    struct FixedAnchor {
        calls: Mutex<usize>,
    }

    impl FixedAnchor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Anchor for FixedAnchor {
        fn anchor_id(&self) -> &'static str {
            "fixed-anchor"
        }

        async fn anchor_contract(
            &self,
            contract_id: Uuid,
            _payload_hash: &str,
        ) -> Result<crate::connectors::AnchorReceipt, TrellisError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Ok(crate::connectors::AnchorReceipt {
                anchor_id: "fixed-anchor".to_string(),
                reference: format!("anchor-{}-{contract_id}", *calls),
            })
        }
    }

    struct FailingAnchor;

    #[async_trait]
    impl Anchor for FailingAnchor {
        fn anchor_id(&self) -> &'static str {
            "failing-anchor"
        }

        async fn anchor_contract(
            &self,
            _contract_id: Uuid,
            _payload_hash: &str,
        ) -> Result<crate::connectors::AnchorReceipt, TrellisError> {
            Err(TrellisError::AnchorFailure {
                anchor: "failing-anchor".to_string(),
                message: "endpoint unreachable".to_string(),
            })
        }
    }

    async fn engine_on(
        store: Arc<MemoryStore>,
        scorer: Arc<dyn Scorer>,
    ) -> LifecycleEngine {
        LifecycleEngine::bootstrap(
            store,
            scorer,
            EngineConfig::default(),
            LogStorageConfig::memory(),
        )
        .await
        .unwrap()
    }

    fn submission() -> IdeaSubmission {
        IdeaSubmission::new(
            "alice",
            "Cold-chain telemetry mesh",
            "Low-power sensor mesh that tracks temperature excursions across cold-chain handoffs and flags spoilage risk early.",
        )
        .with_category("logistics")
        .with_tags(vec!["iot".to_string(), "cold-chain".to_string()])
    }

    async fn promoted_idea(engine: &LifecycleEngine) -> IdeaRecord {
        let idea = engine.submit_idea(submission()).await.unwrap();
        engine.evaluate_idea(idea.id, "alice").await.unwrap();
        engine.get_idea(idea.id).await.unwrap()
    }

    async fn approve(engine: &LifecycleEngine, idea_id: Uuid) {
        engine
            .submit_review(idea_id, "lena", ReviewRole::Legal, 80, "no licensing risk")
            .await
            .unwrap();
        engine
            .submit_review(idea_id, "theo", ReviewRole::Technical, 75, "")
            .await
            .unwrap();
        engine
            .submit_review(idea_id, "cora", ReviewRole::Commercial, 65, "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn thin_submission_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;

        let err = engine
            .submit_idea(IdeaSubmission::new("alice", "Short", "too thin"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn high_scoring_idea_promotes_to_matching() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;

        let idea = engine.submit_idea(submission()).await.unwrap();
        let evaluation = engine.evaluate_idea(idea.id, "alice").await.unwrap();

        assert_eq!(evaluation.overall_score, 85);
        assert_eq!(
            evaluation.classification,
            crate::types::ClassificationPath::Innovation
        );

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.stage, Stage::Matching);
        assert_eq!(idea.status, IdeaStatus::Evaluating);

        let stored = engine.latest_evaluation(idea.id).await.unwrap().unwrap();
        assert_eq!(stored.id, evaluation.id);

        let transitions = engine.transitions_for(idea.id).await;
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].reason.contains("promoted to matching"));
        assert_eq!(transitions[0].score, Some(85));
        assert!(engine.verify_transition_log().await);
    }

    #[tokio::test]
    async fn guidance_idea_stays_in_origination() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [40; 6] })).await;

        let idea = engine.submit_idea(submission()).await.unwrap();
        let evaluation = engine.evaluate_idea(idea.id, "alice").await.unwrap();
        assert_eq!(
            evaluation.classification,
            crate::types::ClassificationPath::Guidance
        );

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.stage, Stage::Origination);
        assert_eq!(idea.status, IdeaStatus::Submitted);
        assert!(engine.transitions_for(idea.id).await.is_empty());
    }

    #[tokio::test]
    async fn stalled_scorer_surfaces_as_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            scoring_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let engine = LifecycleEngine::bootstrap(
            store,
            Arc::new(StalledScorer),
            config,
            LogStorageConfig::memory(),
        )
        .await
        .unwrap();

        let idea = engine.submit_idea(submission()).await.unwrap();
        let err = engine.evaluate_idea(idea.id, "alice").await.unwrap_err();
        assert!(matches!(err, TrellisError::ScoringUnavailable(_)));

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.stage, Stage::Origination);
        assert_eq!(idea.status, IdeaStatus::Submitted);
    }

    #[tokio::test]
    async fn full_review_set_approves_and_drafts_contract_shell() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;
        let idea = promoted_idea(&engine).await;

        let first = engine
            .submit_review(idea.id, "lena", ReviewRole::Legal, 80, "")
            .await
            .unwrap();
        assert!(first.decision.is_none());

        engine
            .submit_review(idea.id, "theo", ReviewRole::Technical, 75, "")
            .await
            .unwrap();
        let last = engine
            .submit_review(idea.id, "cora", ReviewRole::Commercial, 65, "")
            .await
            .unwrap();

        let decision = last.decision.expect("third review completes the set");
        assert_eq!(decision.average, 73);
        assert_eq!(decision.verdict, DecisionVerdict::Approved);
        assert_eq!(engine.reviews_for(idea.id).await.unwrap().len(), 3);
        assert_eq!(engine.decisions_for(idea.id).await.unwrap().len(), 1);

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.stage, Stage::Contracting);
        assert_eq!(idea.status, IdeaStatus::Approved);

        let contracts = engine.store.contracts_for_idea(idea.id).await.unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].party_a, "alice");
        assert_eq!(contracts[0].status, ContractStatus::Draft);
        assert_eq!(contracts[0].total_value_minor, 0);

        let transitions = engine.transitions_for(idea.id).await;
        assert_eq!(transitions.len(), 2);
        assert!(transitions[1].reason.contains("Approved by Diamond Decision Point"));
    }

    #[tokio::test]
    async fn low_average_rejects_back_to_origination() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;
        let idea = promoted_idea(&engine).await;

        engine
            .submit_review(idea.id, "lena", ReviewRole::Legal, 40, "licensing unclear")
            .await
            .unwrap();
        engine
            .submit_review(idea.id, "theo", ReviewRole::Technical, 45, "")
            .await
            .unwrap();
        let last = engine
            .submit_review(idea.id, "cora", ReviewRole::Commercial, 50, "")
            .await
            .unwrap();

        let decision = last.decision.unwrap();
        assert_eq!(decision.average, 45);
        assert_eq!(decision.verdict, DecisionVerdict::Rejected);

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.stage, Stage::Origination);
        assert_eq!(idea.status, IdeaStatus::Rejected);
        assert_eq!(idea.review_cycle, 1);
        assert!(!idea.feedback.is_empty());

        let transitions = engine.transitions_for(idea.id).await;
        assert_eq!(transitions.len(), 2);
        assert!(transitions[1].reason.contains("Feedback Loop"));
        assert!(engine.verify_transition_log().await);
    }

    #[tokio::test]
    async fn middling_average_reopens_the_review_cycle() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;
        let idea = promoted_idea(&engine).await;

        engine
            .submit_review(idea.id, "lena", ReviewRole::Legal, 60, "tighten claims")
            .await
            .unwrap();
        engine
            .submit_review(idea.id, "theo", ReviewRole::Technical, 65, "")
            .await
            .unwrap();
        let last = engine
            .submit_review(idea.id, "cora", ReviewRole::Commercial, 60, "")
            .await
            .unwrap();

        let decision = last.decision.unwrap();
        assert_eq!(decision.verdict, DecisionVerdict::NeedsRevision);

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.stage, Stage::Matching);
        assert_eq!(idea.review_cycle, 1);
        assert!(idea.feedback.iter().any(|entry| entry.contains("tighten claims")));

        // The reopened cycle accepts a fresh legal review.
        engine
            .submit_review(idea.id, "lena", ReviewRole::Legal, 75, "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_role_review_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;
        let idea = promoted_idea(&engine).await;

        engine
            .submit_review(idea.id, "lena", ReviewRole::Legal, 80, "")
            .await
            .unwrap();
        let err = engine
            .submit_review(idea.id, "other", ReviewRole::Legal, 70, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn lost_decision_race_surfaces_as_already_decided() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone(), Arc::new(FixedScorer { scores: [85; 6] })).await;
        let idea = promoted_idea(&engine).await;

        engine
            .submit_review(idea.id, "lena", ReviewRole::Legal, 80, "")
            .await
            .unwrap();
        engine
            .submit_review(idea.id, "theo", ReviewRole::Technical, 75, "")
            .await
            .unwrap();

        // A concurrent aggregator wins the create-if-absent write just
        // before the third review triggers the inline aggregation.
        let racing = Decision {
            id: Uuid::new_v4(),
            idea_id: idea.id,
            legal_score: 80,
            technical_score: 75,
            commercial_score: 65,
            average: 73,
            verdict: DecisionVerdict::Approved,
            feedback: String::new(),
            cycle: 0,
            decided_at: Utc::now(),
        };
        store.create_decision(racing).await.unwrap();

        let err = engine
            .submit_review(idea.id, "cora", ReviewRole::Commercial, 65, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::AlreadyDecided { .. }));
    }

    #[tokio::test]
    async fn matching_persists_a_deterministic_ranking() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;

        engine
            .upsert_candidate(
                CandidateProfile::new("cand-a", "Northwind Ventures")
                    .with_tags(vec!["iot".to_string(), "cold-chain".to_string()])
                    .with_industries(vec!["logistics".to_string()])
                    .with_scores(85, 85),
            )
            .await
            .unwrap();
        engine
            .upsert_candidate(
                CandidateProfile::new("cand-b", "Harbor Labs")
                    .with_tags(vec!["iot".to_string(), "cold-chain".to_string()])
                    .with_industries(vec!["logistics".to_string()])
                    .with_scores(85, 85),
            )
            .await
            .unwrap();
        engine
            .upsert_candidate(
                CandidateProfile::new("cand-weak", "Quiet Office Co")
                    .with_tags(vec!["stationery".to_string()])
                    .with_scores(10, 10),
            )
            .await
            .unwrap();

        let idea = promoted_idea(&engine).await;

        // Promotion already ran a matching pass against the registered pool.
        let seeded = engine.matches_for(idea.id).await.unwrap();
        assert_eq!(seeded.len(), 2);

        let matches = engine.request_matches(idea.id, "alice").await.unwrap();
        assert_eq!(matches.len(), 2, "weak candidate stays below the threshold");
        assert_eq!(matches[0].candidate_id, "cand-a");
        assert_eq!(matches[1].candidate_id, "cand-b");
        assert_eq!(matches[0].score, matches[1].score);

        // A second pass re-scores in place without duplicating rows.
        let again = engine.request_matches(idea.id, "alice").await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].id, matches[0].id);
    }

    #[tokio::test]
    async fn matching_outside_matching_stage_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;

        let idea = engine.submit_idea(submission()).await.unwrap();
        let err = engine.request_matches(idea.id, "alice").await.unwrap_err();
        assert!(matches!(err, TrellisError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn match_response_is_party_scoped_and_single_shot() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;

        engine
            .upsert_candidate(
                CandidateProfile::new("cand-a", "Northwind Ventures")
                    .with_tags(vec!["iot".to_string(), "cold-chain".to_string()])
                    .with_industries(vec!["logistics".to_string()])
                    .with_scores(85, 85),
            )
            .await
            .unwrap();

        let idea = promoted_idea(&engine).await;
        let matches = engine.request_matches(idea.id, "alice").await.unwrap();
        let match_id = matches[0].id;

        let err = engine
            .respond_match(match_id, "stranger", true)
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Unauthorized { .. }));

        let accepted = engine.respond_match(match_id, "cand-a", true).await.unwrap();
        assert_eq!(accepted.status, MatchStatus::Accepted);
        assert!(accepted.responded_at.is_some());

        let idea = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea.status, IdeaStatus::Matched);

        let err = engine.respond_match(match_id, "alice", false).await.unwrap_err();
        assert!(matches!(err, TrellisError::Storage(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn contract_settles_escrow_and_completes_the_idea() {
        let store = Arc::new(MemoryStore::new());
        let notifier = RecordingNotifier::new();
        let anchor = FixedAnchor::new();
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] }))
            .await
            .with_anchor(anchor.clone())
            .with_notifier(notifier.clone());

        let idea = promoted_idea(&engine).await;
        approve(&engine, idea.id).await;

        let shell = engine.store.contracts_for_idea(idea.id).await.unwrap();
        let contract_id = shell[0].id;

        let amended = engine
            .amend_contract_terms(
                contract_id,
                "alice",
                TermsUpdate {
                    party_b: Some("bob".to_string()),
                    total_value_minor: 100_000,
                    currency: None,
                    milestones: vec![
                        Milestone::new("discovery", 30_000),
                        Milestone::new("build", 40_000),
                        Milestone::new("handover", 30_000),
                    ],
                },
            )
            .await
            .unwrap();
        assert_eq!(amended.party_b, "bob");

        let after_first = engine.sign_contract(contract_id, "alice", "sig-a").await.unwrap();
        assert_eq!(after_first.status, ContractStatus::Draft);

        let active = engine.sign_contract(contract_id, "bob", "sig-b").await.unwrap();
        assert_eq!(active.status, ContractStatus::Active);
        assert!(active.anchor_ref.is_some());

        let idea_now = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea_now.status, IdeaStatus::Contracted);

        engine.record_deposit(contract_id, "alice", 100_000).await.unwrap();

        let first = engine.complete_milestone(contract_id, "bob", 0).await.unwrap();
        assert_eq!(first.released_minor, 30_000);
        assert!(!first.contract_completed);

        engine.complete_milestone(contract_id, "alice", 1).await.unwrap();
        let last = engine.complete_milestone(contract_id, "bob", 2).await.unwrap();
        assert!(last.contract_completed);
        assert_eq!(last.escrow_status, crate::types::EscrowStatus::FullyReleased);

        let idea_done = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea_done.stage, Stage::Completed);
        assert_eq!(idea_done.status, IdeaStatus::Completed);

        // The completed contract was anchored a second time.
        let settled = engine.get_contract(contract_id, "alice").await.unwrap();
        assert_eq!(settled.status, ContractStatus::Completed);
        assert_eq!(
            settled.anchor_ref,
            Some(format!("anchor-2-{contract_id}"))
        );

        let statement = engine.escrow_statement(contract_id, "alice").await.unwrap();
        assert_eq!(statement.entries.len(), 4, "one deposit plus three releases");

        let transitions = engine.transitions_for(idea.id).await;
        assert_eq!(transitions.len(), 3);
        assert!(transitions[2].reason.contains("All milestones released"));
        assert!(engine.verify_transition_log().await);

        let names = notifier.names();
        assert!(names.contains(&events::CONTRACT_ACTIVATED.to_string()));
        assert_eq!(
            names
                .iter()
                .filter(|name| name.as_str() == events::ESCROW_RELEASED)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn anchor_failure_never_blocks_activation() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] }))
            .await
            .with_anchor(Arc::new(FailingAnchor));

        let idea = promoted_idea(&engine).await;
        approve(&engine, idea.id).await;
        let contract_id = engine.store.contracts_for_idea(idea.id).await.unwrap()[0].id;

        engine
            .amend_contract_terms(
                contract_id,
                "alice",
                TermsUpdate {
                    party_b: Some("bob".to_string()),
                    total_value_minor: 50_000,
                    currency: None,
                    milestones: vec![Milestone::new("all", 50_000)],
                },
            )
            .await
            .unwrap();
        engine.sign_contract(contract_id, "alice", "sig-a").await.unwrap();
        let active = engine.sign_contract(contract_id, "bob", "sig-b").await.unwrap();

        assert_eq!(active.status, ContractStatus::Active);
        assert!(active.anchor_ref.is_none());
    }

    #[tokio::test]
    async fn termination_refunds_unreleased_balance() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store, Arc::new(FixedScorer { scores: [85; 6] })).await;

        let idea = promoted_idea(&engine).await;
        approve(&engine, idea.id).await;
        let contract_id = engine.store.contracts_for_idea(idea.id).await.unwrap()[0].id;

        engine
            .amend_contract_terms(
                contract_id,
                "alice",
                TermsUpdate {
                    party_b: Some("bob".to_string()),
                    total_value_minor: 100_000,
                    currency: None,
                    milestones: vec![
                        Milestone::new("discovery", 30_000),
                        Milestone::new("build", 70_000),
                    ],
                },
            )
            .await
            .unwrap();
        engine.sign_contract(contract_id, "alice", "sig-a").await.unwrap();
        engine.sign_contract(contract_id, "bob", "sig-b").await.unwrap();
        engine.complete_milestone(contract_id, "bob", 0).await.unwrap();

        let terminated = engine
            .terminate_contract(contract_id, "alice", Some("scope collapsed".to_string()))
            .await
            .unwrap();
        assert_eq!(terminated.status, ContractStatus::Terminated);

        let statement = engine.escrow_statement(contract_id, "alice").await.unwrap();
        assert_eq!(statement.account.status, crate::types::EscrowStatus::Refunded);
        let refund = statement
            .entries
            .iter()
            .find(|entry| entry.kind == crate::types::EscrowEntryKind::Refund)
            .unwrap();
        assert_eq!(refund.amount_minor, 70_000);

        let err = engine
            .sign_contract(contract_id, "alice", "sig-again")
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn sweep_finishes_work_left_behind() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone(), Arc::new(FixedScorer { scores: [85; 6] })).await;

        let idea = promoted_idea(&engine).await;

        // The candidate pool was empty when the idea was promoted; the
        // sweep picks up the pairing once the candidate registers.
        engine
            .upsert_candidate(
                CandidateProfile::new("cand-a", "Northwind Ventures")
                    .with_tags(vec!["iot".to_string(), "cold-chain".to_string()])
                    .with_industries(vec!["logistics".to_string()])
                    .with_scores(85, 85),
            )
            .await
            .unwrap();

        // Reviews landed in storage without an inline aggregation, as after
        // a crash between the review write and the decision write.
        for (reviewer, role, score) in [
            ("lena", ReviewRole::Legal, 80),
            ("theo", ReviewRole::Technical, 75),
            ("cora", ReviewRole::Commercial, 65),
        ] {
            store
                .add_review(ExpertReview::new(idea.id, reviewer, role, score, "", 0))
                .await
                .unwrap();
        }

        let report = engine.run_sweep("sweeper").await.unwrap();
        assert_eq!(report.ideas_examined, 1);
        assert_eq!(report.matches_refreshed, 1);
        assert_eq!(report.decisions_recorded, 1);

        let idea_now = engine.get_idea(idea.id).await.unwrap();
        assert_eq!(idea_now.stage, Stage::Contracting);

        // Nothing left for a second pass.
        let again = engine.run_sweep("sweeper").await.unwrap();
        assert_eq!(again.matches_refreshed, 0);
        assert_eq!(again.decisions_recorded, 0);
    }
}
