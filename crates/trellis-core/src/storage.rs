use crate::types::{
    CandidateProfile, Contract, Decision, EscrowAccount, EscrowTransaction, Evaluation,
    ExpertReview, IdeaRecord, IdeaStatus, MatchRecord, MatchStatus, Stage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors. Conditional-write failures surface as `Conflict`
/// so callers can distinguish races from genuine faults.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Generic query window for paged reads. A zero limit means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

/// Storage interface for idea lifecycle records.
#[async_trait]
pub trait IdeaStore: Send + Sync {
    async fn create_idea(&self, idea: IdeaRecord) -> StorageResult<()>;

    async fn get_idea(&self, id: Uuid) -> StorageResult<Option<IdeaRecord>>;

    /// List ideas newest-first.
    async fn list_ideas(&self, window: QueryWindow) -> StorageResult<Vec<IdeaRecord>>;

    /// Conditional stage move: succeeds only while the record still sits at
    /// `expected_from`. A lost race surfaces as `Conflict`, never as a
    /// silent double transition.
    async fn move_stage(
        &self,
        id: Uuid,
        expected_from: Stage,
        to: Stage,
        status: IdeaStatus,
    ) -> StorageResult<IdeaRecord>;

    async fn set_status(&self, id: Uuid, status: IdeaStatus) -> StorageResult<IdeaRecord>;

    async fn append_feedback(&self, id: Uuid, entry: String) -> StorageResult<()>;

    /// Bump the review cycle after a needs-revision or rejection verdict;
    /// returns the new cycle number.
    async fn bump_review_cycle(&self, id: Uuid) -> StorageResult<u32>;

    /// Ideas currently sitting at a stage with a status (sweep source).
    async fn ideas_in(&self, stage: Stage, status: IdeaStatus) -> StorageResult<Vec<IdeaRecord>>;
}

/// Storage interface for immutable evaluation rows.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn record_evaluation(&self, evaluation: Evaluation) -> StorageResult<()>;
    async fn latest_evaluation(&self, idea_id: Uuid) -> StorageResult<Option<Evaluation>>;
}

/// Storage interface for expert reviews.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Insert-if-absent keyed by (idea, cycle, role); a second review for
    /// the same key fails with `Conflict`.
    async fn add_review(&self, review: ExpertReview) -> StorageResult<()>;

    async fn reviews_for(&self, idea_id: Uuid) -> StorageResult<Vec<ExpertReview>>;
}

/// Storage interface for decision gate outcomes.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Create-if-absent keyed by (idea, cycle); the duplicate-decision
    /// guard for concurrent aggregation attempts.
    async fn create_decision(&self, decision: Decision) -> StorageResult<()>;

    async fn decision_for(&self, idea_id: Uuid, cycle: u32) -> StorageResult<Option<Decision>>;

    async fn list_decisions(&self, idea_id: Uuid) -> StorageResult<Vec<Decision>>;
}

/// Storage interface for persisted matches.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Merge one matching pass into the persisted set, keyed by
    /// (idea, candidate). Pending rows are refreshed with the new score;
    /// rows a party already responded to are left untouched.
    async fn upsert_matches(
        &self,
        idea_id: Uuid,
        matches: Vec<MatchRecord>,
    ) -> StorageResult<Vec<MatchRecord>>;

    async fn get_match(&self, match_id: Uuid) -> StorageResult<Option<MatchRecord>>;

    async fn matches_for(&self, idea_id: Uuid) -> StorageResult<Vec<MatchRecord>>;

    /// Conditional response write: only a pending match can move to
    /// accepted/rejected; anything else is a `Conflict`.
    async fn respond_match(
        &self,
        match_id: Uuid,
        status: MatchStatus,
        responded_at: DateTime<Utc>,
    ) -> StorageResult<MatchRecord>;
}

/// Storage interface for counterpart candidate profiles.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn upsert_candidate(&self, candidate: CandidateProfile) -> StorageResult<()>;
    async fn list_candidates(&self) -> StorageResult<Vec<CandidateProfile>>;
}

/// Storage interface for contracts, escrow accounts, and the escrow journal.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Insert a contract. At most one non-terminated contract may reference
    /// a given idea; a second one fails with `Conflict`.
    async fn create_contract(&self, contract: Contract) -> StorageResult<()>;

    async fn get_contract(&self, id: Uuid) -> StorageResult<Option<Contract>>;

    async fn contracts_for_idea(&self, idea_id: Uuid) -> StorageResult<Vec<Contract>>;

    /// Optimistic replace: `expected_version` is the version the caller
    /// read; a mismatch means a concurrent writer won and the caller must
    /// re-read. The incoming record carries the already-bumped version.
    async fn update_contract(
        &self,
        contract: Contract,
        expected_version: u64,
    ) -> StorageResult<()>;

    async fn create_escrow(&self, escrow: EscrowAccount) -> StorageResult<()>;

    async fn escrow_for_contract(&self, contract_id: Uuid)
        -> StorageResult<Option<EscrowAccount>>;

    /// Optimistic replace with the same convention as `update_contract`.
    /// This is the serialization point for the released-balance invariant.
    async fn update_escrow(
        &self,
        escrow: EscrowAccount,
        expected_version: u64,
    ) -> StorageResult<()>;

    async fn append_escrow_entry(&self, entry: EscrowTransaction) -> StorageResult<()>;

    async fn escrow_entries(&self, escrow_id: Uuid) -> StorageResult<Vec<EscrowTransaction>>;
}

/// Unified storage bundle the orchestrator runs against.
pub trait PlatformStore:
    IdeaStore
    + EvaluationStore
    + ReviewStore
    + DecisionStore
    + MatchStore
    + CandidateStore
    + ContractStore
    + Send
    + Sync
{
}

impl<T> PlatformStore for T where
    T: IdeaStore
        + EvaluationStore
        + ReviewStore
        + DecisionStore
        + MatchStore
        + CandidateStore
        + ContractStore
        + Send
        + Sync
{
}
