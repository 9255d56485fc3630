use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle stage an idea occupies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Origination,
    Matching,
    Contracting,
    Completed,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Origination => "origination",
            Self::Matching => "matching",
            Self::Contracting => "contracting",
            Self::Completed => "completed",
        }
    }
}

/// Business status of an idea, orthogonal to its stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    Draft,
    Submitted,
    Evaluating,
    Approved,
    Matched,
    Contracted,
    Completed,
    Rejected,
}

impl IdeaStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Evaluating => "evaluating",
            Self::Approved => "approved",
            Self::Matched => "matched",
            Self::Contracted => "contracted",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

/// Path assigned by the classifier from the overall score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPath {
    Innovation,
    Commercial,
    Guidance,
}

impl ClassificationPath {
    pub fn label(self) -> &'static str {
        match self {
            Self::Innovation => "innovation",
            Self::Commercial => "commercial",
            Self::Guidance => "guidance",
        }
    }

    /// Innovation and commercial paths may leave origination; guidance stays for rework.
    pub fn eligible_for_matching(self) -> bool {
        !matches!(self, Self::Guidance)
    }
}

/// Submission payload for a new idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaSubmission {
    pub owner: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

impl IdeaSubmission {
    pub fn new(
        owner: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            title: title.into(),
            description: description.into(),
            category: None,
            tags: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Canonical idea record moving through the lifecycle.
///
/// Mutated only by the orchestrator; never deleted, only status-transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaRecord {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub stage: Stage,
    pub status: IdeaStatus,
    /// Set when this idea re-entered origination through the feedback loop.
    pub origin_idea: Option<Uuid>,
    pub feedback: Vec<String>,
    /// Scopes review uniqueness and decision idempotency between revision rounds.
    pub review_cycle: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdeaRecord {
    pub fn from_submission(submission: IdeaSubmission) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: submission.owner,
            title: submission.title,
            description: submission.description,
            category: submission.category,
            tags: submission.tags,
            stage: Stage::Origination,
            status: IdeaStatus::Submitted,
            origin_idea: None,
            feedback: Vec::new(),
            review_cycle: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One scored criterion inside an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionScore {
    pub criterion: String,
    pub score: u8,
    pub reasoning: String,
}

/// Immutable scoring pass over an idea. Re-submission creates a new row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub idea_id: Uuid,
    pub criterion_scores: Vec<CriterionScore>,
    pub overall_score: u8,
    pub classification: ClassificationPath,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Reviewer roles required at the decision gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRole {
    Legal,
    Technical,
    Commercial,
}

impl ReviewRole {
    pub fn name(self) -> &'static str {
        match self {
            Self::Legal => "legal",
            Self::Technical => "technical",
            Self::Commercial => "commercial",
        }
    }

    pub const ALL: [ReviewRole; 3] = [Self::Legal, Self::Technical, Self::Commercial];
}

/// Expert review filed against an idea awaiting the decision gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertReview {
    pub id: Uuid,
    pub idea_id: Uuid,
    pub reviewer: String,
    pub role: ReviewRole,
    pub score: u8,
    pub notes: String,
    pub cycle: u32,
    pub submitted_at: DateTime<Utc>,
}

impl ExpertReview {
    pub fn new(
        idea_id: Uuid,
        reviewer: impl Into<String>,
        role: ReviewRole,
        score: u8,
        notes: impl Into<String>,
        cycle: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idea_id,
            reviewer: reviewer.into(),
            role,
            score: score.min(100),
            notes: notes.into(),
            cycle,
            submitted_at: Utc::now(),
        }
    }
}

/// Verdict emitted by the decision gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionVerdict {
    Approved,
    NeedsRevision,
    Rejected,
}

impl DecisionVerdict {
    pub fn name(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
            Self::Rejected => "rejected",
        }
    }
}

/// Aggregated outcome of one complete review set.
///
/// Created exactly once per idea per review cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub idea_id: Uuid,
    pub legal_score: u8,
    pub technical_score: u8,
    pub commercial_score: u8,
    pub average: u8,
    pub verdict: DecisionVerdict,
    pub feedback: String,
    pub cycle: u32,
    pub decided_at: DateTime<Utc>,
}

/// Match response state, moved only by the two involved parties.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Persisted candidate pairing that cleared the validity threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub idea_id: Uuid,
    pub candidate_id: String,
    pub score: u8,
    pub reasons: Vec<String>,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// Counterpart organization/investor profile the matching engine ranks against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub industries: Vec<String>,
    /// 0..100 average innovation score across the candidate's prior pairings.
    pub innovation_score: u8,
    /// 0..100 average feasibility score across the candidate's prior pairings.
    pub feasibility_score: u8,
    pub active: bool,
}

impl CandidateProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: Vec::new(),
            industries: Vec::new(),
            innovation_score: 50,
            feasibility_score: 50,
            active: true,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_industries(mut self, industries: Vec<String>) -> Self {
        self.industries = industries;
        self
    }

    pub fn with_scores(mut self, innovation: u8, feasibility: u8) -> Self {
        self.innovation_score = innovation.min(100);
        self.feasibility_score = feasibility.min(100);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Completed,
    Cancelled,
}

/// One payment milestone inside a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    pub amount_minor: u64,
    pub due_date: Option<DateTime<Utc>>,
    pub status: MilestoneStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn new(title: impl Into<String>, amount_minor: u64) -> Self {
        Self {
            title: title.into(),
            amount_minor,
            due_date: None,
            status: MilestoneStatus::Pending,
            completed_at: None,
        }
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Recorded party signature on a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySignature {
    pub signer: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Completed,
    Terminated,
}

impl ContractStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }
}

/// Dual-party contract with milestone-based payout schedule.
///
/// Ownership is shared: party A and party B each hold read/sign rights.
/// Milestone amounts must sum to `total_value_minor` at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub idea_id: Option<Uuid>,
    pub party_a: String,
    pub party_b: String,
    pub total_value_minor: u64,
    pub currency: String,
    pub milestones: Vec<Milestone>,
    pub party_a_signature: Option<PartySignature>,
    pub party_b_signature: Option<PartySignature>,
    pub status: ContractStatus,
    /// Most recent external anchor reference, attached at activation and
    /// refreshed at completion when the connector is available.
    pub anchor_ref: Option<String>,
    pub termination_reason: Option<String>,
    /// Optimistic concurrency version; bumped on every mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn is_party(&self, actor: &str) -> bool {
        self.party_a == actor || self.party_b == actor
    }

    pub fn fully_signed(&self) -> bool {
        self.party_a_signature.is_some() && self.party_b_signature.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    PendingDeposit,
    PartiallyReleased,
    FullyReleased,
    Refunded,
}

impl EscrowStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::PendingDeposit => "pending_deposit",
            Self::PartiallyReleased => "partially_released",
            Self::FullyReleased => "fully_released",
            Self::Refunded => "refunded",
        }
    }
}

/// Escrow account held one-to-one with an active contract.
///
/// Invariant: `0 <= released_minor <= total_minor` at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub total_minor: u64,
    pub released_minor: u64,
    pub status: EscrowStatus,
    /// Optimistic concurrency version; bumped on every balance write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowAccount {
    pub fn open(contract_id: Uuid, total_minor: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            contract_id,
            total_minor,
            released_minor: 0,
            status: EscrowStatus::PendingDeposit,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_minor(&self) -> u64 {
        self.total_minor - self.released_minor
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEntryKind {
    Deposit,
    Release,
    Refund,
}

impl EscrowEntryKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Release => "release",
            Self::Refund => "refund",
        }
    }
}

/// Append-only journal entry against an escrow account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub amount_minor: u64,
    pub kind: EscrowEntryKind,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

impl EscrowTransaction {
    pub fn new(
        escrow_id: Uuid,
        amount_minor: u64,
        kind: EscrowEntryKind,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            escrow_id,
            amount_minor,
            kind,
            note: note.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Notification payload emitted after lifecycle side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub name: String,
    pub subject: String,
    pub actor: String,
    pub detail: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            actor: actor.into(),
            detail: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// Event name catalog shared by the engine and notifier adapters.
pub mod events {
    pub const IDEA_CREATED: &str = "idea.created";
    pub const IDEA_STATUS_CHANGED: &str = "idea.status_changed";
    pub const EVALUATION_COMPLETED: &str = "evaluation.completed";
    pub const DECISION_RECORDED: &str = "decision.recorded";
    pub const MATCH_SUGGESTED: &str = "match.suggested";
    pub const MATCH_ACCEPTED: &str = "match.accepted";
    pub const CONTRACT_ACTIVATED: &str = "contract.activated";
    pub const ESCROW_RELEASED: &str = "escrow.released";
    pub const CONTRACT_TERMINATED: &str = "contract.terminated";
}
