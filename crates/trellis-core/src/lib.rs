//! Trellis core implementation.
//!
//! This crate enforces the gated idea lifecycle with explicit stage guards,
//! deterministic scoring and matching, a multi-role decision gate, a
//! milestone escrow ledger, and a hash-chained transition log.

#![deny(unsafe_code)]

pub mod config;
pub mod connectors;
pub mod contract;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod limit;
pub mod matching;
pub mod memory;
pub mod review;
pub mod runtime;
pub mod scoring;
pub mod storage;
pub mod types;

pub use config::{CriterionWeights, EngineConfig, ThresholdConfig};
pub use connectors::{Anchor, AnchorReceipt, Notifier};
pub use contract::{ContractDraft, MilestoneRelease, SignOutcome, Termination};
pub use error::TrellisError;
pub use ledger::{LogStorageConfig, PersistentTransitionLog, TransitionEntry, TransitionLog};
pub use limit::RateLimiter;
pub use matching::{MatchingEngine, RequesterProfile, ScoredMatch};
pub use memory::MemoryStore;
pub use review::{DecisionGate, RoleScores};
pub use runtime::{
    EscrowStatement, LifecycleEngine, ReviewOutcome, SweepReport, TermsUpdate,
};
pub use scoring::{Criterion, Scorer, ScorerOutput, ScoringEngine};
pub use storage::{PlatformStore, QueryWindow, StorageError, StorageResult};
pub use types::{
    CandidateProfile, ClassificationPath, Contract, ContractStatus, CriterionScore, Decision,
    DecisionVerdict, EscrowAccount, EscrowEntryKind, EscrowStatus, EscrowTransaction, Evaluation,
    ExpertReview, IdeaRecord, IdeaStatus, IdeaSubmission, LifecycleEvent, MatchRecord,
    MatchStatus, Milestone, MilestoneStatus, PartySignature, ReviewRole, Stage,
};
