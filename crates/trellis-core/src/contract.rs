use crate::error::TrellisError;
use crate::types::{
    Contract, ContractStatus, EscrowAccount, EscrowEntryKind, EscrowStatus, EscrowTransaction,
    Milestone, MilestoneStatus, PartySignature,
};
use chrono::Utc;
use uuid::Uuid;

/// Input for creating a contract, before validation.
#[derive(Debug, Clone)]
pub struct ContractDraft {
    pub idea_id: Option<Uuid>,
    pub party_a: String,
    pub party_b: String,
    pub total_value_minor: u64,
    pub currency: String,
    pub milestones: Vec<Milestone>,
}

impl ContractDraft {
    pub fn new(
        party_a: impl Into<String>,
        party_b: impl Into<String>,
        total_value_minor: u64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            idea_id: None,
            party_a: party_a.into(),
            party_b: party_b.into(),
            total_value_minor,
            currency: currency.into(),
            milestones: Vec::new(),
        }
    }

    pub fn for_idea(mut self, idea_id: Uuid) -> Self {
        self.idea_id = Some(idea_id);
        self
    }

    pub fn with_milestones(mut self, milestones: Vec<Milestone>) -> Self {
        self.milestones = milestones;
        self
    }
}

/// Result of recording one signature.
#[derive(Debug)]
pub enum SignOutcome {
    /// Signature stored; the counterparty has not signed yet.
    Recorded,
    /// Both signatures present; contract is now active and escrow is open.
    Activated(EscrowAccount),
}

/// Result of settling one milestone.
#[derive(Debug, Clone)]
pub struct MilestoneRelease {
    pub transaction: EscrowTransaction,
    pub released_minor: u64,
    pub escrow_status: EscrowStatus,
    pub contract_completed: bool,
}

/// Result of terminating a contract.
#[derive(Debug, Clone)]
pub struct Termination {
    pub refund: Option<EscrowTransaction>,
}

impl Contract {
    /// Validate and create a contract in `draft`.
    ///
    /// Milestone amounts must sum to the total value. A zero-value draft with
    /// no milestones is permitted as a shell to be amended before signing.
    pub fn create(draft: ContractDraft) -> Result<Self, TrellisError> {
        if draft.party_a.trim().is_empty() || draft.party_b.trim().is_empty() {
            return Err(TrellisError::InvariantViolation(
                "both contract parties must be named".to_string(),
            ));
        }
        if draft.party_a == draft.party_b {
            return Err(TrellisError::InvariantViolation(
                "contract parties must be distinct".to_string(),
            ));
        }
        validate_schedule(draft.total_value_minor, &draft.milestones)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            idea_id: draft.idea_id,
            party_a: draft.party_a,
            party_b: draft.party_b,
            total_value_minor: draft.total_value_minor,
            currency: draft.currency,
            milestones: draft.milestones,
            party_a_signature: None,
            party_b_signature: None,
            status: ContractStatus::Draft,
            anchor_ref: None,
            termination_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace value and milestone schedule while the contract is still an
    /// unsigned draft. Party A only; freezes once signing begins.
    pub fn set_terms(
        &mut self,
        actor: &str,
        party_b: Option<String>,
        total_value_minor: u64,
        currency: Option<String>,
        milestones: Vec<Milestone>,
    ) -> Result<(), TrellisError> {
        if actor != self.party_a {
            return Err(TrellisError::unauthorized(actor, "amend contract terms"));
        }
        if self.status != ContractStatus::Draft {
            return Err(TrellisError::InvariantViolation(
                "terms are amendable only while the contract is draft".to_string(),
            ));
        }
        if self.party_a_signature.is_some() || self.party_b_signature.is_some() {
            return Err(TrellisError::InvariantViolation(
                "terms are frozen once signing begins".to_string(),
            ));
        }
        validate_schedule(total_value_minor, &milestones)?;

        if let Some(party_b) = party_b {
            if party_b == self.party_a {
                return Err(TrellisError::InvariantViolation(
                    "contract parties must be distinct".to_string(),
                ));
            }
            self.party_b = party_b;
        }
        if let Some(currency) = currency {
            self.currency = currency;
        }
        self.total_value_minor = total_value_minor;
        self.milestones = milestones;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record one party's signature. Activation happens only when both
    /// signatures are present; a terminated contract never re-activates.
    pub fn sign(
        &mut self,
        actor: &str,
        signature: impl Into<String>,
    ) -> Result<SignOutcome, TrellisError> {
        if !self.is_party(actor) {
            return Err(TrellisError::unauthorized(actor, "sign this contract"));
        }
        match self.status {
            ContractStatus::Draft => {}
            ContractStatus::Terminated => {
                return Err(TrellisError::InvariantViolation(
                    "a terminated contract cannot be signed".to_string(),
                ))
            }
            ContractStatus::Active | ContractStatus::Completed => {
                return Err(TrellisError::InvariantViolation(
                    "contract is already fully signed".to_string(),
                ))
            }
        }

        let slot = if actor == self.party_a {
            &mut self.party_a_signature
        } else {
            &mut self.party_b_signature
        };
        if slot.is_some() {
            return Err(TrellisError::InvariantViolation(format!(
                "party '{actor}' has already signed"
            )));
        }
        *slot = Some(PartySignature {
            signer: actor.to_string(),
            signature: signature.into(),
            signed_at: Utc::now(),
        });
        self.version += 1;
        self.updated_at = Utc::now();

        if !self.fully_signed() {
            return Ok(SignOutcome::Recorded);
        }
        if self.milestones.is_empty() {
            return Err(TrellisError::InvariantViolation(
                "contract cannot activate without a milestone schedule".to_string(),
            ));
        }

        self.status = ContractStatus::Active;
        Ok(SignOutcome::Activated(EscrowAccount::open(
            self.id,
            self.total_value_minor,
        )))
    }

    /// Settle one pending milestone and release its amount from escrow.
    ///
    /// The release is all-or-nothing: an amount that would push `released`
    /// past `total` fails with `InsufficientBalance` before any write.
    pub fn complete_milestone(
        &mut self,
        escrow: &mut EscrowAccount,
        actor: &str,
        index: usize,
    ) -> Result<MilestoneRelease, TrellisError> {
        if !self.is_party(actor) {
            return Err(TrellisError::unauthorized(actor, "complete a milestone"));
        }
        if self.status != ContractStatus::Active {
            return Err(TrellisError::InvariantViolation(
                "milestones settle only on an active contract".to_string(),
            ));
        }
        let contract_id = self.id;
        let milestone = self.milestones.get_mut(index).ok_or_else(|| {
            TrellisError::not_found("milestone", format!("{contract_id}#{index}"))
        })?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(TrellisError::InvariantViolation(format!(
                "milestone {index} is not pending"
            )));
        }

        let amount = milestone.amount_minor;
        if amount > escrow.available_minor() {
            return Err(TrellisError::InsufficientBalance {
                contract_id: self.id.to_string(),
                requested: amount,
                available: escrow.available_minor(),
            });
        }

        let now = Utc::now();
        milestone.status = MilestoneStatus::Completed;
        milestone.completed_at = Some(now);

        escrow.released_minor += amount;
        escrow.status = release_status(escrow.released_minor, escrow.total_minor);
        escrow.version += 1;
        escrow.updated_at = now;
        self.version += 1;
        self.updated_at = now;

        let contract_completed = self
            .milestones
            .iter()
            .all(|m| m.status == MilestoneStatus::Completed);
        if contract_completed {
            self.status = ContractStatus::Completed;
        }

        let note = format!("milestone {index} released");
        Ok(MilestoneRelease {
            transaction: EscrowTransaction::new(escrow.id, amount, EscrowEntryKind::Release, note),
            released_minor: escrow.released_minor,
            escrow_status: escrow.status,
            contract_completed,
        })
    }

    /// Record a funding deposit into escrow. Party A only; never touches
    /// the released balance.
    pub fn record_deposit(
        &self,
        escrow: &EscrowAccount,
        actor: &str,
        amount_minor: u64,
    ) -> Result<EscrowTransaction, TrellisError> {
        if actor != self.party_a {
            return Err(TrellisError::unauthorized(actor, "deposit into escrow"));
        }
        if self.status != ContractStatus::Active {
            return Err(TrellisError::InvariantViolation(
                "deposits apply to an active contract".to_string(),
            ));
        }
        if amount_minor == 0 {
            return Err(TrellisError::InvariantViolation(
                "deposit amount must be positive".to_string(),
            ));
        }

        Ok(EscrowTransaction::new(
            escrow.id,
            amount_minor,
            EscrowEntryKind::Deposit,
            "funds deposited",
        ))
    }

    /// Terminate a non-completed contract. Unreleased escrow is refunded and
    /// pending milestones are cancelled.
    pub fn terminate(
        &mut self,
        escrow: Option<&mut EscrowAccount>,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Termination, TrellisError> {
        if !self.is_party(actor) {
            return Err(TrellisError::unauthorized(actor, "terminate this contract"));
        }
        match self.status {
            ContractStatus::Completed => {
                return Err(TrellisError::InvariantViolation(
                    "a completed contract cannot be terminated".to_string(),
                ))
            }
            ContractStatus::Terminated => {
                return Err(TrellisError::InvariantViolation(
                    "contract is already terminated".to_string(),
                ))
            }
            ContractStatus::Draft | ContractStatus::Active => {}
        }

        let now = Utc::now();
        self.status = ContractStatus::Terminated;
        self.termination_reason =
            Some(reason.unwrap_or_else(|| format!("terminated by '{actor}'")));
        for milestone in &mut self.milestones {
            if milestone.status == MilestoneStatus::Pending {
                milestone.status = MilestoneStatus::Cancelled;
            }
        }
        self.version += 1;
        self.updated_at = now;

        let mut refund = None;
        if let Some(escrow) = escrow {
            if escrow.status != EscrowStatus::FullyReleased {
                let remainder = escrow.available_minor();
                escrow.status = EscrowStatus::Refunded;
                escrow.version += 1;
                escrow.updated_at = now;
                refund = Some(EscrowTransaction::new(
                    escrow.id,
                    remainder,
                    EscrowEntryKind::Refund,
                    "unreleased balance refunded",
                ));
            }
        }

        Ok(Termination { refund })
    }
}

fn validate_schedule(total_value_minor: u64, milestones: &[Milestone]) -> Result<(), TrellisError> {
    if milestones.is_empty() {
        if total_value_minor != 0 {
            return Err(TrellisError::InvariantViolation(
                "a valued contract requires a milestone schedule".to_string(),
            ));
        }
        return Ok(());
    }

    let mut sum: u64 = 0;
    for (index, milestone) in milestones.iter().enumerate() {
        if milestone.amount_minor == 0 {
            return Err(TrellisError::InvariantViolation(format!(
                "milestone {index} must carry a positive amount"
            )));
        }
        sum = sum.saturating_add(milestone.amount_minor);
    }
    if sum != total_value_minor {
        return Err(TrellisError::InvariantViolation(format!(
            "milestone amounts sum to {sum}, expected total {total_value_minor}"
        )));
    }
    Ok(())
}

/// Escrow status after a release: full once the balance is exhausted.
fn release_status(released_minor: u64, total_minor: u64) -> EscrowStatus {
    if total_minor > 0 && released_minor >= total_minor {
        EscrowStatus::FullyReleased
    } else if released_minor > 0 {
        EscrowStatus::PartiallyReleased
    } else {
        EscrowStatus::PendingDeposit
    }
}
