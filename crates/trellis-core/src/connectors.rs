use crate::error::TrellisError;
use crate::types::LifecycleEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proof of an external anchoring call for a contract event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnchorReceipt {
    pub anchor_id: String,
    pub reference: String,
}

/// Pluggable external anchoring capability.
///
/// Called on contract activation and completion. The domain ledger stays the
/// source of truth: an anchor failure is logged, never propagated into the
/// triggering transition.
#[async_trait]
pub trait Anchor: Send + Sync {
    fn anchor_id(&self) -> &'static str;

    async fn anchor_contract(
        &self,
        contract_id: Uuid,
        payload_hash: &str,
    ) -> Result<AnchorReceipt, TrellisError>;
}

/// Pluggable notification capability for lifecycle events.
///
/// Delivery is best effort; a failed notification never rolls back the
/// transition that produced the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn notifier_id(&self) -> &'static str;

    async fn notify(&self, event: &LifecycleEvent) -> Result<(), TrellisError>;
}
