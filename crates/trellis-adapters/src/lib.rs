//! Capability adapters for Trellis.
//!
//! Deterministic scorer and anchor implementations for local runs and tests,
//! plus the webhook notifier used in real deployments.

#![deny(unsafe_code)]

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};
use trellis_core::connectors::{Anchor, AnchorReceipt, Notifier};
use trellis_core::error::TrellisError;
use trellis_core::scoring::{Criterion, Scorer, ScorerOutput};
use trellis_core::types::{CriterionScore, IdeaRecord, LifecycleEvent};
use uuid::Uuid;

const NOVELTY_SIGNALS: &[&str] = &[
    "novel", "new", "first", "unique", "patent", "breakthrough", "unlike",
];
const IMPACT_SIGNALS: &[&str] = &[
    "impact", "reduce", "improve", "save", "increase", "prevent", "risk",
];
const FEASIBILITY_SIGNALS: &[&str] = &[
    "prototype", "proven", "existing", "tested", "pilot", "standard", "available",
];
const COMMERCIAL_SIGNALS: &[&str] = &[
    "market", "revenue", "customer", "pricing", "sales", "demand", "subscription",
];
const SCALABILITY_SIGNALS: &[&str] = &[
    "scale", "global", "platform", "automate", "network", "replicate", "fleet",
];
const SUSTAINABILITY_SIGNALS: &[&str] = &[
    "sustainab", "renewable", "waste", "carbon", "recycl", "energy", "circular",
];

/// Deterministic lexical scorer.
///
/// Scores each criterion from stable text features of the submission: depth
/// of the description, tag breadth, and substring keyword signals. The same
/// idea always produces the same output, which keeps classification and the
/// downstream gates reproducible.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    fn signals_for(criterion: Criterion) -> &'static [&'static str] {
        match criterion {
            Criterion::Novelty => NOVELTY_SIGNALS,
            Criterion::Impact => IMPACT_SIGNALS,
            Criterion::Feasibility => FEASIBILITY_SIGNALS,
            Criterion::Commercial => COMMERCIAL_SIGNALS,
            Criterion::Scalability => SCALABILITY_SIGNALS,
            Criterion::Sustainability => SUSTAINABILITY_SIGNALS,
        }
    }

    fn base_score(idea: &IdeaRecord) -> u8 {
        let words = idea.description.split_whitespace().count().min(150);
        let depth = (words / 5) as u8;
        let breadth = (idea.tags.len() * 4).min(12) as u8;
        let category = if idea.category.is_some() { 5 } else { 0 };
        38 + depth + breadth + category
    }
}

#[async_trait]
impl Scorer for HeuristicScorer {
    fn scorer_id(&self) -> &'static str {
        "heuristic"
    }

    async fn score(&self, idea: &IdeaRecord) -> Result<ScorerOutput, TrellisError> {
        let mut corpus = format!("{} {}", idea.title, idea.description).to_lowercase();
        for tag in &idea.tags {
            corpus.push(' ');
            corpus.push_str(&tag.to_lowercase());
        }

        let base = Self::base_score(idea);
        let mut criterion_scores = Vec::with_capacity(Criterion::ALL.len());
        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();

        for criterion in Criterion::ALL {
            let hits = Self::signals_for(criterion)
                .iter()
                .filter(|signal| corpus.contains(**signal))
                .count() as u8;
            let score = base.saturating_add(hits * 5).min(100);

            if score >= 70 {
                strengths.push(format!("strong {} profile", criterion.name()));
            } else if score <= 45 {
                weaknesses.push(format!("weak {} signal", criterion.name()));
            }
            criterion_scores.push(CriterionScore {
                criterion: criterion.name().to_string(),
                score,
                reasoning: format!("{hits} lexical signals against a base of {base}"),
            });
        }

        let mut recommendations = Vec::new();
        if idea.description.split_whitespace().count() < 80 {
            recommendations
                .push("Expand the description with concrete delivery detail".to_string());
        }
        if idea.tags.len() < 2 {
            recommendations.push("Tag the idea to improve counterpart matching".to_string());
        }
        if !COMMERCIAL_SIGNALS.iter().any(|signal| corpus.contains(signal)) {
            recommendations.push("Describe the commercial model".to_string());
        }

        Ok(ScorerOutput {
            criterion_scores,
            strengths,
            weaknesses,
            recommendations,
        })
    }
}

/// Scorer that always reports its capability as down. Used to exercise the
/// degraded-scoring path in drills.
#[derive(Debug, Clone)]
pub struct UnavailableScorer {
    reason: String,
}

impl UnavailableScorer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Scorer for UnavailableScorer {
    fn scorer_id(&self) -> &'static str {
        "unavailable"
    }

    async fn score(&self, _idea: &IdeaRecord) -> Result<ScorerOutput, TrellisError> {
        Err(TrellisError::ScoringUnavailable(self.reason.clone()))
    }
}

/// Mock anchor for deterministic local activation receipts.
#[derive(Debug, Clone, Default)]
pub struct MockAnchor;

#[async_trait]
impl Anchor for MockAnchor {
    fn anchor_id(&self) -> &'static str {
        "mock-anchor"
    }

    async fn anchor_contract(
        &self,
        contract_id: Uuid,
        payload_hash: &str,
    ) -> Result<AnchorReceipt, TrellisError> {
        let short_contract: String = contract_id.simple().to_string().chars().take(8).collect();
        let short_hash: String = payload_hash.chars().take(8).collect();
        Ok(AnchorReceipt {
            anchor_id: self.anchor_id().to_string(),
            reference: format!("mock-{short_contract}-{short_hash}"),
        })
    }
}

/// Deterministic failing anchor useful for chaos testing.
#[derive(Debug, Clone)]
pub struct FailingAnchor {
    reason: String,
}

impl FailingAnchor {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Anchor for FailingAnchor {
    fn anchor_id(&self) -> &'static str {
        "failing-anchor"
    }

    async fn anchor_contract(
        &self,
        _contract_id: Uuid,
        _payload_hash: &str,
    ) -> Result<AnchorReceipt, TrellisError> {
        Err(TrellisError::AnchorFailure {
            anchor: self.anchor_id().to_string(),
            message: self.reason.clone(),
        })
    }
}

/// Notifier that writes lifecycle events to the structured log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    fn notifier_id(&self) -> &'static str {
        "tracing"
    }

    async fn notify(&self, event: &LifecycleEvent) -> Result<(), TrellisError> {
        info!(
            event = %event.name,
            subject = %event.subject,
            actor = %event.actor,
            "lifecycle event"
        );
        Ok(())
    }
}

const SIGNATURE_HEADER: &str = "x-trellis-signature";
const WEBHOOK_KEY_CONTEXT: &str = "trellis webhook signing v1";
const DELIVERY_ATTEMPTS: u32 = 3;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook notifier with keyed-hash payload signatures.
///
/// `notify` hands the payload to a background delivery task and returns
/// immediately; the task retries with doubling backoff before giving up.
/// Receivers verify the signature header against the shared secret.
pub struct WebhookNotifier {
    endpoint: String,
    key: [u8; 32],
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self, TrellisError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|err| TrellisError::NotifierFailure {
                notifier: "webhook".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            endpoint: endpoint.into(),
            key: blake3::derive_key(WEBHOOK_KEY_CONTEXT, secret.as_ref()),
            client,
        })
    }

    fn sign(&self, body: &[u8]) -> String {
        blake3::keyed_hash(&self.key, body).to_hex().to_string()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn notifier_id(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, event: &LifecycleEvent) -> Result<(), TrellisError> {
        let body = serde_json::to_vec(event)
            .map_err(|err| TrellisError::Serialization(err.to_string()))?;
        let signature = self.sign(&body);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let event_name = event.name.clone();

        tokio::spawn(async move {
            let mut delay = Duration::from_secs(1);
            for attempt in 1..=DELIVERY_ATTEMPTS {
                let sent = client
                    .post(&endpoint)
                    .header(SIGNATURE_HEADER, &signature)
                    .header("content-type", "application/json")
                    .body(body.clone())
                    .send()
                    .await;
                match sent {
                    Ok(response) if response.status().is_success() => return,
                    Ok(response) => warn!(
                        event = %event_name,
                        status = %response.status(),
                        attempt,
                        "webhook delivery refused"
                    ),
                    Err(err) => warn!(
                        event = %event_name,
                        error = %err,
                        attempt,
                        "webhook delivery failed"
                    ),
                }
                if attempt < DELIVERY_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            warn!(event = %event_name, "webhook delivery abandoned");
        });

        Ok(())
    }
}
