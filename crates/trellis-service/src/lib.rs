#![deny(unsafe_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use trellis_adapters::{HeuristicScorer, MockAnchor, TracingNotifier, WebhookNotifier};
use trellis_core::{
    CandidateProfile, ClassificationPath, Contract, ContractDraft, ContractStatus, CriterionScore,
    Decision, EngineConfig, EscrowStatement, EscrowStatus, EscrowTransaction, Evaluation,
    IdeaRecord, IdeaStatus, IdeaSubmission, LifecycleEngine, LogStorageConfig, MatchRecord,
    MatchStatus, MemoryStore, Milestone, QueryWindow, RateLimiter, ReviewRole, Stage,
    StorageError, SweepReport, TermsUpdate, TransitionEntry, TrellisError,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_storage: LogStorageConfig,
    pub engine: EngineConfig,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_storage: LogStorageConfig::Memory,
            engine: EngineConfig::default(),
            webhook_url: None,
            webhook_secret: None,
            rate_limit_max: 30,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<LifecycleEngine>,
    pub limiter: Arc<RateLimiter>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, TrellisError> {
        let ServiceConfig {
            log_storage,
            engine: engine_config,
            webhook_url,
            webhook_secret,
            rate_limit_max,
            rate_limit_window,
        } = config;

        let mut engine = LifecycleEngine::bootstrap(
            Arc::new(MemoryStore::default()),
            Arc::new(HeuristicScorer),
            engine_config,
            log_storage,
        )
        .await?
        .with_anchor(Arc::new(MockAnchor))
        .with_notifier(Arc::new(TracingNotifier));

        if let Some(endpoint) = webhook_url {
            let notifier = WebhookNotifier::new(endpoint, webhook_secret.unwrap_or_default())?;
            engine = engine.with_notifier(Arc::new(notifier));
        }

        Ok(Self {
            engine: Arc::new(engine),
            limiter: Arc::new(RateLimiter::new(rate_limit_max, rate_limit_window)),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ideas", post(submit_idea).get(list_ideas))
        .route("/v1/ideas/:id", get(get_idea))
        .route("/v1/ideas/:id/evaluate", post(evaluate_idea))
        .route("/v1/ideas/:id/reviews", post(submit_review))
        .route("/v1/ideas/:id/matches", post(request_matches).get(list_matches))
        .route("/v1/ideas/:id/transitions", get(list_transitions))
        .route("/v1/matches/:id/respond", post(respond_match))
        .route("/v1/candidates", post(register_candidate).get(list_candidates))
        .route("/v1/contracts", post(create_contract))
        .route("/v1/contracts/:id", get(get_contract))
        .route("/v1/contracts/:id/terms", put(amend_terms))
        .route("/v1/contracts/:id/sign", post(sign_contract))
        .route(
            "/v1/contracts/:id/milestones/:index/complete",
            post(complete_milestone),
        )
        .route("/v1/contracts/:id/deposit", post(record_deposit))
        .route("/v1/contracts/:id/terminate", post(terminate_contract))
        .route("/v1/contracts/:id/escrow", get(escrow_statement))
        .route("/v1/sweep", post(run_sweep))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] TrellisError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn status_for(err: &TrellisError) -> StatusCode {
    match err {
        TrellisError::NotFound { .. } => StatusCode::NOT_FOUND,
        TrellisError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        TrellisError::AlreadyDecided { .. } => StatusCode::CONFLICT,
        TrellisError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        TrellisError::ScoringUnavailable(_) => StatusCode::BAD_GATEWAY,
        TrellisError::InvariantViolation(_) | TrellisError::InsufficientBalance { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        TrellisError::Storage(StorageError::Conflict(_)) => StatusCode::CONFLICT,
        TrellisError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Http { status, message } => (status, message),
            ApiError::Core(err) => (status_for(&err), err.to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    log_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "trellis-service",
        log_backend: state.engine.log_backend().await,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct SubmitIdeaRequest {
    owner: String,
    title: String,
    description: String,
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SubmitIdeaResponse {
    idea_id: Uuid,
    stage: Stage,
    status: IdeaStatus,
}

async fn submit_idea(
    State(state): State<ServiceState>,
    Json(request): Json<SubmitIdeaRequest>,
) -> Result<Json<SubmitIdeaResponse>, ApiError> {
    let mut submission = IdeaSubmission::new(request.owner, request.title, request.description)
        .with_tags(request.tags);
    if let Some(category) = request.category {
        submission = submission.with_category(category);
    }

    let idea = state.engine.submit_idea(submission).await?;
    Ok(Json(SubmitIdeaResponse {
        idea_id: idea.id,
        stage: idea.stage,
        status: idea.status,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct IdeaListResponse {
    items: Vec<IdeaRecord>,
}

async fn list_ideas(
    State(state): State<ServiceState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<IdeaListResponse>, ApiError> {
    let window = QueryWindow::page(
        query.limit.unwrap_or(100).min(1000),
        query.offset.unwrap_or(0),
    );
    Ok(Json(IdeaListResponse {
        items: state.engine.list_ideas(window).await?,
    }))
}

async fn get_idea(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
) -> Result<Json<IdeaRecord>, ApiError> {
    Ok(Json(state.engine.get_idea(id).await?))
}

/// Optional acting identity for trigger endpoints; absent bodies fall back
/// to a service-level actor.
#[derive(Debug, Clone, Default, Deserialize)]
struct ActorRequest {
    actor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct EvaluationResponse {
    evaluation_id: Uuid,
    overall_score: u8,
    classification: ClassificationPath,
    criterion_scores: Vec<CriterionScore>,
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    recommendations: Vec<String>,
}

impl From<Evaluation> for EvaluationResponse {
    fn from(evaluation: Evaluation) -> Self {
        Self {
            evaluation_id: evaluation.id,
            overall_score: evaluation.overall_score,
            classification: evaluation.classification,
            criterion_scores: evaluation.criterion_scores,
            strengths: evaluation.strengths,
            weaknesses: evaluation.weaknesses,
            recommendations: evaluation.recommendations,
        }
    }
}

async fn evaluate_idea(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<EvaluationResponse>, ApiError> {
    state.limiter.check(&format!("evaluate:{id}"))?;

    let actor = body
        .and_then(|Json(request)| request.actor)
        .unwrap_or_else(|| "system".to_string());
    let evaluation = state.engine.evaluate_idea(id, &actor).await?;
    Ok(Json(EvaluationResponse::from(evaluation)))
}

#[derive(Debug, Clone, Deserialize)]
struct ReviewRequest {
    reviewer: String,
    role: ReviewRole,
    score: u8,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Clone, Serialize)]
struct ReviewResponse {
    accepted: bool,
    review_id: Uuid,
    cycle: u32,
    decision: Option<Decision>,
}

async fn submit_review(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let outcome = state
        .engine
        .submit_review(id, &request.reviewer, request.role, request.score, &request.notes)
        .await?;
    Ok(Json(ReviewResponse {
        accepted: true,
        review_id: outcome.review.id,
        cycle: outcome.review.cycle,
        decision: outcome.decision,
    }))
}

#[derive(Debug, Clone, Serialize)]
struct MatchListResponse {
    items: Vec<MatchRecord>,
}

async fn request_matches(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<MatchListResponse>, ApiError> {
    let actor = body
        .and_then(|Json(request)| request.actor)
        .unwrap_or_else(|| "system".to_string());
    Ok(Json(MatchListResponse {
        items: state.engine.request_matches(id, &actor).await?,
    }))
}

async fn list_matches(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
) -> Result<Json<MatchListResponse>, ApiError> {
    Ok(Json(MatchListResponse {
        items: state.engine.matches_for(id).await?,
    }))
}

#[derive(Debug, Clone, Serialize)]
struct TransitionsResponse {
    chain_intact: bool,
    items: Vec<TransitionEntry>,
}

async fn list_transitions(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
) -> Result<Json<TransitionsResponse>, ApiError> {
    // 404 for unknown ideas rather than an empty history.
    state.engine.get_idea(id).await?;
    Ok(Json(TransitionsResponse {
        chain_intact: state.engine.verify_transition_log().await,
        items: state.engine.transitions_for(id).await,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct RespondRequest {
    actor: String,
    action: String,
}

#[derive(Debug, Clone, Serialize)]
struct RespondOutcome {
    success: bool,
    status: MatchStatus,
}

async fn respond_match(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<RespondOutcome>, ApiError> {
    let accept = match request.action.to_ascii_lowercase().as_str() {
        "accept" => true,
        "reject" => false,
        other => {
            return Err(ApiError::bad_request(format!(
                "invalid action '{}'; expected accept or reject",
                other
            )))
        }
    };

    let updated = state.engine.respond_match(id, &request.actor, accept).await?;
    Ok(Json(RespondOutcome {
        success: true,
        status: updated.status,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateRequest {
    id: String,
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    industries: Vec<String>,
    innovation_score: Option<u8>,
    feasibility_score: Option<u8>,
    active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct CandidateListResponse {
    items: Vec<CandidateProfile>,
}

async fn register_candidate(
    State(state): State<ServiceState>,
    Json(request): Json<CandidateRequest>,
) -> Result<Json<CandidateProfile>, ApiError> {
    let mut candidate = CandidateProfile::new(request.id, request.name)
        .with_tags(request.tags)
        .with_industries(request.industries)
        .with_scores(
            request.innovation_score.unwrap_or(50),
            request.feasibility_score.unwrap_or(50),
        );
    candidate.active = request.active.unwrap_or(true);

    state.engine.upsert_candidate(candidate.clone()).await?;
    Ok(Json(candidate))
}

async fn list_candidates(
    State(state): State<ServiceState>,
) -> Result<Json<CandidateListResponse>, ApiError> {
    Ok(Json(CandidateListResponse {
        items: state.engine.list_candidates().await?,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct MilestoneRequest {
    title: String,
    amount: u64,
    due_date: Option<DateTime<Utc>>,
}

impl MilestoneRequest {
    fn into_milestone(self) -> Milestone {
        let milestone = Milestone::new(self.title, self.amount);
        match self.due_date {
            Some(due_date) => milestone.with_due_date(due_date),
            None => milestone,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CreateContractRequest {
    idea_id: Option<Uuid>,
    party_a: String,
    party_b: String,
    total_value: u64,
    currency: Option<String>,
    #[serde(default)]
    milestones: Vec<MilestoneRequest>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateContractResponse {
    contract_id: Uuid,
    status: ContractStatus,
}

async fn create_contract(
    State(state): State<ServiceState>,
    Json(request): Json<CreateContractRequest>,
) -> Result<Json<CreateContractResponse>, ApiError> {
    let currency = request
        .currency
        .unwrap_or_else(|| state.engine.config().default_currency.clone());
    let draft = ContractDraft {
        idea_id: request.idea_id,
        party_a: request.party_a.clone(),
        party_b: request.party_b,
        total_value_minor: request.total_value,
        currency,
        milestones: request
            .milestones
            .into_iter()
            .map(MilestoneRequest::into_milestone)
            .collect(),
    };

    let contract = state.engine.create_contract(draft, &request.party_a).await?;
    Ok(Json(CreateContractResponse {
        contract_id: contract.id,
        status: contract.status,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct ActorQuery {
    actor: String,
}

async fn get_contract(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<Contract>, ApiError> {
    Ok(Json(state.engine.get_contract(id, &query.actor).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct TermsRequest {
    actor: String,
    party_b: Option<String>,
    total_value: u64,
    currency: Option<String>,
    #[serde(default)]
    milestones: Vec<MilestoneRequest>,
}

async fn amend_terms(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Json(request): Json<TermsRequest>,
) -> Result<Json<Contract>, ApiError> {
    let update = TermsUpdate {
        party_b: request.party_b,
        total_value_minor: request.total_value,
        currency: request.currency,
        milestones: request
            .milestones
            .into_iter()
            .map(MilestoneRequest::into_milestone)
            .collect(),
    };
    Ok(Json(
        state.engine.amend_contract_terms(id, &request.actor, update).await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct SignRequest {
    actor: String,
    signature: String,
}

#[derive(Debug, Clone, Serialize)]
struct SignResponse {
    success: bool,
    status: ContractStatus,
    anchor_ref: Option<String>,
}

async fn sign_contract(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let contract = state
        .engine
        .sign_contract(id, &request.actor, &request.signature)
        .await?;
    Ok(Json(SignResponse {
        success: true,
        status: contract.status,
        anchor_ref: contract.anchor_ref,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct CompleteRequest {
    actor: String,
}

#[derive(Debug, Clone, Serialize)]
struct CompleteResponse {
    success: bool,
    released_total: u64,
    new_escrow_balance: u64,
    escrow_status: EscrowStatus,
    contract_completed: bool,
}

async fn complete_milestone(
    Path((id, index)): Path<(Uuid, usize)>,
    State(state): State<ServiceState>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let release = state.engine.complete_milestone(id, &request.actor, index).await?;
    let statement = state.engine.escrow_statement(id, &request.actor).await?;
    Ok(Json(CompleteResponse {
        success: true,
        released_total: release.released_minor,
        new_escrow_balance: statement.account.available_minor(),
        escrow_status: release.escrow_status,
        contract_completed: release.contract_completed,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct DepositRequest {
    actor: String,
    amount: u64,
}

#[derive(Debug, Clone, Serialize)]
struct DepositResponse {
    success: bool,
    entry: EscrowTransaction,
}

async fn record_deposit(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<DepositResponse>, ApiError> {
    let entry = state
        .engine
        .record_deposit(id, &request.actor, request.amount)
        .await?;
    Ok(Json(DepositResponse {
        success: true,
        entry,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct TerminateRequest {
    actor: String,
    reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct TerminateResponse {
    success: bool,
    status: ContractStatus,
}

async fn terminate_contract(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Json(request): Json<TerminateRequest>,
) -> Result<Json<TerminateResponse>, ApiError> {
    let contract = state
        .engine
        .terminate_contract(id, &request.actor, request.reason)
        .await?;
    Ok(Json(TerminateResponse {
        success: true,
        status: contract.status,
    }))
}

async fn escrow_statement(
    Path(id): Path<Uuid>,
    State(state): State<ServiceState>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<EscrowStatement>, ApiError> {
    Ok(Json(state.engine.escrow_statement(id, &query.actor).await?))
}

async fn run_sweep(
    State(state): State<ServiceState>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<SweepReport>, ApiError> {
    state.limiter.check("sweep")?;

    let actor = body
        .and_then(|Json(request)| request.actor)
        .unwrap_or_else(|| "sweeper".to_string());
    Ok(Json(state.engine.run_sweep(&actor).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn service() -> Router {
        let state = ServiceState::bootstrap(ServiceConfig::default())
            .await
            .unwrap();
        build_router(state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn rich_idea_payload() -> Value {
        json!({
            "owner": "alice",
            "title": "Cold-chain telemetry retrofit kits",
            "description": "Retrofit kits that convert conventional refrigerated trailers \
                into connected cold-chain units. Each kit pairs battery-backed sensors with \
                a gateway that streams temperature, humidity, and door events to a fleet \
                dashboard. Operators get predictive alerts before a load drifts out of \
                range, cutting spoilage and insurance claims. The hardware uses proven \
                off-the-shelf parts, installs in under two hours, and the subscription \
                dashboard creates recurring revenue from day one. Early pilots with two \
                regional carriers showed spoilage reductions above thirty percent and \
                strong demand for fleet-wide rollout across their partner networks.",
            "category": "logistics",
            "tags": ["iot", "cold-chain", "logistics"]
        })
    }

    async fn submitted_idea(app: &Router) -> String {
        let (status, body) = call(app, "POST", "/v1/ideas", Some(rich_idea_payload())).await;
        assert_eq!(status, StatusCode::OK);
        body["idea_id"].as_str().unwrap().to_string()
    }

    async fn promoted_idea(app: &Router) -> String {
        let idea_id = submitted_idea(app).await;
        let (status, _) = call(
            app,
            "POST",
            &format!("/v1/ideas/{idea_id}/evaluate"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        idea_id
    }

    async fn active_contract(app: &Router) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/v1/contracts",
            Some(json!({
                "party_a": "acme-labs",
                "party_b": "polar-logistics",
                "total_value": 100_000,
                "milestones": [
                    { "title": "Pilot install", "amount": 30_000 },
                    { "title": "Fleet rollout", "amount": 40_000 },
                    { "title": "Handover", "amount": 30_000 }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let contract_id = body["contract_id"].as_str().unwrap().to_string();

        for actor in ["acme-labs", "polar-logistics"] {
            let (status, _) = call(
                app,
                "POST",
                &format!("/v1/contracts/{contract_id}/sign"),
                Some(json!({ "actor": actor, "signature": format!("sig-{actor}") })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        contract_id
    }

    #[tokio::test]
    async fn health_reports_log_backend() {
        let app = service().await;

        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "trellis-service");
        assert_eq!(body["log_backend"], "memory");
    }

    #[tokio::test]
    async fn submitted_idea_is_fetchable() {
        let app = service().await;

        let idea_id = submitted_idea(&app).await;
        let (status, body) = call(&app, "GET", &format!("/v1/ideas/{idea_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["owner"], "alice");
        assert_eq!(body["stage"], "origination");
        assert_eq!(body["status"], "submitted");

        let (status, body) = call(&app, "GET", "/v1/ideas?limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn thin_submission_is_rejected() {
        let app = service().await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/ideas",
            Some(json!({
                "owner": "bob",
                "title": "An app idea",
                "description": "too thin"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("description"));
    }

    #[tokio::test]
    async fn unknown_idea_returns_not_found() {
        let app = service().await;

        let (status, body) =
            call(&app, "GET", &format!("/v1/ideas/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn evaluation_promotes_a_rich_idea() {
        let app = service().await;

        let idea_id = submitted_idea(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/ideas/{idea_id}/evaluate"),
            Some(json!({ "actor": "analyst-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["classification"], "innovation");
        assert!(body["overall_score"].as_u64().unwrap() >= 70);
        assert_eq!(body["criterion_scores"].as_array().unwrap().len(), 6);

        let (_, idea) = call(&app, "GET", &format!("/v1/ideas/{idea_id}"), None).await;
        assert_eq!(idea["stage"], "matching");
        assert_eq!(idea["status"], "evaluating");

        let (status, transitions) =
            call(&app, "GET", &format!("/v1/ideas/{idea_id}/transitions"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(transitions["chain_intact"], true);
        let items = transitions["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["from_stage"], "origination");
        assert_eq!(items[0]["to_stage"], "matching");
    }

    #[tokio::test]
    async fn full_review_set_decides_over_http() {
        let app = service().await;
        let idea_id = promoted_idea(&app).await;

        let reviews = [
            ("lena", "legal", 80),
            ("theo", "technical", 75),
            ("cora", "commercial", 65),
        ];
        let mut last = Value::Null;
        for (reviewer, role, score) in reviews {
            let (status, body) = call(
                &app,
                "POST",
                &format!("/v1/ideas/{idea_id}/reviews"),
                Some(json!({ "reviewer": reviewer, "role": role, "score": score })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["accepted"], true);
            last = body;
        }

        assert_eq!(last["decision"]["verdict"], "approved");
        assert_eq!(last["decision"]["average"], 73);

        let (_, idea) = call(&app, "GET", &format!("/v1/ideas/{idea_id}"), None).await;
        assert_eq!(idea["stage"], "contracting");
        assert_eq!(idea["status"], "approved");
    }

    #[tokio::test]
    async fn duplicate_role_review_is_unprocessable() {
        let app = service().await;
        let idea_id = promoted_idea(&app).await;

        let payload = json!({ "reviewer": "lena", "role": "legal", "score": 80 });
        let (status, _) = call(
            &app,
            "POST",
            &format!("/v1/ideas/{idea_id}/reviews"),
            Some(payload.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/ideas/{idea_id}/reviews"),
            Some(payload),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("already filed"));
    }

    #[tokio::test]
    async fn match_flow_runs_over_http() {
        let app = service().await;

        let (status, _) = call(
            &app,
            "POST",
            "/v1/candidates",
            Some(json!({
                "id": "polar-logistics",
                "name": "Polar Logistics Group",
                "tags": ["iot", "cold-chain"],
                "industries": ["logistics"],
                "innovation_score": 85,
                "feasibility_score": 85
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let idea_id = promoted_idea(&app).await;
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/ideas/{idea_id}/matches"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["candidate_id"], "polar-logistics");
        assert!(items[0]["score"].as_u64().unwrap() >= 50);
        let match_id = items[0]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/matches/{match_id}/respond"),
            Some(json!({ "actor": "polar-logistics", "action": "accept" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "accepted");

        let (_, idea) = call(&app, "GET", &format!("/v1/ideas/{idea_id}"), None).await;
        assert_eq!(idea["status"], "matched");
    }

    #[tokio::test]
    async fn invalid_match_action_is_bad_request() {
        let app = service().await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/matches/{}/respond", Uuid::new_v4()),
            Some(json!({ "actor": "anyone", "action": "defer" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid action"));
    }

    #[tokio::test]
    async fn contract_lifecycle_settles_escrow_over_http() {
        let app = service().await;
        let contract_id = active_contract(&app).await;

        let (status, contract) = call(
            &app,
            "GET",
            &format!("/v1/contracts/{contract_id}?actor=acme-labs"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(contract["status"], "active");
        assert!(contract["anchor_ref"].as_str().is_some());

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/contracts/{contract_id}/milestones/0/complete"),
            Some(json!({ "actor": "acme-labs" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["released_total"], 30_000);
        assert_eq!(body["new_escrow_balance"], 70_000);
        assert_eq!(body["escrow_status"], "partially_released");
        assert_eq!(body["contract_completed"], false);

        for index in [1, 2] {
            let (status, _) = call(
                &app,
                "POST",
                &format!("/v1/contracts/{contract_id}/milestones/{index}/complete"),
                Some(json!({ "actor": "polar-logistics" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, statement) = call(
            &app,
            "GET",
            &format!("/v1/contracts/{contract_id}/escrow?actor=acme-labs"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(statement["account"]["status"], "fully_released");
        assert_eq!(statement["account"]["released_minor"], 100_000);
        assert_eq!(statement["entries"].as_array().unwrap().len(), 3);

        let (_, contract) = call(
            &app,
            "GET",
            &format!("/v1/contracts/{contract_id}?actor=acme-labs"),
            None,
        )
        .await;
        assert_eq!(contract["status"], "completed");
    }

    #[tokio::test]
    async fn outsider_cannot_read_a_contract() {
        let app = service().await;
        let contract_id = active_contract(&app).await;

        let (status, body) = call(
            &app,
            "GET",
            &format!("/v1/contracts/{contract_id}?actor=mallory"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("mallory"));
    }

    #[tokio::test]
    async fn deposit_and_termination_are_journaled() {
        let app = service().await;
        let contract_id = active_contract(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/contracts/{contract_id}/deposit"),
            Some(json!({ "actor": "acme-labs", "amount": 100_000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry"]["kind"], "deposit");

        let (status, _) = call(
            &app,
            "POST",
            &format!("/v1/contracts/{contract_id}/milestones/0/complete"),
            Some(json!({ "actor": "acme-labs" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/contracts/{contract_id}/terminate"),
            Some(json!({ "actor": "acme-labs", "reason": "pilot cancelled" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "terminated");

        let (_, statement) = call(
            &app,
            "GET",
            &format!("/v1/contracts/{contract_id}/escrow?actor=acme-labs"),
            None,
        )
        .await;
        assert_eq!(statement["account"]["status"], "refunded");
        let kinds: Vec<&str> = statement["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["deposit", "release", "refund"]);
    }

    #[tokio::test]
    async fn evaluation_is_rate_limited_per_idea() {
        let state = ServiceState::bootstrap(ServiceConfig {
            rate_limit_max: 1,
            ..ServiceConfig::default()
        })
        .await
        .unwrap();
        let app = build_router(state);

        let idea_id = submitted_idea(&app).await;
        let uri = format!("/v1/ideas/{idea_id}/evaluate");

        let (status, _) = call(&app, "POST", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "POST", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["error"].as_str().unwrap().contains("resets at"));
    }

    #[tokio::test]
    async fn sweep_endpoint_reports_counts() {
        let app = service().await;
        let idea_id = promoted_idea(&app).await;

        let (status, body) = call(&app, "POST", "/v1/sweep", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ideas_examined"], 1);
        // No candidates registered, so the refreshed pass persists nothing
        // but still counts the parked idea.
        assert_eq!(body["matches_refreshed"], 1);
        assert_eq!(body["decisions_recorded"], 0);

        let (_, idea) = call(&app, "GET", &format!("/v1/ideas/{idea_id}"), None).await;
        assert_eq!(idea["stage"], "matching");
    }
}
