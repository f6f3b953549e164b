// api-gateway-rs/src/lib.rs
// HTTP adapter over the prompt loop and the self-healing primitives.
//
// Handlers only decode the request, call one component operation and wrap
// the result in the `{success, ...}` envelope. All semantics live in the
// library crates.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config_rs::LoopConfig;
use prompt_loop::{
    IngestOrchestrator, IngestRequest, LoopStores, PromptPatcher, StandardRenderer, TemplateCatalog,
};
use self_heal::{
    AutoRecovery, ConfigDriftDetector, FailureType, HealStores, IncidentFilter, IncidentReporter,
    IncidentUpdate, NewIncident,
};
use shared_types::{
    AgentRepository, AgentState, AuditLog, CallLogRepository, HealthCheckRepository,
    IncidentRepository, PromptRepository, ReviewRepository, StateSnapshotRepository,
};

pub mod validation;

use validation::{json_content_type_middleware, payload_limit_config, require, success, ApiError};

pub const DEFAULT_QUEUE_LIMIT: usize = 50;

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueParams {
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatchBody {
    #[serde(default)]
    pub review_id: String,
    #[serde(default)]
    pub agent_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackBody {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub to_hash: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchReviewBody {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckBody {
    #[serde(default)]
    pub agent_id: String,
    pub healthy: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryBody {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub failure_type: Option<String>,
    #[serde(default)]
    pub last_working_state: Option<AgentState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    #[serde(default)]
    pub agent_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftDetectBody {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub expected_config: Option<Value>,
    #[serde(default)]
    pub check_fields: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRepairBody {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub auto_repair: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateBody {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub escalated_to: Option<String>,
}

/// Core API Gateway state
pub struct ApiGateway {
    orchestrator: Arc<IngestOrchestrator>,
    recovery: Arc<AutoRecovery>,
    drift: Arc<ConfigDriftDetector>,
    incidents: Arc<IncidentReporter>,
    started_at: Instant,
}

impl ApiGateway {
    pub fn new(
        orchestrator: Arc<IngestOrchestrator>,
        recovery: Arc<AutoRecovery>,
        drift: Arc<ConfigDriftDetector>,
        incidents: Arc<IncidentReporter>,
    ) -> Self {
        Self {
            orchestrator,
            recovery,
            drift,
            incidents,
            started_at: Instant::now(),
        }
    }

    /// Wire every component against a single store. `audit` overrides the
    /// store's own audit trail when given.
    pub fn from_store<S>(
        store: Arc<S>,
        audit: Option<Arc<dyn AuditLog>>,
        catalog: Arc<dyn TemplateCatalog>,
        cfg: LoopConfig,
    ) -> Self
    where
        S: AgentRepository
            + PromptRepository
            + CallLogRepository
            + ReviewRepository
            + IncidentRepository
            + StateSnapshotRepository
            + HealthCheckRepository
            + AuditLog
            + 'static,
    {
        let mut loop_stores = LoopStores::from_store(store.clone());
        let mut heal_stores = HealStores::from_store(store);
        if let Some(audit) = audit {
            loop_stores = loop_stores.with_audit(audit.clone());
            heal_stores = heal_stores.with_audit(audit);
        }

        let patcher = Arc::new(PromptPatcher::new(
            loop_stores.clone(),
            catalog.clone(),
            Arc::new(StandardRenderer),
            cfg.call_timeout,
        ));
        let orchestrator = Arc::new(IngestOrchestrator::new(
            loop_stores,
            catalog,
            patcher,
            cfg.clone(),
        ));
        let incidents = Arc::new(IncidentReporter::new(heal_stores.clone(), &cfg));
        let drift = Arc::new(ConfigDriftDetector::new(
            heal_stores.clone(),
            incidents.clone(),
            cfg.call_timeout,
        ));
        let recovery = Arc::new(AutoRecovery::new(heal_stores, cfg));

        Self::new(orchestrator, recovery, drift, incidents)
    }

    /// Create the Axum router with all routes and middleware
    pub fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", get(Self::root_handler))
            .route("/health", get(Self::health_handler))
            .route("/ingestTranscript", post(Self::ingest_transcript_handler))
            .route("/reviewQueue", get(Self::review_queue_handler))
            .route("/applyPatch", post(Self::apply_patch_handler))
            .route("/rollback", post(Self::rollback_handler))
            .route("/batchReview", post(Self::batch_review_handler))
            .route("/healthCheck", post(Self::health_check_handler))
            .route("/snapshot", post(Self::snapshot_handler))
            .route("/recovery", post(Self::recovery_handler))
            .route("/drift/detect", post(Self::drift_detect_handler))
            .route("/drift/repair", post(Self::drift_repair_handler))
            .route(
                "/incidents",
                get(Self::list_incidents_handler).post(Self::create_incident_handler),
            )
            .route("/incidents/summary", get(Self::incident_summary_handler))
            .route("/incidents/:id/escalate", post(Self::escalate_incident_handler))
            .route("/incidents/:id/update", post(Self::update_incident_handler))
            .layer(middleware::from_fn(json_content_type_middleware))
            .layer(payload_limit_config())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .with_state(self)
    }

    async fn root_handler() -> impl IntoResponse {
        Json(json!({
            "service": "Voice Agent Prompt Loop Gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": [
                "POST /ingestTranscript",
                "GET /reviewQueue",
                "POST /applyPatch",
                "POST /rollback",
                "POST /batchReview",
                "POST /healthCheck",
                "POST /snapshot",
                "POST /recovery",
                "POST /drift/detect",
                "POST /drift/repair",
                "GET|POST /incidents",
                "GET /incidents/summary",
                "POST /incidents/:id/escalate",
                "POST /incidents/:id/update"
            ]
        }))
    }

    async fn health_handler(State(state): State<Arc<Self>>) -> ApiResult {
        success(&json!({
            "service": "api-gateway",
            "status": "SERVING",
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "autoApplyThreshold": state.orchestrator.config().auto_apply_threshold,
        }))
    }

    async fn ingest_transcript_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<IngestRequest>, JsonRejection>,
    ) -> ApiResult {
        let Json(request) = body?;
        let outcome = state.orchestrator.ingest_transcript(request).await?;
        success(&outcome)
    }

    async fn review_queue_handler(
        State(state): State<Arc<Self>>,
        params: Result<Query<ReviewQueueParams>, QueryRejection>,
    ) -> ApiResult {
        let Query(params) = params?;
        let reviews = state
            .orchestrator
            .get_review_queue(
                params.agent_id.as_deref().filter(|id| !id.is_empty()),
                params.limit.unwrap_or(DEFAULT_QUEUE_LIMIT),
            )
            .await?;
        success(&json!({ "count": reviews.len(), "reviews": reviews }))
    }

    async fn apply_patch_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<ApplyPatchBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        require(&body.review_id, "reviewId")?;
        require(&body.agent_id, "agentId")?;
        let outcome = state
            .orchestrator
            .apply_patch(&body.review_id, &body.agent_id)
            .await?;
        success(&outcome)
    }

    async fn rollback_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<RollbackBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let outcome = state
            .orchestrator
            .rollback_prompt(&body.agent_id, &body.to_hash)
            .await?;
        success(&outcome)
    }

    async fn batch_review_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<BatchReviewBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let report = state.orchestrator.batch_review(body.limit).await?;
        success(&report)
    }

    async fn health_check_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<HealthCheckBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let check = state
            .recovery
            .record_health_check(&body.agent_id, body.healthy, body.detail)
            .await?;
        success(&json!({ "healthCheck": check }))
    }

    async fn snapshot_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<SnapshotBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        require(&body.agent_id, "agentId")?;
        let snapshot = state.recovery.capture_snapshot(&body.agent_id).await?;
        success(&json!({ "snapshot": snapshot }))
    }

    async fn recovery_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<RecoveryBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let failure_type: FailureType = body
            .failure_type
            .as_deref()
            .unwrap_or("unknown")
            .parse()
            .map_err(|err: shared_types::InvalidVariant| ApiError::BadRequest(err.to_string()))?;
        let outcome = state
            .recovery
            .auto_recovery(&body.agent_id, failure_type, body.last_working_state)
            .await?;
        success(&outcome)
    }

    async fn drift_detect_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<DriftDetectBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let report = state
            .drift
            .detect(&body.agent_id, body.expected_config, body.check_fields)
            .await?;
        success(&report)
    }

    async fn drift_repair_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<DriftRepairBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        require(&body.agent_id, "agentId")?;
        let report = state
            .drift
            .auto_repair(&body.agent_id, body.auto_repair)
            .await?;
        success(&report)
    }

    async fn create_incident_handler(
        State(state): State<Arc<Self>>,
        body: Result<Json<NewIncident>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let incident = state.incidents.create(body).await?;
        success(&json!({ "incident": incident }))
    }

    async fn list_incidents_handler(
        State(state): State<Arc<Self>>,
        filter: Result<Query<IncidentFilter>, QueryRejection>,
    ) -> ApiResult {
        let Query(filter) = filter?;
        let incidents = state.incidents.get_incidents(&filter).await?;
        success(&json!({ "count": incidents.len(), "incidents": incidents }))
    }

    async fn incident_summary_handler(
        State(state): State<Arc<Self>>,
        filter: Result<Query<IncidentFilter>, QueryRejection>,
    ) -> ApiResult {
        let Query(filter) = filter?;
        let summary = state.incidents.get_summary(&filter).await?;
        success(&json!({ "summary": summary }))
    }

    async fn escalate_incident_handler(
        State(state): State<Arc<Self>>,
        Path(incident_id): Path<String>,
        body: Result<Json<EscalateBody>, JsonRejection>,
    ) -> ApiResult {
        let Json(body) = body?;
        let reason = if body.reason.trim().is_empty() {
            "manual escalation"
        } else {
            body.reason.as_str()
        };
        let incident = state
            .incidents
            .escalate(&incident_id, reason, body.escalated_to.as_deref())
            .await?;
        success(&json!({ "incident": incident }))
    }

    async fn update_incident_handler(
        State(state): State<Arc<Self>>,
        Path(incident_id): Path<String>,
        body: Result<Json<IncidentUpdate>, JsonRejection>,
    ) -> ApiResult {
        let Json(update) = body?;
        let incident = state.incidents.update(&incident_id, update).await?;
        success(&json!({ "incident": incident }))
    }
}
