use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use api_gateway::ApiGateway;
use config_rs::LoopConfig;
use prompt_loop::StaticCatalog;
use shared_types::{
    prompt_hash, Agent, AgentConfig, AgentRepository, InMemoryStore, PromptRepository,
    PromptVersion,
};

const AGENT: &str = "agent-1";

async fn app() -> (Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let text = "You are the receptionist.";
    store
        .upsert_agent(Agent {
            id: AGENT.to_string(),
            name: "Front desk".to_string(),
            config: AgentConfig {
                niche: "home_services".to_string(),
                ..Default::default()
            },
            system_prompt: text.to_string(),
            prompt_id: Some("prompt-1".to_string()),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .insert_prompt(PromptVersion {
            id: "prompt-1".to_string(),
            agent_id: AGENT.to_string(),
            niche: "home_services".to_string(),
            system_prompt_text: text.to_string(),
            kb_refs: Vec::new(),
            actions: Vec::new(),
            eval_rubric: Vec::new(),
            overlay: None,
            version: 1,
            prompt_hash: prompt_hash(text),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let gateway = Arc::new(ApiGateway::from_store(
        store.clone(),
        None,
        Arc::new(StaticCatalog::builtin()),
        LoopConfig::default(),
    ));
    (gateway.create_router(), store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_serving() {
    let (app, _) = app().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "SERVING");
}

#[tokio::test]
async fn ingest_maps_errors_to_envelope() {
    let (app, _) = app().await;

    let (status, body) = send(&app, post("/ingestTranscript", json!({ "transcript": "hi" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("agentId"));

    let (status, body) = send(
        &app,
        post("/ingestTranscript", json!({ "agentId": "ghost", "transcript": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn ingest_then_queue() {
    let (app, _) = app().await;

    let (status, body) = send(
        &app,
        post(
            "/ingestTranscript",
            json!({
                "agentId": AGENT,
                "callId": "call-1",
                "transcript": "Agent: Let's get you scheduled.",
                "metrics": { "fieldsCaptured": ["contact.first_name"] }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["patchApplied"], false);
    assert_eq!(body["evaluation"]["pass"], false);
    let review_id = body["evaluation"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get("/reviewQueue?agentId=agent-1&limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["reviews"][0]["transcript"], "Agent: Let's get you scheduled.");

    let (status, body) = send(
        &app,
        post("/applyPatch", json!({ "reviewId": review_id, "agentId": AGENT })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyApplied"], false);
    assert!(body["newPromptId"].is_string());

    let (_, body) = send(&app, get("/reviewQueue")).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn apply_and_rollback_not_found() {
    let (app, store) = app().await;

    let (status, _) = send(
        &app,
        post("/applyPatch", json!({ "reviewId": "missing", "agentId": AGENT })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        post("/rollback", json!({ "agentId": AGENT, "toHash": "deadbeef" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let agent = store.get_agent(AGENT).await.unwrap().unwrap();
    assert_eq!(agent.prompt_id.as_deref(), Some("prompt-1"));
}

#[tokio::test]
async fn post_requires_json_content_type() {
    let (app, _) = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/batchReview")
        .header("content-type", "text/plain")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn batch_review_reports_counts() {
    let (app, _) = app().await;
    send(
        &app,
        post("/ingestTranscript", json!({ "agentId": "ghost", "transcript": "hello" })),
    )
    .await;

    let (status, body) = send(&app, post("/batchReview", json!({ "limit": 10 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["errors"], 1);
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn incident_routes() {
    let (app, _) = app().await;

    let (status, body) = send(
        &app,
        post(
            "/incidents",
            json!({
                "agentId": AGENT,
                "errorMessage": "voice provider unreachable",
                "severity": "critical",
                "source": "telephony"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["incident"]["status"], "investigating");
    assert_eq!(body["incident"]["severity"], "critical");
    let incident_id = body["incident"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        post("/incidents", json!({ "agentId": AGENT, "errorMessage": "x", "severity": "urgent" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        post(
            &format!("/incidents/{incident_id}/update"),
            json!({ "status": "resolved", "resolution": "provider recovered" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["incident"]["status"], "resolved");

    let (_, body) = send(&app, get("/incidents?agentId=agent-1")).await;
    assert_eq!(body["count"], 1);

    let (_, body) = send(&app, get("/incidents/summary")).await;
    assert_eq!(body["summary"]["total"], 1);
    assert_eq!(body["summary"]["openCritical"], 0);

    let (status, body) = send(&app, get("/incidents?windowHours=9223372036854775807")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    let (status, _) = send(&app, get("/incidents/summary?windowHours=9223372036854775807")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        post("/incidents/missing/escalate", json!({ "reason": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn recovery_and_drift_routes() {
    let (app, _) = app().await;

    let (status, _) = send(
        &app,
        post("/recovery", json!({ "agentId": AGENT, "failureType": "disk" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for _ in 0..3 {
        let (status, _) = send(
            &app,
            post("/healthCheck", json!({ "agentId": AGENT, "healthy": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(
        &app,
        post("/recovery", json!({ "agentId": AGENT, "failureType": "api" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recovered"], true);
    assert_eq!(body["recoveryAction"], "api_reset");

    let (status, body) = send(&app, post("/drift/detect", json!({ "agentId": AGENT }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drifted"], false);
    assert_eq!(body["baseline"], "current");

    let (status, body) = send(
        &app,
        post("/drift/repair", json!({ "agentId": AGENT, "autoRepair": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
}
