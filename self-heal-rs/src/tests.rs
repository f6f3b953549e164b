use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use config_rs::LoopConfig;
use shared_types::{
    new_id, Agent, AgentConfig, AgentRepository, AgentState, AgentStateSnapshot, AuditLog,
    HealthCheck, HealthCheckRepository, InMemoryStore, IncidentRepository, IncidentSeverity,
    IncidentStatus, StateSnapshotRepository,
};

use crate::{
    classify_field, AutoRecovery, BaselineSource, ConfigDriftDetector, DriftSeverity, FailureType,
    HealStores, IncidentFilter, IncidentReporter, IncidentUpdate, NewIncident, RecoveryAction,
};

const AGENT: &str = "agent-1";

struct Harness {
    store: Arc<InMemoryStore>,
    recovery: AutoRecovery,
    drift: ConfigDriftDetector,
    incidents: Arc<IncidentReporter>,
}

fn harness() -> Harness {
    let cfg = LoopConfig::default();
    let store = Arc::new(InMemoryStore::new());
    let stores = HealStores::from_store(store.clone());
    let incidents = Arc::new(IncidentReporter::new(stores.clone(), &cfg));
    Harness {
        store,
        recovery: AutoRecovery::new(stores.clone(), cfg.clone()),
        drift: ConfigDriftDetector::new(stores, incidents.clone(), cfg.call_timeout),
        incidents,
    }
}

fn agent_config(tone: &str) -> AgentConfig {
    let mut api_keys = BTreeMap::new();
    api_keys.insert("crm".to_string(), "key-1".to_string());
    AgentConfig {
        niche: "home_services".to_string(),
        tone: tone.to_string(),
        voice_id: Some("voice-a".to_string()),
        crm_endpoint: Some("https://crm.example.com".to_string()),
        api_keys,
        ..Default::default()
    }
}

async fn seed_agent(store: &InMemoryStore) {
    store
        .upsert_agent(Agent {
            id: AGENT.to_string(),
            name: "Front desk".to_string(),
            config: agent_config("friendly"),
            system_prompt: "You are the receptionist.".to_string(),
            prompt_id: None,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn fail_health_checks(store: &InMemoryStore, count: usize) {
    for _ in 0..count {
        store
            .record_health_check(HealthCheck {
                id: new_id(),
                agent_id: AGENT.to_string(),
                healthy: false,
                detail: Some("call setup timed out".to_string()),
                checked_at: Utc::now(),
            })
            .await
            .unwrap();
    }
}

async fn save_snapshot(store: &InMemoryStore, tone: &str, age_minutes: i64) -> AgentStateSnapshot {
    let snapshot = AgentStateSnapshot {
        id: new_id(),
        agent_id: AGENT.to_string(),
        state: AgentState {
            config: serde_json::to_value(agent_config(tone)).unwrap(),
            system_prompt: Some("You are the receptionist.".to_string()),
            deployed_at: Utc::now() - ChronoDuration::minutes(age_minutes),
        },
        updated_at: Utc::now() - ChronoDuration::minutes(age_minutes),
    };
    store.save_snapshot(snapshot.clone()).await.unwrap();
    snapshot
}

fn new_incident(severity: &str) -> NewIncident {
    NewIncident {
        agent_id: AGENT.to_string(),
        error_message: "CRM webhook returned 502".to_string(),
        severity: severity.to_string(),
        metadata: json!({ "status": 502 }),
        source: "crm_sync".to_string(),
        title: None,
    }
}

// ---------------------------------------------------------------------------
// AutoRecovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_waits_for_failure_threshold() {
    let h = harness();
    seed_agent(&h.store).await;
    fail_health_checks(&h.store, 2).await;

    let outcome = h
        .recovery
        .auto_recovery(AGENT, FailureType::Config, None)
        .await
        .unwrap();

    assert!(!outcome.recovered);
    assert_eq!(outcome.reason.as_deref(), Some("failure_threshold_not_met"));
    assert_eq!(outcome.failure_count, 2);

    let audit = h.store.entries_for(AGENT).await.unwrap();
    assert_eq!(audit.len(), 1, "skipped recoveries are logged too");
    assert_eq!(audit[0].event, "auto_recovery");
}

#[tokio::test]
async fn old_failures_fall_outside_the_window() {
    let h = harness();
    seed_agent(&h.store).await;
    for _ in 0..5 {
        h.store
            .record_health_check(HealthCheck {
                id: new_id(),
                agent_id: AGENT.to_string(),
                healthy: false,
                detail: None,
                checked_at: Utc::now() - ChronoDuration::minutes(10),
            })
            .await
            .unwrap();
    }

    let outcome = h
        .recovery
        .auto_recovery(AGENT, FailureType::Api, None)
        .await
        .unwrap();
    assert!(!outcome.recovered);
}

#[tokio::test]
async fn config_failure_restores_stale_snapshot_only() {
    let h = harness();
    seed_agent(&h.store).await;
    let mut broken = h.store.get_agent(AGENT).await.unwrap().unwrap();
    broken.config.tone = "broken".to_string();
    h.store.upsert_agent(broken).await.unwrap();

    let good = save_snapshot(&h.store, "restored", 30).await;
    // Too fresh to trust.
    save_snapshot(&h.store, "recent", 1).await;
    fail_health_checks(&h.store, 3).await;

    let outcome = h
        .recovery
        .auto_recovery(AGENT, FailureType::Config, None)
        .await
        .unwrap();

    assert!(outcome.recovered);
    assert_eq!(outcome.recovery_action, Some(RecoveryAction::ConfigRollback));
    assert_eq!(outcome.restored_from.as_deref(), Some(good.id.as_str()));
    let agent = h.store.get_agent(AGENT).await.unwrap().unwrap();
    assert_eq!(agent.config.tone, "restored");
}

#[tokio::test]
async fn provided_state_wins_over_snapshots() {
    let h = harness();
    seed_agent(&h.store).await;
    save_snapshot(&h.store, "snapshot", 30).await;
    fail_health_checks(&h.store, 3).await;

    let state = AgentState {
        config: serde_json::to_value(agent_config("provided")).unwrap(),
        system_prompt: None,
        deployed_at: Utc::now(),
    };
    let outcome = h
        .recovery
        .auto_recovery(AGENT, FailureType::Unknown, Some(state))
        .await
        .unwrap();

    assert_eq!(outcome.restored_from.as_deref(), Some("provided"));
    let agent = h.store.get_agent(AGENT).await.unwrap().unwrap();
    assert_eq!(agent.config.tone, "provided");
}

#[tokio::test]
async fn config_failure_without_state_is_not_recovered() {
    let h = harness();
    seed_agent(&h.store).await;
    fail_health_checks(&h.store, 3).await;

    let outcome = h
        .recovery
        .auto_recovery(AGENT, FailureType::Config, None)
        .await
        .unwrap();
    assert!(!outcome.recovered);
    assert_eq!(outcome.reason.as_deref(), Some("no_recovery_state"));
}

#[tokio::test]
async fn api_failure_marks_reset_without_touching_config() {
    let h = harness();
    seed_agent(&h.store).await;
    save_snapshot(&h.store, "snapshot", 30).await;
    fail_health_checks(&h.store, 4).await;

    let outcome = h
        .recovery
        .auto_recovery(AGENT, FailureType::Connection, None)
        .await
        .unwrap();

    assert!(outcome.recovered);
    assert_eq!(outcome.recovery_action, Some(RecoveryAction::ApiReset));
    let agent = h.store.get_agent(AGENT).await.unwrap().unwrap();
    assert_eq!(agent.config.tone, "friendly");
}

#[tokio::test]
async fn oversized_windows_reach_back_to_the_earliest_instant() {
    let store = Arc::new(InMemoryStore::new());
    let cfg = LoopConfig {
        failure_window: std::time::Duration::from_secs(400_000 * 365 * 24 * 3600),
        snapshot_staleness: std::time::Duration::from_secs(u64::MAX),
        ..LoopConfig::default()
    };
    let recovery = AutoRecovery::new(HealStores::from_store(store.clone()), cfg);
    seed_agent(&store).await;
    save_snapshot(&store, "snapshot", 30).await;
    fail_health_checks(&store, 3).await;

    let outcome = recovery
        .auto_recovery(AGENT, FailureType::Config, None)
        .await
        .unwrap();

    assert_eq!(outcome.failure_count, 3);
    assert!(!outcome.recovered);
    assert_eq!(outcome.reason.as_deref(), Some("no_recovery_state"));
}

#[tokio::test]
async fn failed_recovery_is_audited() {
    let h = harness();
    fail_health_checks(&h.store, 3).await;
    let state = AgentState {
        config: serde_json::to_value(agent_config("provided")).unwrap(),
        system_prompt: None,
        deployed_at: Utc::now(),
    };

    let err = h
        .recovery
        .auto_recovery(AGENT, FailureType::Config, Some(state))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);

    let audit = h.store.entries_for(AGENT).await.unwrap();
    assert!(audit.iter().any(|e| e.event == "auto_recovery_failed"));
}

#[tokio::test]
async fn captured_snapshot_becomes_a_recovery_baseline() {
    let h = harness();
    seed_agent(&h.store).await;

    let snapshot = h.recovery.capture_snapshot(AGENT).await.unwrap();
    assert_eq!(snapshot.state.config["tone"], "friendly");
    assert_eq!(
        snapshot.state.system_prompt.as_deref(),
        Some("You are the receptionist.")
    );

    let missing = h.recovery.capture_snapshot("nobody").await.unwrap_err();
    assert_eq!(missing.status_code(), 404);
}

#[test]
fn failure_type_parses_case_insensitively() {
    assert_eq!("CONFIG".parse::<FailureType>().unwrap(), FailureType::Config);
    assert_eq!("".parse::<FailureType>().unwrap(), FailureType::Unknown);
    assert!("disk".parse::<FailureType>().is_err());
}

// ---------------------------------------------------------------------------
// ConfigDrift
// ---------------------------------------------------------------------------

#[test]
fn drift_classification_table() {
    assert_eq!(classify_field("api_keys"), DriftSeverity::Critical);
    assert_eq!(classify_field("crm_endpoint"), DriftSeverity::Critical);
    assert_eq!(classify_field("voice_id"), DriftSeverity::Important);
    assert_eq!(classify_field("system_prompt"), DriftSeverity::Important);
    assert_eq!(classify_field("tone"), DriftSeverity::Low);
    assert!(DriftSeverity::Critical > DriftSeverity::Important);
}

#[tokio::test]
async fn no_baseline_means_no_drift() {
    let h = harness();
    seed_agent(&h.store).await;

    let report = h.drift.detect(AGENT, None, None).await.unwrap();
    assert!(!report.drifted);
    assert_eq!(report.severity, DriftSeverity::None);
    assert_eq!(report.baseline, BaselineSource::Current);
    assert!(h.store.entries_for(AGENT).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_baseline_reports_max_severity() {
    let h = harness();
    seed_agent(&h.store).await;
    h.recovery.capture_snapshot(AGENT).await.unwrap();

    let mut agent = h.store.get_agent(AGENT).await.unwrap().unwrap();
    agent.config.tone = "curt".to_string();
    agent.config.voice_id = Some("voice-b".to_string());
    h.store.upsert_agent(agent).await.unwrap();

    let report = h.drift.detect(AGENT, None, None).await.unwrap();
    assert_eq!(report.baseline, BaselineSource::Snapshot);
    assert_eq!(report.severity, DriftSeverity::Important);
    let mut fields: Vec<&str> = report.drifts.iter().map(|d| d.field.as_str()).collect();
    fields.sort_unstable();
    assert_eq!(fields, vec!["tone", "voice_id"]);
    assert!(report.incident_id.is_none());

    let audit = h.store.entries_for(AGENT).await.unwrap();
    assert!(audit.iter().any(|e| e.event == "config_drift_detected"));
}

#[tokio::test]
async fn critical_drift_opens_an_incident() {
    let h = harness();
    seed_agent(&h.store).await;

    let expected = json!({ "crm_endpoint": "https://old-crm.example.com", "tone": "friendly" });
    let report = h.drift.detect(AGENT, Some(expected), None).await.unwrap();

    assert_eq!(report.baseline, BaselineSource::Provided);
    assert_eq!(report.severity, DriftSeverity::Critical);
    assert_eq!(report.drifts.len(), 1, "only keys of the expected config are checked");

    let incident_id = report.incident_id.expect("incident for critical drift");
    let incident = h.store.get_incident(&incident_id).await.unwrap().unwrap();
    assert_eq!(incident.severity, IncidentSeverity::Critical);
    assert_eq!(incident.status, IncidentStatus::Investigating);
    assert_eq!(incident.source, "config_drift");
}

#[tokio::test]
async fn drift_rejects_bad_input() {
    let h = harness();
    seed_agent(&h.store).await;

    let err = h
        .drift
        .detect(AGENT, Some(json!(["not", "an", "object"])), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = h.drift.detect("ghost", None, None).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn auto_repair_is_opt_in_and_log_only() {
    let h = harness();
    seed_agent(&h.store).await;
    h.recovery.capture_snapshot(AGENT).await.unwrap();

    let mut agent = h.store.get_agent(AGENT).await.unwrap().unwrap();
    agent.config.tone = "curt".to_string();
    agent.config.crm_endpoint = Some("https://rogue.example.com".to_string());
    h.store.upsert_agent(agent).await.unwrap();

    let disabled = h.drift.auto_repair(AGENT, false).await.unwrap();
    assert!(!disabled.enabled);
    assert!(disabled.detection.is_none());
    assert!(h.store.entries_for(AGENT).await.unwrap().is_empty());

    let repair = h.drift.auto_repair(AGENT, true).await.unwrap();
    assert_eq!(repair.intended, vec!["tone".to_string()]);
    assert_eq!(repair.skipped_critical, vec!["crm_endpoint".to_string()]);

    let agent = h.store.get_agent(AGENT).await.unwrap().unwrap();
    assert_eq!(agent.config.tone, "curt", "repair never mutates config");
    let audit = h.store.entries_for(AGENT).await.unwrap();
    assert!(audit.iter().any(|e| e.event == "config_drift_repair_intent"));
}

// ---------------------------------------------------------------------------
// IncidentReport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_validates_severity() {
    let h = harness();
    let err = h.incidents.create(new_incident("catastrophic")).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = h
        .incidents
        .create(NewIncident {
            error_message: String::new(),
            ..new_incident("low")
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn non_critical_incident_starts_open() {
    let h = harness();
    let incident = tokio_test::assert_ok!(h.incidents.create(new_incident("Medium")).await);
    assert_eq!(incident.severity, IncidentSeverity::Medium);
    assert_eq!(incident.status, IncidentStatus::Open);
    assert_eq!(incident.title, "medium incident from crm_sync");
}

#[tokio::test]
async fn critical_incident_is_escalated_on_creation() {
    let h = harness();
    let incident = h.incidents.create(new_incident("critical")).await.unwrap();
    assert_eq!(incident.severity, IncidentSeverity::Critical);
    assert_eq!(incident.status, IncidentStatus::Investigating);

    let stored = h.store.get_incident(&incident.id).await.unwrap().unwrap();
    assert_eq!(stored, incident);
    let audit = h.store.entries_for(AGENT).await.unwrap();
    assert!(audit.iter().any(|e| e.event == "incident_escalated"));
}

#[tokio::test]
async fn escalation_never_lowers_severity() {
    let h = harness();
    let high = h.incidents.create(new_incident("high")).await.unwrap();

    let once = h
        .incidents
        .escalate(&high.id, "customer impact", Some("on-call"))
        .await
        .unwrap();
    assert_eq!(once.severity, IncidentSeverity::Critical);
    assert_eq!(once.status, IncidentStatus::Investigating);
    assert_eq!(once.metadata["escalated_to"], "on-call");
    assert_eq!(once.metadata["status"], 502);

    let twice = h.incidents.escalate(&high.id, "still down", None).await.unwrap();
    assert_eq!(twice.severity, IncidentSeverity::Critical);

    let err = h.incidents.escalate("missing", "x", None).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn update_validates_status_and_bumps_timestamp() {
    let h = harness();
    let incident = h.incidents.create(new_incident("low")).await.unwrap();

    let err = h
        .incidents
        .update(
            &incident.id,
            IncidentUpdate {
                status: Some("done".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let touched = h
        .incidents
        .update(&incident.id, IncidentUpdate::default())
        .await
        .unwrap();
    assert!(touched.updated_at >= incident.updated_at);
    assert_eq!(touched.status, IncidentStatus::Open);

    let resolved = h
        .incidents
        .update(
            &incident.id,
            IncidentUpdate {
                status: Some("resolved".to_string()),
                resolution: Some("CRM credentials rotated".to_string()),
                updated_by: Some("ops".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, IncidentStatus::Resolved);
    assert_eq!(resolved.resolution.as_deref(), Some("CRM credentials rotated"));
    assert_eq!(resolved.updated_by.as_deref(), Some("ops"));
    assert_eq!(resolved.severity, IncidentSeverity::Low);
}

#[tokio::test]
async fn queries_respect_window_and_filters() {
    let h = harness();
    h.incidents.create(new_incident("low")).await.unwrap();
    h.incidents.create(new_incident("critical")).await.unwrap();
    h.incidents
        .create(NewIncident {
            agent_id: "agent-2".to_string(),
            ..new_incident("medium")
        })
        .await
        .unwrap();

    let mut stale = h.incidents.create(new_incident("high")).await.unwrap();
    stale.created_at = Utc::now() - ChronoDuration::hours(48);
    h.store.save_incident(stale).await.unwrap();

    let all = h.incidents.get_incidents(&IncidentFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let mine = h
        .incidents
        .get_incidents(&IncidentFilter {
            agent_id: Some(AGENT.to_string()),
            severity: Some("critical".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);

    let wide = h
        .incidents
        .get_incidents(&IncidentFilter {
            window_hours: Some(72),
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(wide.len(), 2);

    let bad = h
        .incidents
        .get_incidents(&IncidentFilter {
            status: Some("pending".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(bad.unwrap_err().status_code(), 400);

    let summary = h.incidents.get_summary(&IncidentFilter::default()).await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.open_critical, 1);
    assert_eq!(summary.by_severity.get("critical"), Some(&1));
    assert_eq!(summary.by_status.get("open"), Some(&2));
    assert_eq!(summary.window_hours, 24);
}

#[tokio::test]
async fn out_of_range_window_is_a_validation_error() {
    let h = harness();
    h.incidents.create(new_incident("low")).await.unwrap();

    let filter = IncidentFilter {
        window_hours: Some(i64::MAX),
        ..Default::default()
    };
    let listed = h.incidents.get_incidents(&filter).await;
    assert_eq!(listed.unwrap_err().status_code(), 400);
    let summary = h.incidents.get_summary(&filter).await;
    assert_eq!(summary.unwrap_err().status_code(), 400);

    let filter = IncidentFilter {
        window_hours: Some(24 * 365 * 300_000),
        ..Default::default()
    };
    let listed = h.incidents.get_incidents(&filter).await;
    assert_eq!(listed.unwrap_err().status_code(), 400);
}
