//! Configuration drift detection.
//!
//! The live config view of an agent is compared field by field against a
//! baseline: the caller's expected config, else the agent's earliest stored
//! snapshot, else the live config itself (which trivially never drifts).
//!
//! Repair is log-only. `auto_repair` records which non-critical fields it
//! would restore and never touches critical fields or the stored config.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::instrument;

use shared_types::{with_deadline, AuditEntry};

use crate::incident::{IncidentReporter, NewIncident};
use crate::{HealStores, Result, SelfHealError};

/// Fields checked when the caller names none and gives no expected config.
pub const DEFAULT_CHECK_FIELDS: &[&str] = &[
    "api_keys",
    "crm_endpoint",
    "voice_id",
    "system_prompt",
    "niche",
    "tone",
    "goals",
    "business_hours",
    "compliance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    None,
    Low,
    Important,
    Critical,
}

impl DriftSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftSeverity::None => "none",
            DriftSeverity::Low => "low",
            DriftSeverity::Important => "important",
            DriftSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_field(field: &str) -> DriftSeverity {
    match field {
        "api_keys" | "crm_endpoint" => DriftSeverity::Critical,
        "voice_id" | "system_prompt" => DriftSeverity::Important,
        _ => DriftSeverity::Low,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    Provided,
    Snapshot,
    Current,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEntry {
    pub field: String,
    pub expected: Value,
    pub actual: Value,
    pub severity: DriftSeverity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub agent_id: String,
    pub drifted: bool,
    pub severity: DriftSeverity,
    pub drifts: Vec<DriftEntry>,
    pub baseline: BaselineSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub agent_id: String,
    pub enabled: bool,
    /// Fields a repair was logged for. The stored config is not modified.
    pub intended: Vec<String>,
    pub skipped_critical: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DriftReport>,
}

pub struct ConfigDriftDetector {
    stores: HealStores,
    incidents: Arc<IncidentReporter>,
    call_timeout: Duration,
}

impl ConfigDriftDetector {
    pub fn new(stores: HealStores, incidents: Arc<IncidentReporter>, call_timeout: Duration) -> Self {
        Self {
            stores,
            incidents,
            call_timeout,
        }
    }

    #[instrument(name = "drift_detect", skip(self, expected_config))]
    pub async fn detect(
        &self,
        agent_id: &str,
        expected_config: Option<Value>,
        check_fields: Option<Vec<String>>,
    ) -> Result<DriftReport> {
        if agent_id.trim().is_empty() {
            return Err(SelfHealError::Validation("agentId is required".to_string()));
        }
        if let Some(expected) = &expected_config {
            if !expected.is_object() {
                return Err(SelfHealError::Validation(
                    "expectedConfig must be an object".to_string(),
                ));
            }
        }

        let agent = with_deadline(
            self.call_timeout,
            "get_agent",
            self.stores.agents.get_agent(agent_id),
        )
        .await?
        .ok_or_else(|| SelfHealError::NotFound(format!("agent {agent_id}")))?;
        let current = as_map(agent.config_view());

        let (baseline, source) = match expected_config {
            Some(expected) => (as_map(expected), BaselineSource::Provided),
            None => match with_deadline(
                self.call_timeout,
                "earliest_snapshot",
                self.stores.snapshots.earliest_snapshot(agent_id),
            )
            .await?
            {
                Some(snapshot) => (as_map(snapshot.state.config_view()), BaselineSource::Snapshot),
                None => (current.clone(), BaselineSource::Current),
            },
        };

        // A partial expected config only speaks for the keys it carries.
        let fields: Vec<String> = match check_fields {
            Some(fields) if !fields.is_empty() => fields,
            _ if source == BaselineSource::Provided => baseline.keys().cloned().collect(),
            _ => DEFAULT_CHECK_FIELDS.iter().map(|f| f.to_string()).collect(),
        };

        let drifts: Vec<DriftEntry> = fields
            .iter()
            .filter_map(|field| {
                let expected = baseline.get(field).cloned().unwrap_or(Value::Null);
                let actual = current.get(field).cloned().unwrap_or(Value::Null);
                (expected != actual).then(|| DriftEntry {
                    field: field.clone(),
                    severity: classify_field(field),
                    expected,
                    actual,
                })
            })
            .collect();

        let severity = drifts
            .iter()
            .map(|d| d.severity)
            .max()
            .unwrap_or(DriftSeverity::None);

        let mut report = DriftReport {
            agent_id: agent_id.to_string(),
            drifted: !drifts.is_empty(),
            severity,
            drifts,
            baseline: source,
            incident_id: None,
            checked_at: Utc::now(),
        };

        if report.drifted {
            let fields: Vec<&str> = report.drifts.iter().map(|d| d.field.as_str()).collect();
            tracing::warn!(severity = %report.severity, ?fields, "config drift detected");
            self.audit(
                agent_id,
                "config_drift_detected",
                format!("{} drift in {}", report.severity, fields.join(", ")),
                json!({ "severity": report.severity, "drifts": report.drifts, "baseline": report.baseline }),
            )
            .await?;
        }

        if report.severity == DriftSeverity::Critical {
            let critical: Vec<String> = report
                .drifts
                .iter()
                .filter(|d| d.severity == DriftSeverity::Critical)
                .map(|d| d.field.clone())
                .collect();
            let incident = self
                .incidents
                .create(NewIncident {
                    agent_id: agent_id.to_string(),
                    error_message: format!("critical config drift in {}", critical.join(", ")),
                    severity: "critical".to_string(),
                    metadata: json!({ "fields": critical, "baseline": report.baseline }),
                    source: "config_drift".to_string(),
                    title: Some("Critical configuration drift".to_string()),
                })
                .await?;
            report.incident_id = Some(incident.id);
        }

        Ok(report)
    }

    /// Log-only repair of non-critical drift. Disabled unless `enabled` is set.
    #[instrument(name = "drift_auto_repair", skip(self))]
    pub async fn auto_repair(&self, agent_id: &str, enabled: bool) -> Result<RepairReport> {
        if !enabled {
            tracing::debug!("auto repair disabled");
            return Ok(RepairReport {
                agent_id: agent_id.to_string(),
                enabled,
                intended: Vec::new(),
                skipped_critical: Vec::new(),
                detection: None,
            });
        }

        let detection = self.detect(agent_id, None, None).await?;
        let (critical, repairable): (Vec<&DriftEntry>, Vec<&DriftEntry>) = detection
            .drifts
            .iter()
            .partition(|d| d.severity == DriftSeverity::Critical);

        let intended: Vec<String> = repairable.iter().map(|d| d.field.clone()).collect();
        let skipped_critical: Vec<String> = critical.iter().map(|d| d.field.clone()).collect();

        if !intended.is_empty() {
            self.audit(
                agent_id,
                "config_drift_repair_intent",
                format!("would restore {}", intended.join(", ")),
                json!({ "fields": intended, "skipped_critical": skipped_critical }),
            )
            .await?;
        }
        if !skipped_critical.is_empty() {
            tracing::warn!(fields = ?skipped_critical, "critical drift left for manual repair");
        }

        Ok(RepairReport {
            agent_id: agent_id.to_string(),
            enabled,
            intended,
            skipped_critical,
            detection: Some(detection),
        })
    }

    async fn audit(&self, agent_id: &str, event: &str, message: String, data: Value) -> Result<()> {
        let entry = AuditEntry::new(agent_id, event, message, data);
        with_deadline(self.call_timeout, "audit_append", self.stores.audit.append(entry)).await?;
        Ok(())
    }
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
