//! Incident lifecycle.
//!
//! Incidents are never deleted. Severity only climbs the
//! `low -> medium -> high -> critical` ladder, and a critical incident is
//! escalated as soon as it is created.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use config_rs::LoopConfig;
use shared_types::{
    new_id, with_deadline, AuditEntry, Incident, IncidentQuery, IncidentSeverity, IncidentStatus,
};

use crate::{HealStores, Result, SelfHealError};

/// Input for [`IncidentReporter::create`]. Severity arrives as text and is
/// validated against the ladder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentFilter {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// Look-back window; defaults to `LoopConfig::incident_window_hours`.
    #[serde(default)]
    pub window_hours: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub open_critical: usize,
    pub window_hours: i64,
    pub since: DateTime<Utc>,
}

pub struct IncidentReporter {
    stores: HealStores,
    call_timeout: Duration,
    window_hours: i64,
}

impl IncidentReporter {
    pub fn new(stores: HealStores, cfg: &LoopConfig) -> Self {
        Self {
            stores,
            call_timeout: cfg.call_timeout,
            window_hours: cfg.incident_window_hours,
        }
    }

    #[instrument(
        name = "incident_create",
        skip_all,
        fields(agent_id = %new.agent_id, severity = %new.severity)
    )]
    pub async fn create(&self, new: NewIncident) -> Result<Incident> {
        if new.agent_id.trim().is_empty() {
            return Err(SelfHealError::Validation("agentId is required".to_string()));
        }
        if new.error_message.trim().is_empty() {
            return Err(SelfHealError::Validation("errorMessage is required".to_string()));
        }
        let severity: IncidentSeverity = new.severity.parse()?;

        let now = Utc::now();
        let source = if new.source.trim().is_empty() {
            "unknown".to_string()
        } else {
            new.source
        };
        let incident = Incident {
            id: new_id(),
            title: new
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("{severity} incident from {source}")),
            agent_id: new.agent_id,
            error_message: new.error_message,
            severity,
            status: IncidentStatus::Open,
            source,
            metadata: new.metadata,
            resolution: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        };

        with_deadline(
            self.call_timeout,
            "insert_incident",
            self.stores.incidents.insert_incident(incident.clone()),
        )
        .await?;
        self.audit(
            &incident.agent_id,
            "incident_created",
            format!("incident {} opened: {}", incident.id, incident.title),
            json!({
                "incident_id": incident.id,
                "severity": incident.severity,
                "source": incident.source,
            }),
        )
        .await?;
        metrics::increment_counter!("self_heal_incidents_total");
        tracing::info!(incident_id = %incident.id, "incident created");

        if incident.severity == IncidentSeverity::Critical {
            return self
                .escalate(&incident.id, "critical severity at creation", None)
                .await;
        }
        Ok(incident)
    }

    /// One rung up the severity ladder and into `investigating`.
    #[instrument(name = "incident_escalate", skip(self))]
    pub async fn escalate(
        &self,
        incident_id: &str,
        reason: &str,
        escalated_to: Option<&str>,
    ) -> Result<Incident> {
        let mut incident = self.load(incident_id).await?;
        let from = incident.severity;

        incident.severity = from.escalated();
        incident.status = IncidentStatus::Investigating;
        incident.updated_at = Utc::now();
        if let Some(target) = escalated_to {
            if let Value::Object(map) = &mut incident.metadata {
                map.insert("escalated_to".to_string(), Value::String(target.to_string()));
            } else {
                incident.metadata = json!({ "escalated_to": target });
            }
        }

        self.save(&incident).await?;
        self.audit(
            &incident.agent_id,
            "incident_escalated",
            format!("incident {} escalated {} -> {}", incident.id, from, incident.severity),
            json!({
                "incident_id": incident.id,
                "from": from,
                "to": incident.severity,
                "reason": reason,
                "escalated_to": escalated_to,
            }),
        )
        .await?;
        tracing::warn!(from = %from, to = %incident.severity, "incident escalated");

        Ok(incident)
    }

    #[instrument(name = "incident_update", skip(self, update))]
    pub async fn update(&self, incident_id: &str, update: IncidentUpdate) -> Result<Incident> {
        let status = update
            .status
            .as_deref()
            .map(str::parse::<IncidentStatus>)
            .transpose()?;

        let mut incident = self.load(incident_id).await?;
        if let Some(status) = status {
            incident.status = status;
        }
        if let Some(resolution) = update.resolution {
            incident.resolution = Some(resolution);
        }
        if let Some(updated_by) = update.updated_by {
            incident.updated_by = Some(updated_by);
        }
        incident.updated_at = Utc::now();

        self.save(&incident).await?;
        self.audit(
            &incident.agent_id,
            "incident_updated",
            format!("incident {} is {}", incident.id, incident.status),
            json!({
                "incident_id": incident.id,
                "status": incident.status,
                "resolution": incident.resolution,
                "updated_by": incident.updated_by,
            }),
        )
        .await?;

        Ok(incident)
    }

    pub async fn get_incident(&self, incident_id: &str) -> Result<Incident> {
        self.load(incident_id).await
    }

    /// Newest first, restricted to the look-back window.
    pub async fn get_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let (query, _) = self.query(filter)?;
        Ok(with_deadline(
            self.call_timeout,
            "list_incidents",
            self.stores.incidents.list_incidents(&query),
        )
        .await?)
    }

    /// Counts by severity and status inside the look-back window. `limit` is ignored.
    pub async fn get_summary(&self, filter: &IncidentFilter) -> Result<IncidentSummary> {
        let (mut query, window_hours) = self.query(filter)?;
        query.limit = None;
        let incidents = with_deadline(
            self.call_timeout,
            "list_incidents",
            self.stores.incidents.list_incidents(&query),
        )
        .await?;

        let mut by_severity = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut open_critical = 0;
        for incident in &incidents {
            *by_severity
                .entry(incident.severity.to_string())
                .or_insert(0) += 1;
            *by_status.entry(incident.status.to_string()).or_insert(0) += 1;
            if incident.severity == IncidentSeverity::Critical
                && matches!(
                    incident.status,
                    IncidentStatus::Open | IncidentStatus::Investigating
                )
            {
                open_critical += 1;
            }
        }

        Ok(IncidentSummary {
            total: incidents.len(),
            by_severity,
            by_status,
            open_critical,
            window_hours,
            since: query.since.unwrap_or_else(Utc::now),
        })
    }

    fn query(&self, filter: &IncidentFilter) -> Result<(IncidentQuery, i64)> {
        let window_hours = filter.window_hours.unwrap_or(self.window_hours);
        if window_hours <= 0 {
            return Err(SelfHealError::Validation(
                "windowHours must be positive".to_string(),
            ));
        }
        let since = chrono::Duration::try_hours(window_hours)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| {
                SelfHealError::Validation(format!("windowHours {window_hours} is out of range"))
            })?;
        let query = IncidentQuery {
            agent_id: filter.agent_id.clone(),
            status: filter.status.as_deref().map(str::parse).transpose()?,
            severity: filter.severity.as_deref().map(str::parse).transpose()?,
            since: Some(since),
            limit: filter.limit,
        };
        Ok((query, window_hours))
    }

    async fn load(&self, incident_id: &str) -> Result<Incident> {
        with_deadline(
            self.call_timeout,
            "get_incident",
            self.stores.incidents.get_incident(incident_id),
        )
        .await?
        .ok_or_else(|| SelfHealError::NotFound(format!("incident {incident_id}")))
    }

    async fn save(&self, incident: &Incident) -> Result<()> {
        let saved = with_deadline(
            self.call_timeout,
            "save_incident",
            self.stores.incidents.save_incident(incident.clone()),
        )
        .await?;
        if saved {
            Ok(())
        } else {
            Err(SelfHealError::NotFound(format!("incident {}", incident.id)))
        }
    }

    async fn audit(&self, agent_id: &str, event: &str, message: String, data: Value) -> Result<()> {
        let entry = AuditEntry::new(agent_id, event, message, data);
        with_deadline(self.call_timeout, "audit_append", self.stores.audit.append(entry)).await?;
        Ok(())
    }
}
