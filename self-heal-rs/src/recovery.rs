//! Automatic recovery after repeated health-check failures.
//!
//! Nothing happens until the agent has failed at least
//! `LoopConfig::failure_threshold` health checks inside
//! `LoopConfig::failure_window`. Past that guard, a config failure restores
//! the last known-good configuration and an api/connection failure is marked
//! for an api reset, which is carried out by the telephony layer.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use config_rs::LoopConfig;
use shared_types::{
    new_id, with_deadline, AgentConfig, AgentState, AgentStateSnapshot, AuditEntry, HealthCheck,
    InvalidVariant, StoreError,
};

use crate::{window_start, HealStores, Result, SelfHealError};

pub const REASON_THRESHOLD_NOT_MET: &str = "failure_threshold_not_met";
pub const REASON_NO_RECOVERY_STATE: &str = "no_recovery_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    Config,
    Api,
    Connection,
    Unknown,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Config => "config",
            FailureType::Api => "api",
            FailureType::Connection => "connection",
            FailureType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = InvalidVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "config" => Ok(FailureType::Config),
            "api" => Ok(FailureType::Api),
            "connection" => Ok(FailureType::Connection),
            "unknown" | "" => Ok(FailureType::Unknown),
            _ => Err(InvalidVariant {
                kind: "failure type",
                value: s.to_string(),
                expected: "config, api, connection, unknown",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    ConfigRollback,
    ApiReset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    pub agent_id: String,
    pub recovered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<RecoveryAction>,
    pub failure_type: FailureType,
    pub failure_count: usize,
    /// `provided`, or the id of the snapshot the state came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<String>,
}

pub struct AutoRecovery {
    stores: HealStores,
    cfg: LoopConfig,
}

impl AutoRecovery {
    pub fn new(stores: HealStores, cfg: LoopConfig) -> Self {
        Self { stores, cfg }
    }

    pub async fn record_health_check(
        &self,
        agent_id: &str,
        healthy: bool,
        detail: Option<String>,
    ) -> Result<HealthCheck> {
        if agent_id.trim().is_empty() {
            return Err(SelfHealError::Validation("agentId is required".to_string()));
        }
        let check = HealthCheck {
            id: new_id(),
            agent_id: agent_id.to_string(),
            healthy,
            detail,
            checked_at: Utc::now(),
        };
        with_deadline(
            self.cfg.call_timeout,
            "record_health_check",
            self.stores.health_checks.record_health_check(check.clone()),
        )
        .await?;
        if !healthy {
            tracing::warn!(agent_id, detail = ?check.detail, "health check failed");
        }
        Ok(check)
    }

    /// Store the agent's current config and prompt as a recovery baseline.
    #[instrument(name = "capture_snapshot", skip(self))]
    pub async fn capture_snapshot(&self, agent_id: &str) -> Result<AgentStateSnapshot> {
        let agent = with_deadline(
            self.cfg.call_timeout,
            "get_agent",
            self.stores.agents.get_agent(agent_id),
        )
        .await?
        .ok_or_else(|| SelfHealError::NotFound(format!("agent {agent_id}")))?;

        let snapshot = AgentStateSnapshot {
            id: new_id(),
            agent_id: agent_id.to_string(),
            state: AgentState {
                config: serde_json::to_value(&agent.config).map_err(StoreError::from)?,
                system_prompt: Some(agent.system_prompt),
                deployed_at: agent.updated_at,
            },
            updated_at: Utc::now(),
        };
        with_deadline(
            self.cfg.call_timeout,
            "save_snapshot",
            self.stores.snapshots.save_snapshot(snapshot.clone()),
        )
        .await?;
        tracing::info!(snapshot_id = %snapshot.id, "agent state captured");
        Ok(snapshot)
    }

    #[instrument(name = "auto_recovery", skip(self, last_working_state))]
    pub async fn auto_recovery(
        &self,
        agent_id: &str,
        failure_type: FailureType,
        last_working_state: Option<AgentState>,
    ) -> Result<RecoveryOutcome> {
        if agent_id.trim().is_empty() {
            return Err(SelfHealError::Validation("agentId is required".to_string()));
        }

        match self
            .try_recover(agent_id, failure_type, last_working_state)
            .await
        {
            Ok(outcome) => {
                let message = match (&outcome.recovery_action, &outcome.reason) {
                    (Some(action), _) => format!("recovery succeeded: {action:?}"),
                    (None, Some(reason)) => format!("no recovery performed: {reason}"),
                    (None, None) => "no recovery performed".to_string(),
                };
                self.audit(agent_id, "auto_recovery", message, json!(outcome))
                    .await?;
                if outcome.recovered {
                    metrics::increment_counter!("self_heal_recoveries_total");
                    tracing::info!(action = ?outcome.recovery_action, "agent recovered");
                }
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(error = %err, "auto recovery failed");
                let logged = self
                    .audit(
                        agent_id,
                        "auto_recovery_failed",
                        format!("recovery failed: {err}"),
                        json!({ "failure_type": failure_type, "error": err.to_string() }),
                    )
                    .await;
                if let Err(audit_err) = logged {
                    tracing::error!(error = %audit_err, "failed to record recovery failure");
                }
                Err(err)
            }
        }
    }

    async fn try_recover(
        &self,
        agent_id: &str,
        failure_type: FailureType,
        last_working_state: Option<AgentState>,
    ) -> Result<RecoveryOutcome> {
        let since = window_start(self.cfg.failure_window);
        let failure_count = with_deadline(
            self.cfg.call_timeout,
            "count_failures_since",
            self.stores.health_checks.count_failures_since(agent_id, since),
        )
        .await?;

        let mut outcome = RecoveryOutcome {
            agent_id: agent_id.to_string(),
            recovered: false,
            reason: None,
            recovery_action: None,
            failure_type,
            failure_count,
            restored_from: None,
        };

        if failure_count < self.cfg.failure_threshold {
            tracing::debug!(failure_count, "below failure threshold, not recovering");
            outcome.reason = Some(REASON_THRESHOLD_NOT_MET.to_string());
            return Ok(outcome);
        }

        match failure_type {
            FailureType::Api | FailureType::Connection => {
                outcome.recovered = true;
                outcome.recovery_action = Some(RecoveryAction::ApiReset);
            }
            FailureType::Config | FailureType::Unknown => {
                let Some((state, restored_from)) = self.restore_target(agent_id, last_working_state).await?
                else {
                    outcome.reason = Some(REASON_NO_RECOVERY_STATE.to_string());
                    return Ok(outcome);
                };
                if !state.config.is_object() {
                    outcome.reason = Some(REASON_NO_RECOVERY_STATE.to_string());
                    return Ok(outcome);
                }

                let config: AgentConfig = serde_json::from_value(state.config).map_err(|err| {
                    SelfHealError::Validation(format!("recovery state is not a valid agent config: {err}"))
                })?;
                let updated = with_deadline(
                    self.cfg.call_timeout,
                    "update_config",
                    self.stores.agents.update_config(agent_id, config),
                )
                .await?;
                if !updated {
                    return Err(SelfHealError::NotFound(format!("agent {agent_id}")));
                }

                outcome.recovered = true;
                outcome.recovery_action = Some(RecoveryAction::ConfigRollback);
                outcome.restored_from = Some(restored_from);
            }
        }

        Ok(outcome)
    }

    /// The caller's state, else the newest snapshot older than the staleness window.
    async fn restore_target(
        &self,
        agent_id: &str,
        provided: Option<AgentState>,
    ) -> Result<Option<(AgentState, String)>> {
        if let Some(state) = provided {
            return Ok(Some((state, "provided".to_string())));
        }
        let cutoff = window_start(self.cfg.snapshot_staleness);
        let snapshot = with_deadline(
            self.cfg.call_timeout,
            "latest_snapshot_before",
            self.stores.snapshots.latest_snapshot_before(agent_id, cutoff),
        )
        .await?;
        Ok(snapshot.map(|s| (s.state, s.id)))
    }

    async fn audit(&self, agent_id: &str, event: &str, message: String, data: Value) -> Result<()> {
        let entry = AuditEntry::new(agent_id, event, message, data);
        with_deadline(self.cfg.call_timeout, "audit_append", self.stores.audit.append(entry)).await?;
        Ok(())
    }
}
