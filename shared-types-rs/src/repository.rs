// shared-types-rs/src/repository.rs
// Persistence contract for the control loop.
//
// One trait per table so each component depends only on what it touches and
// tests can substitute fakes. Lookups return `Option`; "not found" is a
// domain decision made by the caller, not a store error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    Agent, AgentConfig, AgentStateSnapshot, AuditEntry, CallLog, HealthCheck, Incident,
    IncidentSeverity, IncidentStatus, PromptVersion, Review,
};

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store call '{operation}' exceeded its deadline of {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u128,
    },

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// `agents` table: live configuration and the live system prompt pointer.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>>;

    async fn upsert_agent(&self, agent: Agent) -> StoreResult<()>;

    /// Point the agent at `system_prompt` (taken from version `prompt_id`).
    /// Returns false when the agent does not exist.
    async fn set_live_prompt(
        &self,
        agent_id: &str,
        system_prompt: &str,
        prompt_id: &str,
    ) -> StoreResult<bool>;

    /// Returns false when the agent does not exist.
    async fn update_config(&self, agent_id: &str, config: AgentConfig) -> StoreResult<bool>;
}

/// `agent_prompts` table. Append-only.
#[async_trait]
pub trait PromptRepository: Send + Sync {
    /// Insert a row as given. `(agent_id, version)` and `id` must be unique.
    async fn insert_prompt(&self, prompt: PromptVersion) -> StoreResult<()>;

    /// Store `prompt` as the agent's next version, numbering it after the
    /// highest existing one in the same write. A row with the same
    /// `(agent_id, prompt_hash)` is returned unchanged instead of inserting.
    async fn append_version(&self, prompt: PromptVersion) -> StoreResult<PromptVersion>;

    async fn get_prompt(&self, prompt_id: &str) -> StoreResult<Option<PromptVersion>>;

    /// Highest `version` for the agent.
    async fn latest_prompt(&self, agent_id: &str) -> StoreResult<Option<PromptVersion>>;

    async fn find_prompt_by_hash(
        &self,
        agent_id: &str,
        prompt_hash: &str,
    ) -> StoreResult<Option<PromptVersion>>;

    async fn list_prompts(&self, agent_id: &str) -> StoreResult<Vec<PromptVersion>>;
}

/// `agent_call_logs` table.
#[async_trait]
pub trait CallLogRepository: Send + Sync {
    async fn insert_call_log(&self, log: CallLog) -> StoreResult<()>;

    async fn get_call_log(&self, call_log_id: &str) -> StoreResult<Option<CallLog>>;

    /// Set the review back-reference. Returns false when the log does not exist.
    async fn link_review(
        &self,
        call_log_id: &str,
        review_id: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Count a failed review attempt. Returns false when the log does not exist.
    async fn record_review_failure(&self, call_log_id: &str) -> StoreResult<bool>;

    /// Logs with no `reviewed_at`, fewest failed attempts first, then oldest first.
    async fn unreviewed_call_logs(&self, limit: usize) -> StoreResult<Vec<CallLog>>;
}

/// `agent_prompt_reviews` table.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn insert_review(&self, review: Review) -> StoreResult<()>;

    async fn get_review(&self, review_id: &str) -> StoreResult<Option<Review>>;

    /// Reviews with `patch_applied = false`, newest first.
    async fn pending_reviews(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Review>>;

    /// Atomic `UPDATE ... SET patch_applied = true WHERE id = ? AND patch_applied = false`.
    /// Returns true only for the caller whose update affected the row.
    async fn claim_patch(&self, review_id: &str, applied_at: DateTime<Utc>) -> StoreResult<bool>;

    /// Undo a claim whose patch could not be applied.
    async fn release_patch_claim(&self, review_id: &str) -> StoreResult<bool>;
}

/// `agent_logs` append-only audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> StoreResult<()>;

    async fn entries_for(&self, agent_id: &str) -> StoreResult<Vec<AuditEntry>>;
}

/// Filters for incident listings.
#[derive(Debug, Clone, Default)]
pub struct IncidentQuery {
    pub agent_id: Option<String>,
    pub status: Option<IncidentStatus>,
    pub severity: Option<IncidentSeverity>,
    /// Only incidents created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// `mcp_incidents` table.
#[async_trait]
pub trait IncidentRepository: Send + Sync {
    async fn insert_incident(&self, incident: Incident) -> StoreResult<()>;

    async fn get_incident(&self, incident_id: &str) -> StoreResult<Option<Incident>>;

    /// Update by id. Returns false when the incident does not exist.
    async fn save_incident(&self, incident: Incident) -> StoreResult<bool>;

    /// Newest first.
    async fn list_incidents(&self, query: &IncidentQuery) -> StoreResult<Vec<Incident>>;
}

/// `mcp_agent_states` table.
#[async_trait]
pub trait StateSnapshotRepository: Send + Sync {
    async fn save_snapshot(&self, snapshot: AgentStateSnapshot) -> StoreResult<()>;

    /// Most recent snapshot last updated strictly before `cutoff`.
    async fn latest_snapshot_before(
        &self,
        agent_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<AgentStateSnapshot>>;

    async fn earliest_snapshot(&self, agent_id: &str) -> StoreResult<Option<AgentStateSnapshot>>;
}

/// `mcp_health_checks` table.
#[async_trait]
pub trait HealthCheckRepository: Send + Sync {
    async fn record_health_check(&self, check: HealthCheck) -> StoreResult<()>;

    /// Number of `healthy = false` rows for the agent checked at or after `since`.
    async fn count_failures_since(&self, agent_id: &str, since: DateTime<Utc>)
        -> StoreResult<usize>;
}
