// shared-types-rs/src/memory.rs
// In-memory implementation of every repository trait.
//
// All tables sit behind a single RwLock, so each trait method is atomic with
// respect to the others. That is what makes `claim_patch` a real
// check-and-set rather than a read followed by a write.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::{
    Agent, AgentConfig, AgentStateSnapshot, AuditEntry, CallLog, HealthCheck, Incident,
    PromptVersion, Review,
};
use crate::repository::{
    AgentRepository, AuditLog, CallLogRepository, HealthCheckRepository, IncidentQuery,
    IncidentRepository, PromptRepository, ReviewRepository, StateSnapshotRepository, StoreError,
    StoreResult,
};

#[derive(Debug, Default)]
struct Tables {
    agents: HashMap<String, Agent>,
    prompts: Vec<PromptVersion>,
    call_logs: Vec<CallLog>,
    reviews: Vec<Review>,
    audit: Vec<AuditEntry>,
    incidents: Vec<Incident>,
    snapshots: Vec<AgentStateSnapshot>,
    health_checks: Vec<HealthCheck>,
}

/// Startup fixture: agents plus their existing prompt versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub prompts: Vec<PromptVersion>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, seed: SeedData) {
        let mut tables = self.tables.write().await;
        for agent in seed.agents {
            tables.agents.insert(agent.id.clone(), agent);
        }
        tables.prompts.extend(seed.prompts);
    }

    /// Load a JSON [`SeedData`] file.
    pub async fn load_seed_file(&self, path: &Path) -> StoreResult<usize> {
        let raw = tokio::fs::read_to_string(path).await?;
        let seed: SeedData = serde_json::from_str(&raw)?;
        let count = seed.agents.len();
        self.seed(seed).await;
        Ok(count)
    }
}

#[async_trait]
impl AgentRepository for InMemoryStore {
    async fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        Ok(self.tables.read().await.agents.get(agent_id).cloned())
    }

    async fn upsert_agent(&self, agent: Agent) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .agents
            .insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn set_live_prompt(
        &self,
        agent_id: &str,
        system_prompt: &str,
        prompt_id: &str,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.system_prompt = system_prompt.to_string();
                agent.prompt_id = Some(prompt_id.to_string());
                agent.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_config(&self, agent_id: &str, config: AgentConfig) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.config = config;
                agent.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl PromptRepository for InMemoryStore {
    async fn insert_prompt(&self, prompt: PromptVersion) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.prompts.iter().any(|p| p.id == prompt.id) {
            return Err(StoreError::Conflict(format!(
                "prompt version {} already exists",
                prompt.id
            )));
        }
        if tables
            .prompts
            .iter()
            .any(|p| p.agent_id == prompt.agent_id && p.version == prompt.version)
        {
            return Err(StoreError::Conflict(format!(
                "agent {} already has prompt version {}",
                prompt.agent_id, prompt.version
            )));
        }
        tables.prompts.push(prompt);
        Ok(())
    }

    async fn append_version(&self, mut prompt: PromptVersion) -> StoreResult<PromptVersion> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .prompts
            .iter()
            .find(|p| p.agent_id == prompt.agent_id && p.prompt_hash == prompt.prompt_hash)
        {
            return Ok(existing.clone());
        }
        prompt.version = tables
            .prompts
            .iter()
            .filter(|p| p.agent_id == prompt.agent_id)
            .map(|p| p.version)
            .max()
            .map_or(1, |v| v + 1);
        tables.prompts.push(prompt.clone());
        Ok(prompt)
    }

    async fn get_prompt(&self, prompt_id: &str) -> StoreResult<Option<PromptVersion>> {
        let tables = self.tables.read().await;
        Ok(tables.prompts.iter().find(|p| p.id == prompt_id).cloned())
    }

    async fn latest_prompt(&self, agent_id: &str) -> StoreResult<Option<PromptVersion>> {
        let tables = self.tables.read().await;
        Ok(tables
            .prompts
            .iter()
            .filter(|p| p.agent_id == agent_id)
            .max_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .cloned())
    }

    async fn find_prompt_by_hash(
        &self,
        agent_id: &str,
        prompt_hash: &str,
    ) -> StoreResult<Option<PromptVersion>> {
        let tables = self.tables.read().await;
        Ok(tables
            .prompts
            .iter()
            .find(|p| p.agent_id == agent_id && p.prompt_hash == prompt_hash)
            .cloned())
    }

    async fn list_prompts(&self, agent_id: &str) -> StoreResult<Vec<PromptVersion>> {
        let tables = self.tables.read().await;
        let mut out: Vec<PromptVersion> = tables
            .prompts
            .iter()
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.version);
        Ok(out)
    }
}

#[async_trait]
impl CallLogRepository for InMemoryStore {
    async fn insert_call_log(&self, log: CallLog) -> StoreResult<()> {
        self.tables.write().await.call_logs.push(log);
        Ok(())
    }

    async fn get_call_log(&self, call_log_id: &str) -> StoreResult<Option<CallLog>> {
        let tables = self.tables.read().await;
        Ok(tables.call_logs.iter().find(|l| l.id == call_log_id).cloned())
    }

    async fn link_review(
        &self,
        call_log_id: &str,
        review_id: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.call_logs.iter_mut().find(|l| l.id == call_log_id) {
            Some(log) => {
                log.review_id = Some(review_id.to_string());
                log.reviewed_at = Some(reviewed_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_review_failure(&self, call_log_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.call_logs.iter_mut().find(|l| l.id == call_log_id) {
            Some(log) => {
                log.review_attempts = log.review_attempts.saturating_add(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unreviewed_call_logs(&self, limit: usize) -> StoreResult<Vec<CallLog>> {
        let tables = self.tables.read().await;
        let mut out: Vec<CallLog> = tables
            .call_logs
            .iter()
            .filter(|l| l.reviewed_at.is_none())
            .cloned()
            .collect();
        out.sort_by_key(|l| (l.review_attempts, l.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl ReviewRepository for InMemoryStore {
    async fn insert_review(&self, review: Review) -> StoreResult<()> {
        self.tables.write().await.reviews.push(review);
        Ok(())
    }

    async fn get_review(&self, review_id: &str) -> StoreResult<Option<Review>> {
        let tables = self.tables.read().await;
        Ok(tables.reviews.iter().find(|r| r.id == review_id).cloned())
    }

    async fn pending_reviews(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Review>> {
        let tables = self.tables.read().await;
        let mut out: Vec<Review> = tables
            .reviews
            .iter()
            .filter(|r| !r.patch_applied)
            .filter(|r| agent_id.map_or(true, |id| r.agent_id == id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn claim_patch(&self, review_id: &str, applied_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables
            .reviews
            .iter_mut()
            .find(|r| r.id == review_id && !r.patch_applied)
        {
            Some(review) => {
                review.patch_applied = true;
                review.applied_at = Some(applied_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_patch_claim(&self, review_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables
            .reviews
            .iter_mut()
            .find(|r| r.id == review_id && r.patch_applied)
        {
            Some(review) => {
                review.patch_applied = false;
                review.applied_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuditLog for InMemoryStore {
    async fn append(&self, entry: AuditEntry) -> StoreResult<()> {
        self.tables.write().await.audit.push(entry);
        Ok(())
    }

    async fn entries_for(&self, agent_id: &str) -> StoreResult<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IncidentRepository for InMemoryStore {
    async fn insert_incident(&self, incident: Incident) -> StoreResult<()> {
        self.tables.write().await.incidents.push(incident);
        Ok(())
    }

    async fn get_incident(&self, incident_id: &str) -> StoreResult<Option<Incident>> {
        let tables = self.tables.read().await;
        Ok(tables.incidents.iter().find(|i| i.id == incident_id).cloned())
    }

    async fn save_incident(&self, incident: Incident) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => {
                *existing = incident;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_incidents(&self, query: &IncidentQuery) -> StoreResult<Vec<Incident>> {
        let tables = self.tables.read().await;
        let mut out: Vec<Incident> = tables
            .incidents
            .iter()
            .filter(|i| query.agent_id.as_deref().map_or(true, |id| i.agent_id == id))
            .filter(|i| query.status.map_or(true, |s| i.status == s))
            .filter(|i| query.severity.map_or(true, |s| i.severity == s))
            .filter(|i| query.since.map_or(true, |since| i.created_at >= since))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[async_trait]
impl StateSnapshotRepository for InMemoryStore {
    async fn save_snapshot(&self, snapshot: AgentStateSnapshot) -> StoreResult<()> {
        self.tables.write().await.snapshots.push(snapshot);
        Ok(())
    }

    async fn latest_snapshot_before(
        &self,
        agent_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<AgentStateSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .iter()
            .filter(|s| s.agent_id == agent_id && s.updated_at < cutoff)
            .max_by_key(|s| s.updated_at)
            .cloned())
    }

    async fn earliest_snapshot(&self, agent_id: &str) -> StoreResult<Option<AgentStateSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .min_by_key(|s| s.updated_at)
            .cloned())
    }
}

#[async_trait]
impl HealthCheckRepository for InMemoryStore {
    async fn record_health_check(&self, check: HealthCheck) -> StoreResult<()> {
        self.tables.write().await.health_checks.push(check);
        Ok(())
    }

    async fn count_failures_since(
        &self,
        agent_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let tables = self.tables.read().await;
        Ok(tables
            .health_checks
            .iter()
            .filter(|c| c.agent_id == agent_id && !c.healthy && c.checked_at >= since)
            .count())
    }
}
