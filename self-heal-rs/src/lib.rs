//! # Self-Healing Primitives
//!
//! Operational safety net around deployed voice agents:
//!
//! - [`AutoRecovery`]: restores a known-good configuration once health
//!   checks have failed often enough within the failure window
//! - [`ConfigDriftDetector`]: compares live configuration against a baseline
//!   and raises an incident on critical drift
//! - [`IncidentReporter`]: incident lifecycle with a one-way severity ladder
//!
//! Every component writes its outcome to the append-only audit trail.

use std::sync::Arc;

use shared_types::{
    AgentRepository, AuditLog, HealthCheckRepository, IncidentRepository, InvalidVariant,
    StateSnapshotRepository, StoreError,
};

pub mod drift;
pub mod incident;
pub mod recovery;

#[cfg(test)]
mod tests;

pub use drift::{
    classify_field, BaselineSource, ConfigDriftDetector, DriftEntry, DriftReport, DriftSeverity,
    RepairReport, DEFAULT_CHECK_FIELDS,
};
pub use incident::{IncidentFilter, IncidentReporter, IncidentSummary, IncidentUpdate, NewIncident};
pub use recovery::{AutoRecovery, FailureType, RecoveryAction, RecoveryOutcome};

pub type Result<T> = std::result::Result<T, SelfHealError>;

#[derive(Debug, thiserror::Error)]
pub enum SelfHealError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency error: {0}")]
    Dependency(#[from] StoreError),
}

impl From<InvalidVariant> for SelfHealError {
    fn from(err: InvalidVariant) -> Self {
        SelfHealError::Validation(err.to_string())
    }
}

impl SelfHealError {
    pub fn status_code(&self) -> u16 {
        match self {
            SelfHealError::Validation(_) => 400,
            SelfHealError::NotFound(_) => 404,
            SelfHealError::Dependency(_) => 500,
        }
    }
}

/// Repositories the self-healing components read and write.
#[derive(Clone)]
pub struct HealStores {
    pub agents: Arc<dyn AgentRepository>,
    pub incidents: Arc<dyn IncidentRepository>,
    pub snapshots: Arc<dyn StateSnapshotRepository>,
    pub health_checks: Arc<dyn HealthCheckRepository>,
    pub audit: Arc<dyn AuditLog>,
}

impl HealStores {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AgentRepository
            + IncidentRepository
            + StateSnapshotRepository
            + HealthCheckRepository
            + AuditLog
            + 'static,
    {
        Self {
            agents: store.clone(),
            incidents: store.clone(),
            snapshots: store.clone(),
            health_checks: store.clone(),
            audit: store,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }
}

/// `now - window`. A window reaching past the representable range starts at
/// the earliest representable instant.
pub(crate) fn window_start(window: std::time::Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}
