// prompt-loop-rs/src/lib.rs
// Transcript evaluation -> prompt patch control loop.
//
// Data flow:
//   IngestOrchestrator -> RubricEvaluator -> { review queue | PromptPatcher }
//                                         -> persisted PromptVersion
//
// Design notes:
// - The evaluator is pure; every side effect lives in the orchestrator or
//   the patcher and goes through injected repository traits.
// - Auto-apply is gated by `LoopConfig::auto_apply_threshold` and a
//   non-empty suggested patch. The claim on a review is an atomic
//   check-and-set, so manual and automatic triggers never both apply.

use std::sync::Arc;
use std::time::Duration;

use shared_types::{
    with_deadline, AgentRepository, AuditLog, CallLogRepository, PromptRepository, PromptVersion,
    ReviewRepository, StoreError, StoreResult,
};

pub mod catalog;
pub mod kb_gaps;
pub mod orchestrator;
pub mod patch;
pub mod patcher;
pub mod render;
pub mod rubric;


pub use catalog::{CatalogError, StaticCatalog, TemplateCatalog};
pub use orchestrator::{
    ApplyPatchOutcome, BatchFailure, BatchReport, IngestOrchestrator, IngestOutcome,
    IngestRequest, ReviewQueueItem, ReviewedCall, RollbackOutcome,
};
pub use patcher::PromptPatcher;
pub use render::{PromptRenderer, RenderError, RenderInput, RenderedPrompt, StandardRenderer};
pub use rubric::{confidence_from_scores, CheckResult, Evaluation, RubricEvaluator};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, LoopError>;

/// Top-level error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency error: {0}")]
    Dependency(#[from] StoreError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("patch application failed for agent {agent_id}: {source}")]
    PatchApplication {
        agent_id: String,
        #[source]
        source: Box<LoopError>,
    },
}

impl LoopError {
    /// HTTP status an adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            LoopError::Validation(_) => 400,
            LoopError::NotFound(_) => 404,
            LoopError::Dependency(_) | LoopError::Render(_) => 500,
            LoopError::PatchApplication { source, .. } => source.status_code(),
        }
    }
}

/// Repositories the prompt loop reads and writes.
#[derive(Clone)]
pub struct LoopStores {
    pub agents: Arc<dyn AgentRepository>,
    pub prompts: Arc<dyn PromptRepository>,
    pub call_logs: Arc<dyn CallLogRepository>,
    pub reviews: Arc<dyn ReviewRepository>,
    pub audit: Arc<dyn AuditLog>,
}

impl LoopStores {
    /// Use one backend for every table.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AgentRepository
            + PromptRepository
            + CallLogRepository
            + ReviewRepository
            + AuditLog
            + 'static,
    {
        Self {
            agents: store.clone(),
            prompts: store.clone(),
            call_logs: store.clone(),
            reviews: store.clone(),
            audit: store,
        }
    }

    /// Send audit entries somewhere else (e.g. a [`shared_types::FileAuditLog`]).
    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    /// The version the agent's live pointer names. Highest version only when
    /// the agent has no pointer or it names a row that is not the agent's.
    pub(crate) async fn live_prompt(
        &self,
        agent_id: &str,
        pointer: Option<&str>,
        timeout: Duration,
    ) -> StoreResult<Option<PromptVersion>> {
        if let Some(prompt_id) = pointer {
            let live = with_deadline(timeout, "get_prompt", self.prompts.get_prompt(prompt_id))
                .await?
                .filter(|p| p.agent_id == agent_id);
            if live.is_some() {
                return Ok(live);
            }
            tracing::warn!(agent_id, prompt_id, "live prompt pointer is dangling");
        }
        with_deadline(timeout, "latest_prompt", self.prompts.latest_prompt(agent_id)).await
    }
}
