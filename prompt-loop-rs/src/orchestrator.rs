// prompt-loop-rs/src/orchestrator.rs
// Pipeline entry point: received -> logged -> evaluated -> {auto-applied | queued}.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use config_rs::LoopConfig;
use shared_types::{
    new_id, with_deadline, AuditEntry, CallLog, CallMetrics, NicheOverlay, PromptVersion, Review,
    StoreResult,
};

use crate::catalog::TemplateCatalog;
use crate::patcher::PromptPatcher;
use crate::rubric::RubricEvaluator;
use crate::{LoopError, LoopStores, Result};

/// Transcript submitted for evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metrics: Option<CallMetrics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub call_log: CallLog,
    pub evaluation: Review,
    pub patch_applied: bool,
    pub new_prompt_id: Option<String>,
}

/// Result of evaluating one stored call log.
#[derive(Debug, Clone)]
pub struct ReviewedCall {
    pub review: Review,
    pub patch_applied: bool,
    pub new_prompt_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueItem {
    pub review: Review,
    pub transcript: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatchOutcome {
    pub review_id: String,
    pub new_prompt_id: Option<String>,
    pub prompt_hash: Option<String>,
    /// The review had already been consumed; nothing was applied by this call.
    pub already_applied: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub rolled_back_to: String,
    pub hash: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub call_log_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: usize,
    pub errors: usize,
    pub total: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    fn from_results(results: Vec<(String, Result<ReviewedCall>)>) -> Self {
        let total = results.len();
        let failures: Vec<BatchFailure> = results
            .into_iter()
            .filter_map(|(call_log_id, result)| {
                result.err().map(|err| BatchFailure {
                    call_log_id,
                    error: err.to_string(),
                })
            })
            .collect();

        Self {
            processed: total - failures.len(),
            errors: failures.len(),
            total,
            failures,
        }
    }
}

pub struct IngestOrchestrator {
    stores: LoopStores,
    catalog: Arc<dyn TemplateCatalog>,
    evaluator: RubricEvaluator,
    patcher: Arc<PromptPatcher>,
    cfg: LoopConfig,
}

impl IngestOrchestrator {
    pub fn new(
        stores: LoopStores,
        catalog: Arc<dyn TemplateCatalog>,
        patcher: Arc<PromptPatcher>,
        cfg: LoopConfig,
    ) -> Self {
        Self {
            evaluator: RubricEvaluator::from_config(&cfg),
            stores,
            catalog,
            patcher,
            cfg,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.cfg
    }

    async fn deadline<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        with_deadline(self.cfg.call_timeout, operation, fut).await
    }

    #[instrument(
        name = "ingest_transcript",
        skip_all,
        fields(agent_id = %request.agent_id, call_id = ?request.call_id)
    )]
    pub async fn ingest_transcript(&self, request: IngestRequest) -> Result<IngestOutcome> {
        if request.agent_id.trim().is_empty() {
            return Err(LoopError::Validation("agentId is required".to_string()));
        }
        if request.transcript.trim().is_empty() {
            return Err(LoopError::Validation("transcript is required".to_string()));
        }

        let call_log = CallLog {
            id: new_id(),
            agent_id: request.agent_id,
            prompt_id: request.prompt_id,
            call_id: request.call_id,
            transcript: request.transcript,
            summary: request.summary,
            tags: request.tags,
            metrics: request.metrics.unwrap_or_default(),
            review_id: None,
            reviewed_at: None,
            review_attempts: 0,
            created_at: Utc::now(),
        };
        self.deadline(
            "insert_call_log",
            self.stores.call_logs.insert_call_log(call_log.clone()),
        )
        .await?;
        tracing::debug!(call_log_id = %call_log.id, "call log persisted");

        let reviewed = self.review_call_log(&call_log).await?;

        let mut call_log = call_log;
        call_log.review_id = Some(reviewed.review.id.clone());
        call_log.reviewed_at = Some(reviewed.review.created_at);

        Ok(IngestOutcome {
            call_log,
            evaluation: reviewed.review,
            patch_applied: reviewed.patch_applied,
            new_prompt_id: reviewed.new_prompt_id,
        })
    }

    /// Evaluate a stored call log, persist the review, link it back, and
    /// auto-apply the suggested patch when confidence allows. A failed
    /// auto-apply leaves the review queued; it never fails this call.
    pub async fn review_call_log(&self, call_log: &CallLog) -> Result<ReviewedCall> {
        let prompt = self
            .resolve_prompt(&call_log.agent_id, call_log.prompt_id.as_deref())
            .await?;
        let overlay = self.resolve_overlay(&prompt)?;

        let evaluation =
            self.evaluator
                .evaluate(&call_log.transcript, &prompt, &overlay, &call_log.metrics);
        metrics::increment_counter!("prompt_loop_evaluations_total");

        let now = Utc::now();
        let mut review = Review {
            id: new_id(),
            agent_id: call_log.agent_id.clone(),
            call_log_id: call_log.id.clone(),
            prompt_id: prompt.id.clone(),
            rubric_scores: evaluation.rubric_scores,
            confidence_score: evaluation.confidence_score,
            pass: evaluation.pass,
            improvement_notes: evaluation.improvement_notes,
            suggested_patch: evaluation.suggested_prompt_patch,
            suggested_kb_addition: evaluation.suggested_kb_addition,
            patch_applied: false,
            applied_at: None,
            created_at: now,
        };
        self.deadline("insert_review", self.stores.reviews.insert_review(review.clone()))
            .await?;
        self.deadline(
            "link_review",
            self.stores.call_logs.link_review(&call_log.id, &review.id, now),
        )
        .await?;

        tracing::info!(
            review_id = %review.id,
            confidence_score = review.confidence_score,
            pass = review.pass,
            "call evaluated"
        );

        let mut new_prompt_id = None;
        if self.should_auto_apply(&review) {
            let reason = format!(
                "auto-apply: review {} confidence {:.3}",
                review.id, review.confidence_score
            );
            match self.apply_claimed(&review, &reason).await {
                Ok(Some(version)) => {
                    review.patch_applied = true;
                    review.applied_at = Some(Utc::now());
                    new_prompt_id = Some(version.id);
                }
                Ok(None) => {
                    tracing::debug!(review_id = %review.id, "review already applied elsewhere");
                }
                Err(err) => {
                    tracing::warn!(
                        review_id = %review.id,
                        error = %err,
                        "auto-apply failed; review left in queue"
                    );
                }
            }
        } else {
            tracing::debug!(review_id = %review.id, "review queued for manual decision");
        }

        Ok(ReviewedCall {
            patch_applied: review.patch_applied,
            review,
            new_prompt_id,
        })
    }

    fn should_auto_apply(&self, review: &Review) -> bool {
        review.confidence_score >= self.cfg.auto_apply_threshold
            && !review.suggested_patch.is_empty()
    }

    /// Claim the review, then patch. `Ok(None)` means another caller
    /// already consumed it. A failed patch releases the claim.
    async fn apply_claimed(&self, review: &Review, reason: &str) -> Result<Option<PromptVersion>> {
        let claimed = self
            .deadline(
                "claim_patch",
                self.stores.reviews.claim_patch(&review.id, Utc::now()),
            )
            .await?;
        if !claimed {
            return Ok(None);
        }

        match self
            .patcher
            .apply_prompt_patch(&review.agent_id, &review.suggested_patch, reason)
            .await
        {
            Ok(version) => Ok(Some(version)),
            Err(err) => {
                if let Err(release_err) = self
                    .deadline(
                        "release_patch_claim",
                        self.stores.reviews.release_patch_claim(&review.id),
                    )
                    .await
                {
                    tracing::error!(
                        review_id = %review.id,
                        error = %release_err,
                        "failed to release patch claim after patch failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn resolve_prompt(&self, agent_id: &str, prompt_id: Option<&str>) -> Result<PromptVersion> {
        match prompt_id {
            Some(prompt_id) => self
                .deadline("get_prompt", self.stores.prompts.get_prompt(prompt_id))
                .await?
                .filter(|p| p.agent_id == agent_id)
                .ok_or_else(|| {
                    LoopError::NotFound(format!("prompt {prompt_id} for agent {agent_id}"))
                }),
            None => {
                let agent = self
                    .deadline("get_agent", self.stores.agents.get_agent(agent_id))
                    .await?;
                let pointer = agent.as_ref().and_then(|a| a.prompt_id.as_deref());
                self.stores
                    .live_prompt(agent_id, pointer, self.cfg.call_timeout)
                    .await?
                    .ok_or_else(|| LoopError::NotFound(format!("no prompt for agent {agent_id}")))
            }
        }
    }

    fn resolve_overlay(&self, prompt: &PromptVersion) -> Result<NicheOverlay> {
        prompt
            .overlay
            .clone()
            .or_else(|| self.catalog.niche_overlay(&prompt.niche))
            .ok_or_else(|| {
                LoopError::Validation(format!("no niche overlay configured for '{}'", prompt.niche))
            })
    }

    /// Evaluations still awaiting a decision, newest first, with their transcripts.
    pub async fn get_review_queue(
        &self,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReviewQueueItem>> {
        let reviews = self
            .deadline(
                "pending_reviews",
                self.stores.reviews.pending_reviews(agent_id, limit),
            )
            .await?;

        let mut items = Vec::with_capacity(reviews.len());
        for review in reviews {
            let log = self
                .deadline(
                    "get_call_log",
                    self.stores.call_logs.get_call_log(&review.call_log_id),
                )
                .await?;
            let (transcript, summary) = match log {
                Some(log) => (Some(log.transcript), log.summary),
                None => (None, None),
            };
            items.push(ReviewQueueItem {
                review,
                transcript,
                summary,
            });
        }
        Ok(items)
    }

    /// Manually apply the patch suggested by a review.
    #[instrument(name = "apply_patch", skip(self))]
    pub async fn apply_patch(&self, review_id: &str, agent_id: &str) -> Result<ApplyPatchOutcome> {
        let review = self
            .deadline("get_review", self.stores.reviews.get_review(review_id))
            .await?
            .filter(|r| r.agent_id == agent_id)
            .ok_or_else(|| LoopError::NotFound(format!("review {review_id} for agent {agent_id}")))?;

        if review.suggested_patch.is_empty() {
            return Err(LoopError::Validation(format!(
                "review {review_id} has no patch to apply"
            )));
        }

        let already_applied = ApplyPatchOutcome {
            review_id: review_id.to_string(),
            new_prompt_id: None,
            prompt_hash: None,
            already_applied: true,
        };
        if review.patch_applied {
            return Ok(already_applied);
        }

        let reason = format!("manual apply: review {review_id}");
        match self.apply_claimed(&review, &reason).await? {
            Some(version) => Ok(ApplyPatchOutcome {
                review_id: review_id.to_string(),
                new_prompt_id: Some(version.id),
                prompt_hash: Some(version.prompt_hash),
                already_applied: false,
            }),
            None => {
                tracing::info!("patch already applied by a concurrent caller");
                Ok(already_applied)
            }
        }
    }

    /// Point the agent back at an existing version. No version row is created.
    #[instrument(name = "rollback_prompt", skip(self))]
    pub async fn rollback_prompt(&self, agent_id: &str, to_hash: &str) -> Result<RollbackOutcome> {
        if agent_id.trim().is_empty() || to_hash.trim().is_empty() {
            return Err(LoopError::Validation(
                "agentId and toHash are required".to_string(),
            ));
        }

        let target = self
            .deadline(
                "find_prompt_by_hash",
                self.stores.prompts.find_prompt_by_hash(agent_id, to_hash),
            )
            .await?
            .ok_or_else(|| {
                LoopError::NotFound(format!("prompt hash {to_hash} for agent {agent_id}"))
            })?;

        let updated = self
            .deadline(
                "set_live_prompt",
                self.stores
                    .agents
                    .set_live_prompt(agent_id, &target.system_prompt_text, &target.id),
            )
            .await?;
        if !updated {
            return Err(LoopError::NotFound(format!("agent {agent_id}")));
        }

        let entry = AuditEntry::new(
            agent_id,
            "prompt_rollback",
            format!("rolled back to version {} ({})", target.version, to_hash),
            json!({ "prompt_id": target.id, "hash": to_hash, "version": target.version }),
        );
        self.deadline("audit_append", self.stores.audit.append(entry))
            .await?;
        tracing::info!(prompt_id = %target.id, version = target.version, "prompt rolled back");

        Ok(RollbackOutcome {
            rolled_back_to: target.id,
            hash: target.prompt_hash,
            version: target.version,
        })
    }

    /// Evaluate unreviewed call logs one at a time, oldest first, with logs
    /// that already failed pushed behind never-tried ones. A failing item is
    /// logged, counted and has its attempt recorded; the batch always runs to
    /// the end.
    #[instrument(name = "batch_review", skip(self))]
    pub async fn batch_review(&self, limit: Option<usize>) -> Result<BatchReport> {
        let limit = limit.unwrap_or(self.cfg.batch_limit);
        let logs = self
            .deadline(
                "unreviewed_call_logs",
                self.stores.call_logs.unreviewed_call_logs(limit),
            )
            .await?;

        let mut results = Vec::with_capacity(logs.len());
        for log in &logs {
            let result = self.review_call_log(log).await;
            if let Err(err) = &result {
                metrics::increment_counter!("prompt_loop_batch_errors_total");
                tracing::warn!(call_log_id = %log.id, error = %err, "batch item failed");
                if let Err(mark_err) = self
                    .deadline(
                        "record_review_failure",
                        self.stores.call_logs.record_review_failure(&log.id),
                    )
                    .await
                {
                    tracing::error!(
                        call_log_id = %log.id,
                        error = %mark_err,
                        "failed to record review attempt"
                    );
                }
            }
            results.push((log.id.clone(), result));
        }

        let report = BatchReport::from_results(results);
        tracing::info!(
            processed = report.processed,
            errors = report.errors,
            total = report.total,
            "batch review finished"
        );
        Ok(report)
    }
}
