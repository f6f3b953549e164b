// prompt-loop-rs/src/patcher.rs
// Applies a PatchDescriptor to an agent's prompt and persists the result as
// a new content-addressed PromptVersion.
//
// Not transactional: a failure after the version insert but before the live
// pointer update leaves an orphaned version row. Callers treat any error as
// "state may be inconsistent, inspect the audit trail".

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::instrument;

use shared_types::{new_id, prompt_hash, with_deadline, AuditEntry, PatchDescriptor, PromptVersion};

use crate::catalog::TemplateCatalog;
use crate::patch::apply_patch;
use crate::render::{PromptRenderer, RenderInput};
use crate::{LoopError, LoopStores, Result};

pub struct PromptPatcher {
    stores: LoopStores,
    catalog: Arc<dyn TemplateCatalog>,
    renderer: Arc<dyn PromptRenderer>,
    call_timeout: Duration,
}

impl PromptPatcher {
    pub fn new(
        stores: LoopStores,
        catalog: Arc<dyn TemplateCatalog>,
        renderer: Arc<dyn PromptRenderer>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            stores,
            catalog,
            renderer,
            call_timeout,
        }
    }

    /// Mutate the agent's overlay with `patch`, re-render, persist, and point
    /// the agent at the result. Identical rendered text reuses the existing
    /// version row instead of inserting a duplicate.
    #[instrument(
        name = "prompt_patch",
        skip_all,
        fields(agent_id = %agent_id, reason = %reason)
    )]
    pub async fn apply_prompt_patch(
        &self,
        agent_id: &str,
        patch: &PatchDescriptor,
        reason: &str,
    ) -> Result<PromptVersion> {
        match self.try_apply(agent_id, patch, reason).await {
            Ok(version) => Ok(version),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    ?patch,
                    "prompt patch failed; state may be partially written"
                );

                let entry = AuditEntry::new(
                    agent_id,
                    "prompt_patch_failed",
                    format!("patch failed: {err}"),
                    json!({ "patch": patch, "reason": reason, "error": err.to_string() }),
                );
                if let Err(audit_err) = self.stores.audit.append(entry).await {
                    tracing::error!(error = %audit_err, "failed to record patch failure in audit log");
                }

                Err(LoopError::PatchApplication {
                    agent_id: agent_id.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn try_apply(
        &self,
        agent_id: &str,
        patch: &PatchDescriptor,
        reason: &str,
    ) -> Result<PromptVersion> {
        let timeout = self.call_timeout;

        let agent = with_deadline(timeout, "get_agent", self.stores.agents.get_agent(agent_id))
            .await?
            .ok_or_else(|| LoopError::NotFound(format!("agent {agent_id}")))?;
        let current = self
            .stores
            .live_prompt(agent_id, agent.prompt_id.as_deref(), timeout)
            .await?;

        let niche = agent.config.niche.clone();
        let standard = self
            .catalog
            .standard_kit()
            .ok_or_else(|| LoopError::NotFound("standard kit".to_string()))?;
        let template = self
            .catalog
            .niche_overlay(&niche)
            .ok_or_else(|| LoopError::NotFound(format!("niche overlay '{niche}'")))?;

        // Start from the overlay the live version was rendered from, so earlier
        // patches carry forward and rolled-back ones stay gone. Fall back to a
        // fresh copy of the template.
        let mut overlay = current
            .as_ref()
            .and_then(|v| v.overlay.clone())
            .filter(|o| o.niche.eq_ignore_ascii_case(&niche))
            .unwrap_or(template);
        let added = apply_patch(&mut overlay, patch);

        let input = RenderInput {
            standard,
            overlay: overlay.clone(),
            goals: agent.config.goals.clone(),
            tone: agent.config.tone.clone(),
            business_hours: agent.config.business_hours.clone(),
            client_context: agent.config.client_context.clone(),
            compliance: agent.config.compliance.clone(),
            custom_values: agent.config.custom_values.clone(),
        };
        let rendered = self.renderer.render(&input)?;

        let old_hash = prompt_hash(&agent.system_prompt);
        let new_hash = prompt_hash(&rendered.system_prompt);

        // The store numbers the row, so concurrent patches never share a version.
        let candidate = PromptVersion {
            id: new_id(),
            agent_id: agent_id.to_string(),
            niche: rendered.niche.clone(),
            system_prompt_text: rendered.system_prompt.clone(),
            kb_refs: rendered.kb_stubs.iter().map(|kb| kb.title.clone()).collect(),
            actions: rendered.custom_actions.clone(),
            eval_rubric: rendered.eval_rubric.clone(),
            overlay: Some(overlay),
            version: 0,
            prompt_hash: new_hash.clone(),
            created_at: Utc::now(),
        };
        let candidate_id = candidate.id.clone();
        let version = with_deadline(
            timeout,
            "append_version",
            self.stores.prompts.append_version(candidate),
        )
        .await?;
        let reused = version.id != candidate_id;

        let updated = with_deadline(
            timeout,
            "set_live_prompt",
            self.stores
                .agents
                .set_live_prompt(agent_id, &version.system_prompt_text, &version.id),
        )
        .await?;
        if !updated {
            return Err(LoopError::NotFound(format!("agent {agent_id}")));
        }

        let entry = AuditEntry::new(
            agent_id,
            "prompt_patch_applied",
            format!("prompt {} -> {}: {}", short(&old_hash), short(&new_hash), reason),
            json!({
                "old_hash": old_hash,
                "new_hash": new_hash,
                "prompt_id": version.id,
                "version": version.version,
                "reused_version": reused,
                "reason": reason,
                "patch": patch,
                "added": added,
            }),
        );
        with_deadline(timeout, "audit_append", self.stores.audit.append(entry)).await?;

        metrics::increment_counter!("prompt_loop_patches_applied_total");
        tracing::info!(
            prompt_id = %version.id,
            version = version.version,
            prompt_hash = %new_hash,
            reused,
            "prompt patch applied"
        );

        Ok(version)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
