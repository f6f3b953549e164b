// prompt-loop-rs/src/render.rs
// Prompt rendering: standard kit + niche overlay + agent settings -> prose.
//
// Rendering is a pure function behind a trait so the patcher can be tested
// against a failing or recording renderer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shared_types::{field_label, KbStub, NicheOverlay, StandardKit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderInput {
    pub standard: StandardKit,
    pub overlay: NicheOverlay,
    pub goals: Vec<String>,
    pub tone: String,
    pub business_hours: String,
    pub client_context: String,
    pub compliance: Vec<String>,
    pub custom_values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub system_prompt: String,
    pub kb_stubs: Vec<KbStub>,
    pub custom_actions: Vec<String>,
    pub eval_rubric: Vec<String>,
    pub niche: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template is missing required section '{0}'")]
    MissingSection(&'static str),

    #[error("renderer failed: {0}")]
    Failed(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait PromptRenderer: Send + Sync {
    fn render(&self, input: &RenderInput) -> Result<RenderedPrompt, RenderError>;
}

/// Deterministic markdown-sectioned renderer.
///
/// Empty sections are omitted and `{{key}}` placeholders are substituted
/// from `custom_values`; unknown placeholders are left as-is.
#[derive(Debug, Clone, Default)]
pub struct StandardRenderer;

impl PromptRenderer for StandardRenderer {
    fn render(&self, input: &RenderInput) -> Result<RenderedPrompt, RenderError> {
        if input.standard.identity.trim().is_empty() {
            return Err(RenderError::MissingSection("identity"));
        }

        let overlay = &input.overlay;
        let mut out = String::new();
        out.push_str(input.standard.identity.trim());
        out.push('\n');

        push_list(&mut out, "Goals", &input.goals);
        push_text(&mut out, "Tone", &input.tone);
        push_text(&mut out, "Business Hours", &input.business_hours);
        push_text(&mut out, "Client Context", &input.client_context);

        if !overlay.required_fields_order.is_empty() {
            out.push_str("\n## Information To Collect (in this order)\n");
            for (idx, field) in overlay.required_fields_order.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", idx + 1, field_label(field)));
            }
        }

        push_list(&mut out, "Qualification", &overlay.qualification);

        if !overlay.blocked_booking_phrases.is_empty() {
            let phrases: Vec<String> = overlay
                .blocked_booking_phrases
                .iter()
                .map(|p| format!("Do not say \"{p}\" until the required details are collected."))
                .collect();
            push_list(&mut out, "Booking Rules", &phrases);
        }

        push_list(&mut out, "Reminders", &overlay.reminders);
        push_list(&mut out, "Compliance", &input.compliance);
        push_list(&mut out, "Rules", &input.standard.rules);

        if !input.standard.closing.trim().is_empty() {
            out.push('\n');
            out.push_str(input.standard.closing.trim());
            out.push('\n');
        }

        let system_prompt = substitute(&out, &input.custom_values);

        let mut custom_actions = input.standard.actions.clone();
        for action in &overlay.custom_actions {
            if !custom_actions.contains(action) {
                custom_actions.push(action.clone());
            }
        }

        Ok(RenderedPrompt {
            system_prompt,
            kb_stubs: overlay.kb_suggestions.clone(),
            custom_actions,
            eval_rubric: input.standard.eval_rubric.clone(),
            niche: overlay.niche.clone(),
        })
    }
}

fn push_text(out: &mut String, heading: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    out.push_str(&format!("\n## {heading}\n{}\n", body.trim()));
}

fn push_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {heading}\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

fn substitute(template: &str, values: &BTreeMap<String, String>) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), value)
    })
}
