// shared-types-rs/src/template.rs
// Prompt template building blocks: the standard kit every agent shares, the
// per-industry niche overlay, and the bounded patch descriptor that mutates it.

use serde::{Deserialize, Serialize};

/// Base prompt material shared by every niche.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardKit {
    pub identity: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub eval_rubric: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub closing: String,
}

/// Knowledge-base article stub proposed for (or already planned in) an overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbStub {
    pub title: String,
    #[serde(default)]
    pub outline: Vec<String>,
}

/// Industry-specific configuration merged into the standard kit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NicheOverlay {
    pub niche: String,
    /// Field keys (e.g. `contact.first_name`) in the order they must be collected.
    #[serde(default)]
    pub required_fields_order: Vec<String>,
    /// Phrases that mean the agent is booking; forbidden until enough fields exist.
    #[serde(default)]
    pub blocked_booking_phrases: Vec<String>,
    #[serde(default)]
    pub reminders: Vec<String>,
    #[serde(default)]
    pub qualification: Vec<String>,
    #[serde(default)]
    pub kb_suggestions: Vec<KbStub>,
    #[serde(default)]
    pub custom_actions: Vec<String>,
}

impl NicheOverlay {
    pub fn has_kb_topic(&self, title: &str) -> bool {
        self.kb_suggestions
            .iter()
            .any(|kb| kb.title.eq_ignore_ascii_case(title))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Closed set of prompt mutations the evaluator may suggest and the patcher
/// may apply. Nothing outside these four kinds can reach a live prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PatchDescriptor {
    /// Field keys whose collection reminder should be reinforced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reinforce_reminder: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub add_booking_gate: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub add_tone_reminder: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub add_escalation_reminder: bool,
}

impl PatchDescriptor {
    pub fn is_empty(&self) -> bool {
        self.reinforce_reminder.is_empty()
            && !self.add_booking_gate
            && !self.add_tone_reminder
            && !self.add_escalation_reminder
    }
}

/// Human-readable label for a field key: `contact.first_name` -> `first name`.
pub fn field_label(field: &str) -> String {
    field
        .rsplit('.')
        .next()
        .unwrap_or(field)
        .replace(['_', '-'], " ")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_label_uses_last_segment() {
        assert_eq!(field_label("contact.first_name"), "first name");
        assert_eq!(field_label("contact.email"), "email");
        assert_eq!(field_label("zip"), "zip");
    }

    #[test]
    fn patch_descriptor_serializes_only_present_ops() {
        let patch = PatchDescriptor {
            add_booking_gate: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "addBookingGate": true }));
        assert!(!patch.is_empty());
        assert!(PatchDescriptor::default().is_empty());
    }

    #[test]
    fn patch_descriptor_rejects_unknown_ops() {
        let patch: PatchDescriptor =
            serde_json::from_str(r#"{"reinforceReminder":["contact.email"]}"#).unwrap();
        assert_eq!(patch.reinforce_reminder, vec!["contact.email".to_string()]);
        assert!(!patch.add_booking_gate);

        let free_form =
            serde_json::from_str::<PatchDescriptor>(r#"{"rewriteAll":"be nicer"}"#);
        assert!(free_form.is_err());
    }
}
