// prompt-loop-rs/src/patch.rs
// The four overlay mutations a PatchDescriptor can request.
//
// Every mutation is a set-like insertion of a fixed sentence: applying the
// same descriptor twice leaves the overlay unchanged the second time.

use shared_types::{field_label, NicheOverlay, PatchDescriptor};

pub const BOOKING_GATE_RULE: &str = "Do not offer, confirm, or schedule an appointment until every required caller detail has been collected.";
pub const TONE_REMINDER: &str = "Speak warmly and conversationally; avoid scripted, robotic, or overly formal phrasing.";
pub const ESCALATION_REMINDER: &str = "If you cannot answer or resolve a request, offer to transfer the caller to a team member or schedule a callback.";

pub fn field_reminder(field: &str) -> String {
    format!(
        "Always collect the caller's {} before moving on.",
        field_label(field)
    )
}

/// Insert `value` unless already present. Returns true when inserted.
fn insert_unique(list: &mut Vec<String>, value: String) -> bool {
    if list.iter().any(|existing| *existing == value) {
        false
    } else {
        list.push(value);
        true
    }
}

/// Apply `patch` to `overlay` in place and return the sentences actually added.
pub fn apply_patch(overlay: &mut NicheOverlay, patch: &PatchDescriptor) -> Vec<String> {
    let mut added = Vec::new();

    for field in &patch.reinforce_reminder {
        let reminder = field_reminder(field);
        if insert_unique(&mut overlay.reminders, reminder.clone()) {
            added.push(reminder);
        }
    }

    if patch.add_booking_gate
        && insert_unique(&mut overlay.qualification, BOOKING_GATE_RULE.to_string())
    {
        added.push(BOOKING_GATE_RULE.to_string());
    }

    if patch.add_tone_reminder && insert_unique(&mut overlay.reminders, TONE_REMINDER.to_string()) {
        added.push(TONE_REMINDER.to_string());
    }

    if patch.add_escalation_reminder
        && insert_unique(&mut overlay.reminders, ESCALATION_REMINDER.to_string())
    {
        added.push(ESCALATION_REMINDER.to_string());
    }

    added
}
