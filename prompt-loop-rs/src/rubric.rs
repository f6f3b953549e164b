// prompt-loop-rs/src/rubric.rs
// Heuristic rubric scoring for completed call transcripts.
//
// Six independent checks, each scored 1..=4. The evaluator is pure: the same
// inputs always produce the same Evaluation and nothing is written anywhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use config_rs::LoopConfig;
use shared_types::{
    field_label, CallMetrics, KbStub, NicheOverlay, PatchDescriptor, PromptVersion, RubricCategory,
};

use crate::kb_gaps::detect_kb_gaps;

const ROBOTIC_PHRASES: &[&str] = &[
    "as an ai",
    "i am a virtual assistant",
    "i am an automated",
    "your request has been processed",
    "please hold while i process",
    "invalid input",
    "i did not understand your input",
    "processing your request",
];

const FORMAL_PHRASES: &[&str] = &[
    "pursuant to",
    "kindly",
    "we regret to inform",
    "at your earliest convenience",
    "henceforth",
    "furthermore",
    "please be advised",
    "heretofore",
];

const STUCK_PHRASES: &[&str] = &[
    "i don't know",
    "i do not know",
    "i'm not sure",
    "i am not sure",
    "i can't help",
    "i cannot help",
    "unable to help",
    "i don't have that information",
    "i do not have that information",
];

const ESCALATION_OFFERS: &[&str] = &[
    "transfer",
    "callback",
    "call back",
    "call you back",
    "manager",
    "supervisor",
];

const PHONE_REPEAT_BACK: &[&str] = &[
    "let me repeat",
    "to confirm",
    "i have your number as",
    "your number is",
    "read that back",
    "is that correct",
    "is that right",
];

const EMAIL_CONFIRM: &[&str] = &[
    "spell",
    "spelled",
    "to confirm your email",
    "your email is",
    "dot com",
    " at sign",
];

/// Outcome of one rubric check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub score: u8,
    pub notes: Vec<String>,
}

impl CheckResult {
    fn pass() -> Self {
        Self {
            score: 4,
            notes: Vec::new(),
        }
    }

    fn fail(score: u8, note: impl Into<String>) -> Self {
        Self {
            score,
            notes: vec![note.into()],
        }
    }
}

/// Scored transcript, before it is persisted as a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub rubric_scores: BTreeMap<RubricCategory, u8>,
    pub confidence_score: f64,
    /// True when no category scored below 3.
    pub pass: bool,
    pub improvement_notes: Vec<String>,
    pub suggested_prompt_patch: PatchDescriptor,
    pub suggested_kb_addition: Option<KbStub>,
}

/// `clamp(mean(scores) / 5, 0, 1)`; an empty slice scores 0.
pub fn confidence_from_scores(scores: &[u8]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let sum: f64 = scores.iter().map(|s| f64::from(*s)).sum();
    let mean = sum / scores.len() as f64;
    (mean / 5.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct RubricEvaluator {
    min_fields_before_booking: usize,
}

impl Default for RubricEvaluator {
    fn default() -> Self {
        Self::new(config_rs::DEFAULT_MIN_FIELDS_BEFORE_BOOKING)
    }
}

impl RubricEvaluator {
    pub fn new(min_fields_before_booking: usize) -> Self {
        Self {
            min_fields_before_booking,
        }
    }

    pub fn from_config(cfg: &LoopConfig) -> Self {
        Self::new(cfg.min_fields_before_booking)
    }

    pub fn evaluate(
        &self,
        transcript: &str,
        prompt: &PromptVersion,
        overlay: &NicheOverlay,
        metrics: &CallMetrics,
    ) -> Evaluation {
        let text = transcript.to_lowercase();

        let (fields, missing_fields) = check_field_collection(&text, overlay, metrics);
        let booking = self.check_booking_gate(&text, overlay, metrics);
        let tone = check_tone(&text);
        let escalation = check_escalation(&text);
        let cadence = check_question_cadence(&text);
        let verification = check_verification(&text, metrics);

        let mut suggested_prompt_patch = PatchDescriptor::default();
        if !missing_fields.is_empty() {
            suggested_prompt_patch.reinforce_reminder = missing_fields;
        }
        if booking.score == 1 {
            suggested_prompt_patch.add_booking_gate = true;
        }

        let checks = [
            (RubricCategory::FieldCollection, fields),
            (RubricCategory::BookingRules, booking),
            (RubricCategory::Tone, tone),
            (RubricCategory::Escalation, escalation),
            (RubricCategory::QuestionCadence, cadence),
            (RubricCategory::Verification, verification),
        ];

        let mut rubric_scores = BTreeMap::new();
        let mut improvement_notes = Vec::new();
        for (category, result) in checks {
            rubric_scores.insert(category, result.score);
            improvement_notes.extend(
                result
                    .notes
                    .into_iter()
                    .map(|note| format!("[{category}] {note}")),
            );
        }

        let scores: Vec<u8> = rubric_scores.values().copied().collect();
        let confidence_score = confidence_from_scores(&scores);
        let pass = scores.iter().all(|s| *s >= 3);
        let suggested_kb_addition = detect_kb_gaps(&text, overlay);

        tracing::debug!(
            prompt_id = %prompt.id,
            niche = %overlay.niche,
            confidence_score,
            pass,
            "transcript evaluated"
        );

        Evaluation {
            rubric_scores,
            confidence_score,
            pass,
            improvement_notes,
            suggested_prompt_patch,
            suggested_kb_addition,
        }
    }

    fn check_booking_gate(
        &self,
        text: &str,
        overlay: &NicheOverlay,
        metrics: &CallMetrics,
    ) -> CheckResult {
        let captured = metrics.fields_captured.len();
        if captured >= self.min_fields_before_booking {
            return CheckResult::pass();
        }

        match overlay
            .blocked_booking_phrases
            .iter()
            .find(|phrase| !phrase.trim().is_empty() && text.contains(&phrase.to_lowercase()))
        {
            Some(phrase) => CheckResult::fail(
                1,
                format!(
                    "Booking language \"{phrase}\" used with only {captured} of {} required fields captured",
                    self.min_fields_before_booking
                ),
            ),
            None => CheckResult::pass(),
        }
    }
}

/// Returns the check result and the required fields that were never captured.
fn check_field_collection(
    text: &str,
    overlay: &NicheOverlay,
    metrics: &CallMetrics,
) -> (CheckResult, Vec<String>) {
    let missing: Vec<String> = overlay
        .required_fields_order
        .iter()
        .filter(|field| !metrics.captured(field))
        .cloned()
        .collect();

    if !missing.is_empty() {
        let note = format!("Missing required fields: {}", missing.join(", "));
        return (CheckResult::fail(2, note), missing);
    }

    // Position of first mention for each field whose label appears at all.
    let positions: Vec<usize> = overlay
        .required_fields_order
        .iter()
        .filter_map(|field| text.find(&field_label(field)))
        .collect();

    if positions.windows(2).any(|pair| pair[1] < pair[0]) {
        return (
            CheckResult::fail(3, "Required fields were collected out of the configured order"),
            missing,
        );
    }

    (CheckResult::pass(), missing)
}

fn check_tone(text: &str) -> CheckResult {
    if let Some(phrase) = first_match(text, ROBOTIC_PHRASES) {
        return CheckResult::fail(2, format!("Robotic phrasing detected: \"{phrase}\""));
    }
    if let Some(phrase) = first_match(text, FORMAL_PHRASES) {
        return CheckResult::fail(3, format!("Overly formal phrasing detected: \"{phrase}\""));
    }
    CheckResult::pass()
}

fn check_escalation(text: &str) -> CheckResult {
    match first_match(text, STUCK_PHRASES) {
        Some(phrase) if first_match(text, ESCALATION_OFFERS).is_none() => CheckResult::fail(
            2,
            format!("Agent got stuck (\"{phrase}\") without offering a transfer or callback"),
        ),
        _ => CheckResult::pass(),
    }
}

fn check_question_cadence(text: &str) -> CheckResult {
    let stacked = text
        .split(['.', '!', '\n'])
        .filter(|turn| turn.matches('?').count() > 1)
        .count();

    if stacked > 0 {
        CheckResult::fail(
            2,
            format!("{stacked} turn(s) asked more than one question at once"),
        )
    } else {
        CheckResult::pass()
    }
}

fn check_verification(text: &str, metrics: &CallMetrics) -> CheckResult {
    let mut notes = Vec::new();

    if metrics.captured_like("phone") && first_match(text, PHONE_REPEAT_BACK).is_none() {
        notes.push("Phone number was captured but never repeated back".to_string());
    }
    if metrics.captured_like("email") && first_match(text, EMAIL_CONFIRM).is_none() {
        notes.push("Email was captured but not spelled out or confirmed".to_string());
    }

    if notes.is_empty() {
        CheckResult::pass()
    } else {
        CheckResult { score: 3, notes }
    }
}

fn first_match<'a>(text: &str, phrases: &[&'a str]) -> Option<&'a str> {
    phrases.iter().copied().find(|phrase| text.contains(phrase))
}
