// shared-types-rs/src/model.rs
// Persisted entities shared by the prompt loop and the self-healing loop.
//
// JSON-shaped columns (metadata, evaluation payloads, state blobs) are kept
// as `serde_json::Value` so they round-trip through any store unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::template::{KbStub, NicheOverlay, PatchDescriptor};

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Live configuration of a voice agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub niche: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub business_hours: String,
    #[serde(default)]
    pub client_context: String,
    #[serde(default)]
    pub compliance: Vec<String>,
    #[serde(default)]
    pub custom_values: BTreeMap<String, String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub crm_endpoint: Option<String>,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    /// Any additional CRM-side settings, carried opaquely.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub config: AgentConfig,
    /// Text of the system prompt currently served to callers.
    #[serde(default)]
    pub system_prompt: String,
    /// Prompt version the live text was taken from, if any.
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Flat JSON view of the live configuration, including the system prompt.
    /// This is the shape config drift detection and snapshots compare against.
    pub fn config_view(&self) -> Value {
        let mut view = match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        view.insert(
            "system_prompt".to_string(),
            Value::String(self.system_prompt.clone()),
        );
        Value::Object(view)
    }
}

/// Call-level metrics reported alongside a transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetrics {
    #[serde(default, alias = "fieldsCaptured")]
    pub fields_captured: Vec<String>,
    #[serde(default, alias = "durationSeconds")]
    pub duration_seconds: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallMetrics {
    pub fn captured(&self, field: &str) -> bool {
        self.fields_captured.iter().any(|f| f == field)
    }

    /// True when any captured field name mentions `needle` (e.g. "phone").
    pub fn captured_like(&self, needle: &str) -> bool {
        self.fields_captured
            .iter()
            .any(|f| f.to_ascii_lowercase().contains(needle))
    }
}

/// One ingested transcript. Immutable apart from the review back-reference
/// and the count of failed review attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub id: String,
    pub agent_id: String,
    pub prompt_id: Option<String>,
    pub call_id: Option<String>,
    pub transcript: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metrics: CallMetrics,
    pub review_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Append-only, content-addressed prompt version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub agent_id: String,
    pub niche: String,
    pub system_prompt_text: String,
    #[serde(default)]
    pub kb_refs: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub eval_rubric: Vec<String>,
    /// Effective overlay this version was rendered from.
    #[serde(default)]
    pub overlay: Option<NicheOverlay>,
    pub version: u32,
    pub prompt_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricCategory {
    FieldCollection,
    BookingRules,
    Tone,
    Escalation,
    QuestionCadence,
    Verification,
}

impl RubricCategory {
    pub const ALL: [RubricCategory; 6] = [
        RubricCategory::FieldCollection,
        RubricCategory::BookingRules,
        RubricCategory::Tone,
        RubricCategory::Escalation,
        RubricCategory::QuestionCadence,
        RubricCategory::Verification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RubricCategory::FieldCollection => "field_collection",
            RubricCategory::BookingRules => "booking_rules",
            RubricCategory::Tone => "tone",
            RubricCategory::Escalation => "escalation",
            RubricCategory::QuestionCadence => "question_cadence",
            RubricCategory::Verification => "verification",
        }
    }
}

impl fmt::Display for RubricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted evaluation of one call (the `agent_prompt_reviews` row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub agent_id: String,
    pub call_log_id: String,
    pub prompt_id: String,
    pub rubric_scores: BTreeMap<RubricCategory, u8>,
    pub confidence_score: f64,
    pub pass: bool,
    #[serde(default)]
    pub improvement_notes: Vec<String>,
    #[serde(default)]
    pub suggested_patch: PatchDescriptor,
    pub suggested_kb_addition: Option<KbStub>,
    /// One-way flag; once true the suggested patch is consumed.
    pub patch_applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IncidentSeverity {
    /// Next rung of the escalation ladder. Critical stays critical.
    pub fn escalated(self) -> Self {
        match self {
            IncidentSeverity::Low => IncidentSeverity::Medium,
            IncidentSeverity::Medium => IncidentSeverity::High,
            IncidentSeverity::High | IncidentSeverity::Critical => IncidentSeverity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Low => "low",
            IncidentSeverity::Medium => "medium",
            IncidentSeverity::High => "high",
            IncidentSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'; expected one of: {expected}")]
pub struct InvalidVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl FromStr for IncidentSeverity {
    type Err = InvalidVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(IncidentSeverity::Low),
            "medium" => Ok(IncidentSeverity::Medium),
            "high" => Ok(IncidentSeverity::High),
            "critical" => Ok(IncidentSeverity::Critical),
            _ => Err(InvalidVariant {
                kind: "severity",
                value: s.to_string(),
                expected: "low, medium, high, critical",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = InvalidVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(IncidentStatus::Open),
            "investigating" => Ok(IncidentStatus::Investigating),
            "resolved" => Ok(IncidentStatus::Resolved),
            "closed" => Ok(IncidentStatus::Closed),
            _ => Err(InvalidVariant {
                kind: "status",
                value: s.to_string(),
                expected: "open, investigating, resolved, closed",
            }),
        }
    }
}

/// Tracked operational problem. Never deleted; only status/severity move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub error_message: String,
    pub severity: IncidentSeverity,
    pub status: IncidentStatus,
    pub source: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// State blob captured as a recovery baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub config: Value,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

impl AgentState {
    /// Same flat shape as [`Agent::config_view`].
    pub fn config_view(&self) -> Value {
        let mut view = match &self.config {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Some(prompt) = &self.system_prompt {
            view.insert("system_prompt".to_string(), Value::String(prompt.clone()));
        }
        Value::Object(view)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
    pub id: String,
    pub agent_id: String,
    pub state: AgentState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub id: String,
    pub agent_id: String,
    pub healthy: bool,
    #[serde(default)]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Row of the append-only `agent_logs` audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub agent_id: String,
    pub event: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        agent_id: impl Into<String>,
        event: impl Into<String>,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            event: event.into(),
            message: message.into(),
            data,
            created_at: Utc::now(),
        }
    }
}
