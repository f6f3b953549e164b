// prompt-loop-rs/src/catalog.rs
// Source of the standard kit and the per-niche overlays.
//
// Lookups hand out owned copies. Callers mutate their copy freely; the
// catalog's templates are never touched.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use shared_types::{KbStub, NicheOverlay, StandardKit};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

pub trait TemplateCatalog: Send + Sync {
    fn standard_kit(&self) -> Option<StandardKit>;

    fn niche_overlay(&self, niche: &str) -> Option<NicheOverlay>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    standard: Option<StandardKit>,
    overlays: HashMap<String, NicheOverlay>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    standard: StandardKit,
    #[serde(default)]
    overlays: Vec<NicheOverlay>,
}

impl StaticCatalog {
    pub fn new(standard: StandardKit) -> Self {
        Self {
            standard: Some(standard),
            overlays: HashMap::new(),
        }
    }

    /// A catalog with no standard kit; every patch against it fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_overlay(mut self, overlay: NicheOverlay) -> Self {
        self.overlays.insert(overlay.niche.to_ascii_lowercase(), overlay);
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        Ok(file
            .overlays
            .into_iter()
            .fold(Self::new(file.standard), Self::with_overlay))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load from PROMPT_CATALOG_PATH when set, otherwise use [`StaticCatalog::builtin`].
    pub fn from_env() -> Result<Self, CatalogError> {
        match std::env::var("PROMPT_CATALOG_PATH") {
            Ok(path) => {
                tracing::info!(path = %path, "loading prompt catalog");
                Self::load(Path::new(&path))
            }
            Err(_) => Ok(Self::builtin()),
        }
    }

    pub fn niches(&self) -> Vec<String> {
        let mut niches: Vec<String> = self.overlays.keys().cloned().collect();
        niches.sort();
        niches
    }

    /// Default kit with home-services and dental overlays.
    pub fn builtin() -> Self {
        let standard = StandardKit {
            identity: "You are {{agent_name}}, the friendly phone receptionist for {{business_name}}. You answer inbound calls, qualify the caller, and book appointments.".to_string(),
            rules: vec![
                "Ask one question at a time and wait for the answer.".to_string(),
                "Repeat phone numbers back digit by digit and spell out email addresses to confirm them.".to_string(),
                "Never invent prices, policies, or availability; offer a callback instead.".to_string(),
            ],
            eval_rubric: vec![
                "field_collection".to_string(),
                "booking_rules".to_string(),
                "tone".to_string(),
                "escalation".to_string(),
                "question_cadence".to_string(),
                "verification".to_string(),
            ],
            actions: vec!["book_appointment".to_string(), "transfer_call".to_string()],
            closing: "Thank the caller by name before ending the call.".to_string(),
        };

        let home_services = NicheOverlay {
            niche: "home_services".to_string(),
            required_fields_order: vec![
                "contact.first_name".to_string(),
                "contact.phone".to_string(),
                "contact.email".to_string(),
                "address.street".to_string(),
                "job.description".to_string(),
            ],
            blocked_booking_phrases: vec![
                "let's get you scheduled".to_string(),
                "i've booked".to_string(),
                "you're all set for".to_string(),
            ],
            reminders: vec!["Ask whether the issue is an emergency.".to_string()],
            qualification: vec!["Confirm the address is inside the service area.".to_string()],
            kb_suggestions: vec![KbStub {
                title: "Service Area".to_string(),
                outline: vec!["Cities and zip codes served".to_string()],
            }],
            custom_actions: vec!["dispatch_technician".to_string()],
        };

        let dental = NicheOverlay {
            niche: "dental".to_string(),
            required_fields_order: vec![
                "contact.first_name".to_string(),
                "contact.last_name".to_string(),
                "contact.phone".to_string(),
                "contact.email".to_string(),
                "patient.insurance".to_string(),
            ],
            blocked_booking_phrases: vec![
                "i'll put you down for".to_string(),
                "your appointment is confirmed".to_string(),
            ],
            reminders: vec!["Ask whether the caller is a new or existing patient.".to_string()],
            qualification: Vec::new(),
            kb_suggestions: vec![KbStub {
                title: "Insurance & Warranty".to_string(),
                outline: vec!["Accepted insurance providers".to_string()],
            }],
            custom_actions: Vec::new(),
        };

        Self::new(standard)
            .with_overlay(home_services)
            .with_overlay(dental)
    }
}

impl TemplateCatalog for StaticCatalog {
    fn standard_kit(&self) -> Option<StandardKit> {
        self.standard.clone()
    }

    fn niche_overlay(&self, niche: &str) -> Option<NicheOverlay> {
        self.overlays.get(&niche.to_ascii_lowercase()).cloned()
    }
}
