// prompt-loop-rs/src/kb_gaps.rs
// Knowledge-base gap detection: propose at most one new KB stub per call.

use shared_types::{KbStub, NicheOverlay};

struct KbGapTemplate {
    keywords: &'static [&'static str],
    title: &'static str,
    outline: &'static [&'static str],
}

// Checked in order; the first uncovered topic wins.
const KB_GAP_TEMPLATES: &[KbGapTemplate] = &[
    KbGapTemplate {
        keywords: &["how much", "price", "pricing", "cost", "quote", "estimate"],
        title: "Pricing & Quotes",
        outline: &[
            "Typical price ranges by service",
            "What affects the final quote",
            "When an on-site estimate is required",
        ],
    },
    KbGapTemplate {
        keywords: &["insurance", "warranty", "guarantee", "covered"],
        title: "Insurance & Warranty",
        outline: &[
            "Accepted insurance providers",
            "Warranty terms and duration",
            "How to file a claim",
        ],
    },
    KbGapTemplate {
        keywords: &["cancel", "reschedule", "move my appointment"],
        title: "Cancellations & Rescheduling",
        outline: &[
            "Cancellation notice period",
            "Fees for late cancellation",
            "How to reschedule",
        ],
    },
    KbGapTemplate {
        keywords: &["financing", "payment plan", "pay monthly", "credit card"],
        title: "Payment & Financing",
        outline: &[
            "Accepted payment methods",
            "Financing partners and eligibility",
            "Deposits and payment timing",
        ],
    },
    KbGapTemplate {
        keywords: &["service area", "do you serve", "do you come to", "how far"],
        title: "Service Area",
        outline: &[
            "Cities and zip codes served",
            "Travel fees outside the core area",
        ],
    },
    KbGapTemplate {
        keywords: &["weekend", "saturday", "sunday", "holiday", "after hours"],
        title: "Hours & Availability",
        outline: &[
            "Regular business hours",
            "Weekend and holiday availability",
            "Emergency or after-hours options",
        ],
    },
];

/// `text` must already be lowercased.
pub fn detect_kb_gaps(text: &str, overlay: &NicheOverlay) -> Option<KbStub> {
    KB_GAP_TEMPLATES
        .iter()
        .filter(|template| template.keywords.iter().any(|kw| text.contains(kw)))
        .find(|template| !overlay.has_kb_topic(template.title))
        .map(|template| KbStub {
            title: template.title.to_string(),
            outline: template.outline.iter().map(|s| s.to_string()).collect(),
        })
}
