//! Keyword and date heuristics shared by every extractor.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::{PostingType, TradeCategory};

/// Ordered trade rules. The first rule with any keyword contained in the
/// lower-cased text wins, so earlier rows take priority.
pub const TRADE_RULES: &[(&[&str], TradeCategory)] = &[
    (
        &["hvac", "heat", "cooling", "boiler", "mechanical", "ventilat", "air conditioning"],
        TradeCategory::Hvac,
    ),
    (
        &["electric", "lighting", "panel", "wiring", "ev charger", "power"],
        TradeCategory::Electrical,
    ),
    (
        &["plumb", "water main", "sewer", "pump", "pipe", "drain", "well"],
        TradeCategory::Plumbing,
    ),
    (&["roof", "membrane", "tpo", "shingle", "reroof"], TradeCategory::Roofing),
    (
        &["pav", "asphalt", "road", "street", "resurface", "milling"],
        TradeCategory::Paving,
    ),
    (
        &["concrete", "sidewalk", "curb", "flatwork", "ada ramp"],
        TradeCategory::Concrete,
    ),
    (
        &["paint", "coating", "blast", "seal coat", "pressure wash"],
        TradeCategory::Painting,
    ),
    (
        &["floor", "hardwood", "carpet", "tile", "gym floor"],
        TradeCategory::Flooring,
    ),
    (
        &["mason", "tuckpoint", "brick", "block", "precast"],
        TradeCategory::Masonry,
    ),
    (&["demo", "abate", "remov", "tear"], TradeCategory::DemoAbatement),
    (
        &["it ", "network", "server", "software", "computer", "security camera"],
        TradeCategory::ItTechnology,
    ),
    (&["landscape", "mow", "tree", "lawn"], TradeCategory::Landscaping),
    (&["fence", "gate"], TradeCategory::Fencing),
    (&["window", "door", "glazing"], TradeCategory::WindowsDoors),
];

const RFP_KEYWORDS: &[&str] = &["RFP", "PROPOSAL", "RFQ", "QUALIFICATION", "QUOTE"];

pub fn classify_trade(text: &str) -> TradeCategory {
    let lower = text.to_lowercase();
    TRADE_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or_default()
}

pub fn classify_posting_type(text: &str) -> PostingType {
    let upper = text.to_uppercase();
    if RFP_KEYWORDS.iter().any(|k| upper.contains(k)) {
        PostingType::Rfp
    } else if upper.contains("PERMIT") {
        PostingType::Permit
    } else {
        PostingType::Bid
    }
}

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+\d{1,2}:\d{2}(?::\d{2})?\s*(?:AM|PM)?").expect("clock-time pattern compiles")
});

static DATE_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{1,2}-\d{1,2})\b").expect("date fragment pattern compiles")
});

// chrono's %Y happily reads two-digit years, so each numeric format is gated
// by a shape check first.
static DATE_SHAPES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"^\d{1,2}/\d{1,2}/\d{4}$", "%m/%d/%Y"),
        (r"^\d{4}-\d{1,2}-\d{1,2}$", "%Y-%m-%d"),
        (r"^\d{1,2}/\d{1,2}/\d{2}$", "%m/%d/%y"),
        (r"^\d{1,2}-\d{1,2}-\d{4}$", "%m-%d-%Y"),
        (r"^[A-Za-z]+\.? \d{1,2}, \d{4}$", "%B %d, %Y"),
        (r"^[A-Za-z]{3}\.? \d{1,2}, \d{4}$", "%b %d, %Y"),
    ]
    .into_iter()
    .map(|(pattern, fmt)| (Regex::new(pattern).expect("date shape pattern compiles"), fmt))
    .collect()
});

/// Best-effort date parse for listing text. Clock-time suffixes are dropped,
/// known shapes are tried in order, then RFC 3339, then the first embedded
/// `M/D/YYYY` or `YYYY-MM-DD` fragment. Never panics on bad input.
pub fn parse_flexible_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }

    let stripped = CLOCK_TIME.replace_all(trimmed, "");
    let clean = stripped
        .trim()
        .trim_end_matches([',', '.', ';'])
        .replace('.', "");

    for (shape, fmt) in DATE_SHAPES.iter() {
        if !shape.is_match(&clean) {
            continue;
        }
        if let Ok(date) = NaiveDate::parse_from_str(&clean, fmt) {
            return Some(date);
        }
    }

    DATE_FRAGMENT.find_iter(&clean).find_map(|m| {
        let fragment = m.as_str();
        let fmt = if fragment.contains('/') { "%m/%d/%Y" } else { "%Y-%m-%d" };
        NaiveDate::parse_from_str(fragment, fmt).ok()
    })
}
