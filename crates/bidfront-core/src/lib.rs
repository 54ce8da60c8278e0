//! Core lead model and text classifiers for BidFront.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod classify;

pub use classify::{classify_posting_type, classify_trade, parse_flexible_date, TRADE_RULES};

pub const CRATE_NAME: &str = "bidfront-core";

/// Returned when a stored or submitted label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label {label:?}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PostingType {
    #[default]
    Bid,
    #[serde(rename = "RFP")]
    Rfp,
    Permit,
}

impl PostingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "Bid",
            Self::Rfp => "RFP",
            Self::Permit => "Permit",
        }
    }
}

impl fmt::Display for PostingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostingType {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bid" => Ok(Self::Bid),
            "RFP" => Ok(Self::Rfp),
            "Permit" => Ok(Self::Permit),
            other => Err(UnknownLabel {
                kind: "posting type",
                label: other.to_string(),
            }),
        }
    }
}

/// Trade buckets a lead can fall into. `GeneralConstruction` is the fallback
/// when no keyword rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TradeCategory {
    #[serde(rename = "HVAC")]
    Hvac,
    Electrical,
    Plumbing,
    Roofing,
    Paving,
    Concrete,
    Painting,
    Flooring,
    Masonry,
    #[serde(rename = "Demo/Abatement")]
    DemoAbatement,
    #[serde(rename = "IT/Technology")]
    ItTechnology,
    Landscaping,
    Fencing,
    #[serde(rename = "Windows/Doors")]
    WindowsDoors,
    #[default]
    #[serde(rename = "General Construction")]
    GeneralConstruction,
}

impl TradeCategory {
    pub const ALL: [TradeCategory; 15] = [
        Self::Hvac,
        Self::Electrical,
        Self::Plumbing,
        Self::Roofing,
        Self::Paving,
        Self::Concrete,
        Self::Painting,
        Self::Flooring,
        Self::Masonry,
        Self::DemoAbatement,
        Self::ItTechnology,
        Self::Landscaping,
        Self::Fencing,
        Self::WindowsDoors,
        Self::GeneralConstruction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hvac => "HVAC",
            Self::Electrical => "Electrical",
            Self::Plumbing => "Plumbing",
            Self::Roofing => "Roofing",
            Self::Paving => "Paving",
            Self::Concrete => "Concrete",
            Self::Painting => "Painting",
            Self::Flooring => "Flooring",
            Self::Masonry => "Masonry",
            Self::DemoAbatement => "Demo/Abatement",
            Self::ItTechnology => "IT/Technology",
            Self::Landscaping => "Landscaping",
            Self::Fencing => "Fencing",
            Self::WindowsDoors => "Windows/Doors",
            Self::GeneralConstruction => "General Construction",
        }
    }
}

impl fmt::Display for TradeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeCategory {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownLabel {
                kind: "trade category",
                label: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    #[default]
    Active,
    Closed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownLabel {
                kind: "lead status",
                label: other.to_string(),
            }),
        }
    }
}

/// Unsaved lead as produced by an extractor or submitted through the import
/// endpoint. Handoff contract into reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadCandidate {
    pub title: String,
    #[serde(rename = "type")]
    pub posting_type: PostingType,
    pub trade_category: TradeCategory,
    pub location: String,
    #[serde(default)]
    pub filing_date: Option<NaiveDate>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl LeadCandidate {
    /// Natural key used by reconciliation. Blank urls count as missing.
    pub fn reconcile_key(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Persisted lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub posting_type: PostingType,
    pub trade_category: TradeCategory,
    pub location: String,
    pub filing_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub estimated_value: Option<f64>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub source_url: String,
    pub description: Option<String>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    pub fn from_candidate(candidate: &LeadCandidate, source_url: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: candidate.title.clone(),
            posting_type: candidate.posting_type,
            trade_category: candidate.trade_category,
            location: candidate.location.clone(),
            filing_date: candidate.filing_date,
            deadline: candidate.deadline,
            estimated_value: candidate.estimated_value,
            contact_name: candidate.contact_name.clone(),
            contact_email: candidate.contact_email.clone(),
            contact_phone: candidate.contact_phone.clone(),
            source_url: source_url.to_string(),
            description: candidate.description.clone(),
            status: LeadStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Carries over the identity of an already-stored row, so a rebuilt
    /// record updates that row instead of describing a new one.
    pub fn with_identity(mut self, id: Uuid, created_at: DateTime<Utc>) -> Self {
        self.id = id;
        self.created_at = created_at;
        self
    }

    /// True when the record is active and its deadline (midnight UTC) falls
    /// strictly before `cutoff`. Records without a deadline never expire.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == LeadStatus::Active
            && self
                .deadline
                .is_some_and(|deadline| date_start_utc(deadline) < cutoff)
    }
}

/// Midnight UTC at the start of `date`.
pub fn date_start_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
