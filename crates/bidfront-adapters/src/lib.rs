//! Source extractor contracts + the municipal listing extractors.

use std::sync::Arc;

use async_trait::async_trait;
use bidfront_core::{LeadCandidate, PostingType, TradeCategory};
use bidfront_storage::{FetchError, HttpFetcher, PageArchive, TlsPolicy};
use chrono::NaiveDate;
use scraper::{ElementRef, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

mod catalog;
mod portal;

pub use catalog::CatalogLinkExtractor;
pub use portal::PortalLinkExtractor;

pub const CRATE_NAME: &str = "bidfront-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error("invalid base url `{url}`: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{0}")]
    Message(String),
}

/// Static description of one publishing jurisdiction. Contact fields are
/// stamped onto every candidate the source produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProfile {
    pub source_id: &'static str,
    pub display_name: &'static str,
    pub base_url: &'static str,
    pub listing_url: &'static str,
    pub location: &'static str,
    pub contact_name: &'static str,
    pub contact_email: &'static str,
    pub contact_phone: &'static str,
    pub tls: TlsPolicy,
}

pub const ROCKFORD: SourceProfile = SourceProfile {
    source_id: "rockford",
    display_name: "City of Rockford",
    base_url: "https://rockfordil.gov/",
    listing_url: "https://rockfordil.gov/Bids.aspx",
    location: "Rockford, IL",
    contact_name: "City of Rockford Purchasing",
    contact_email: "purchasing2@rockfordil.gov",
    contact_phone: "779-348-7000",
    tls: TlsPolicy::Verify,
};

// The county host serves an incomplete certificate chain.
pub const WINNEBAGO: SourceProfile = SourceProfile {
    source_id: "winnebago",
    display_name: "Winnebago County",
    base_url: "https://wincoil.gov/",
    listing_url: "https://wincoil.gov/departments/purchasing-department/open-bids-quotes-rfps",
    location: "Winnebago County, IL",
    contact_name: "Winnebago County Purchasing",
    contact_email: "purchasing@wincoil.gov",
    contact_phone: "815-319-4215",
    tls: TlsPolicy::AcceptInvalidCerts,
};

impl SourceProfile {
    /// Resolves a listing href against the base URL. Non-http targets such as
    /// `mailto:` and `javascript:` links resolve to `None`, and fragments are
    /// dropped so the same posting always yields the same URL.
    pub fn resolve(&self, href: &str) -> Result<Option<String>, AdapterError> {
        let base = Url::parse(self.base_url).map_err(|source| AdapterError::BaseUrl {
            url: self.base_url.to_string(),
            source,
        })?;
        let Ok(mut resolved) = base.join(href.trim()) else {
            return Ok(None);
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            return Ok(None);
        }
        resolved.set_fragment(None);
        Ok(Some(resolved.to_string()))
    }

    pub(crate) fn candidate(&self, parts: CandidateParts) -> LeadCandidate {
        LeadCandidate {
            title: parts.title,
            posting_type: parts.posting_type,
            trade_category: parts.trade_category,
            location: self.location.to_string(),
            filing_date: None,
            deadline: parts.deadline,
            estimated_value: None,
            contact_name: Some(self.contact_name.to_string()),
            contact_email: Some(self.contact_email.to_string()),
            contact_phone: Some(self.contact_phone.to_string()),
            source_url: Some(parts.source_url),
            description: Some(parts.description),
        }
    }
}

pub(crate) struct CandidateParts {
    pub title: String,
    pub posting_type: PostingType,
    pub trade_category: TradeCategory,
    pub deadline: Option<NaiveDate>,
    pub source_url: String,
    pub description: String,
}

/// Per-cycle state handed to every extractor.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub run_id: Uuid,
    pub archive: Option<PageArchive>,
}

impl ExtractContext {
    pub fn new(run_id: Uuid) -> Self {
        Self { run_id, archive: None }
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }
}

#[async_trait]
pub trait SourceExtractor: Send + Sync {
    fn source_id(&self) -> &str;
    fn profile(&self) -> &SourceProfile;

    /// Pure listing parse; no I/O.
    fn parse_listing(&self, html: &str) -> Result<Vec<LeadCandidate>, AdapterError>;

    /// Fetches the listing page, archives the raw bytes when an archive is
    /// configured, and parses it. Archive failures are logged, not fatal.
    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
    ) -> Result<Vec<LeadCandidate>, AdapterError> {
        let profile = self.profile();
        let page = http
            .fetch_bytes(ctx.run_id, self.source_id(), profile.listing_url, profile.tls)
            .await
            .map_err(|source| AdapterError::Fetch {
                url: profile.listing_url.to_string(),
                source,
            })?;

        if let Some(archive) = &ctx.archive {
            match archive.archive(self.source_id(), page.fetched_at, &page.body).await {
                Ok(stored) => debug!(
                    source_id = self.source_id(),
                    path = %stored.relative_path.display(),
                    deduplicated = stored.deduplicated,
                    "archived listing page"
                ),
                Err(err) => warn!(source_id = self.source_id(), error = %err, "listing page archive failed"),
            }
        }

        let candidates = self.parse_listing(&page.text())?;
        info!(
            source_id = self.source_id(),
            count = candidates.len(),
            "parsed listing candidates"
        );
        Ok(candidates)
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|err| AdapterError::Selector {
        selector: css.to_string(),
        message: err.to_string(),
    })
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn link_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Text of a block element with its text nodes space-separated, so adjacent
/// cells such as `<td>225-PW-014</td><td>2/27/2025</td>` stay apart.
pub(crate) fn block_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

pub fn rockford_extractor() -> PortalLinkExtractor {
    PortalLinkExtractor::new(ROCKFORD)
}

pub fn winnebago_extractor() -> CatalogLinkExtractor {
    CatalogLinkExtractor::new(WINNEBAGO)
}

pub const BUILTIN_SOURCES: &[&str] = &["rockford", "winnebago"];

pub fn extractor_for_source(source_id: &str) -> Option<Arc<dyn SourceExtractor>> {
    match source_id {
        "rockford" => Some(Arc::new(rockford_extractor())),
        "winnebago" => Some(Arc::new(winnebago_extractor())),
        _ => None,
    }
}

pub fn default_extractors() -> Vec<Arc<dyn SourceExtractor>> {
    BUILTIN_SOURCES
        .iter()
        .filter_map(|id| extractor_for_source(id))
        .collect()
}
