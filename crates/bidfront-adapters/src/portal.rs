use std::sync::LazyLock;

use bidfront_core::{classify_posting_type, classify_trade, parse_flexible_date, LeadCandidate};
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::{block_text, link_text, selector, AdapterError, CandidateParts, SourceExtractor, SourceProfile};

static BID_DETAIL_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bids\.aspx\?bidid=").expect("bid detail href pattern compiles"));

static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").expect("slash date pattern compiles"));

static CASE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:RFP|RFQ|BID|IFB|NO\.?\s*)?(\d{2,4}-[A-Z]{1,3}-\d{2,4})")
        .expect("case number pattern compiles")
});

const BLOCK_TAGS: &[&str] = &["div", "tr", "li", "section", "article"];

const MIN_TITLE_CHARS: usize = 4;

/// Bid-portal listings where each posting is an anchor to a
/// `Bids.aspx?bidID=` detail page. Deadline and case number come from the
/// nearest enclosing block.
#[derive(Debug, Clone)]
pub struct PortalLinkExtractor {
    profile: SourceProfile,
}

impl PortalLinkExtractor {
    pub fn new(profile: SourceProfile) -> Self {
        Self { profile }
    }

    fn candidate_from_link(&self, link: ElementRef<'_>) -> Result<Option<LeadCandidate>, AdapterError> {
        let Some(href) = link.value().attr("href") else {
            return Ok(None);
        };
        if !BID_DETAIL_HREF.is_match(href) {
            return Ok(None);
        }

        let title = link_text(link);
        if title.chars().count() < MIN_TITLE_CHARS {
            return Ok(None);
        }
        let Some(source_url) = self.profile.resolve(href)? else {
            return Ok(None);
        };

        let context = enclosing_block(link).map(block_text).unwrap_or_default();
        let deadline = SLASH_DATE
            .find(&context)
            .and_then(|m| parse_flexible_date(m.as_str()));
        let case_number = CASE_NUMBER
            .find(&context)
            .map(|m| m.as_str().trim().to_string());

        let (posting_type, description) = match &case_number {
            Some(number) => (
                classify_posting_type(&format!("{title} {number}")),
                format!("{number} - {title}"),
            ),
            None => (classify_posting_type(&title), title.clone()),
        };

        Ok(Some(self.profile.candidate(CandidateParts {
            trade_category: classify_trade(&title),
            title,
            posting_type,
            deadline,
            source_url,
            description,
        })))
    }
}

fn enclosing_block(link: ElementRef<'_>) -> Option<ElementRef<'_>> {
    link.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| BLOCK_TAGS.contains(&el.value().name()))
}

impl SourceExtractor for PortalLinkExtractor {
    fn source_id(&self) -> &str {
        self.profile.source_id
    }

    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn parse_listing(&self, html: &str) -> Result<Vec<LeadCandidate>, AdapterError> {
        let document = Html::parse_document(html);
        let anchors = selector("a[href]")?;

        let mut out = Vec::new();
        for link in document.select(&anchors) {
            if let Some(candidate) = self.candidate_from_link(link)? {
                out.push(candidate);
            }
        }
        Ok(out)
    }
}
