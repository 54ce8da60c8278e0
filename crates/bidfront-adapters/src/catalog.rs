use std::collections::HashSet;
use std::sync::LazyLock;

use bidfront_core::{classify_posting_type, classify_trade, LeadCandidate};
use regex::Regex;
use scraper::Html;

use crate::{link_text, selector, AdapterError, CandidateParts, SourceExtractor, SourceProfile};

static BID_NUMBER_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+[A-Z]+-\d+)\s*[-–]?\s*(.*)$").expect("bid number text pattern compiles")
});

const MIN_LINK_CHARS: usize = 8;

/// Document-catalog listings: a page of links whose text starts with a bid
/// number such as `26B-2464`. The catalog carries no deadlines.
#[derive(Debug, Clone)]
pub struct CatalogLinkExtractor {
    profile: SourceProfile,
}

impl CatalogLinkExtractor {
    pub fn new(profile: SourceProfile) -> Self {
        Self { profile }
    }
}

impl SourceExtractor for CatalogLinkExtractor {
    fn source_id(&self) -> &str {
        self.profile.source_id
    }

    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn parse_listing(&self, html: &str) -> Result<Vec<LeadCandidate>, AdapterError> {
        let document = Html::parse_document(html);
        let anchors = selector("a[href]")?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for link in document.select(&anchors) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let text = link_text(link);
            if text.chars().count() < MIN_LINK_CHARS {
                continue;
            }
            let Some(caps) = BID_NUMBER_TEXT.captures(&text) else {
                continue;
            };
            let bid_number = caps[1].trim().to_string();
            let subject = match caps[2].trim() {
                "" => bid_number.clone(),
                rest => rest.to_string(),
            };

            let Some(source_url) = self.profile.resolve(href)? else {
                continue;
            };
            if !seen.insert(source_url.clone()) {
                continue;
            }

            out.push(self.profile.candidate(CandidateParts {
                title: format!("{bid_number} - {subject}"),
                posting_type: classify_posting_type(&format!("{bid_number} {subject}")),
                trade_category: classify_trade(&subject),
                deadline: None,
                source_url,
                description: format!(
                    "{} Bid #{bid_number}. See attached document for full specifications.",
                    self.profile.display_name
                ),
            }));
        }
        Ok(out)
    }
}
