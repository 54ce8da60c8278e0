use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bidfront_adapters::{
    rockford_extractor, winnebago_extractor, AdapterError, ExtractContext, PortalLinkExtractor,
    SourceExtractor, SourceProfile, ROCKFORD,
};
use bidfront_core::{PostingType, TradeCategory};
use bidfront_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use chrono::NaiveDate;
use uuid::Uuid;

fn fixture(source_id: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source_id)
        .join("listing.html");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn rockford_fixture_parses_portal_links() {
    let leads = rockford_extractor()
        .parse_listing(&fixture("rockford"))
        .expect("parse rockford");

    let urls: Vec<_> = leads.iter().filter_map(|l| l.source_url.as_deref()).collect();
    assert_eq!(
        urls,
        vec![
            "https://rockfordil.gov/Bids.aspx?bidID=812",
            "https://rockfordil.gov/Bids.aspx?bidID=815",
            "https://rockfordil.gov/Bids.aspx?BidID=820",
        ]
    );

    let hvac = &leads[0];
    assert_eq!(hvac.deadline, NaiveDate::from_ymd_opt(2025, 2, 27));
    assert_eq!(hvac.trade_category, TradeCategory::Hvac);

    let network = &leads[1];
    assert_eq!(network.posting_type, PostingType::Rfp);
    assert_eq!(network.trade_category, TradeCategory::ItTechnology);
    assert_eq!(network.deadline, NaiveDate::from_ymd_opt(2025, 3, 14));
    assert_eq!(
        network.description.as_deref(),
        Some("1125-IT-007 - Request for Proposals: Network Switch Upgrade")
    );

    let sidewalk = &leads[2];
    assert_eq!(sidewalk.title, "Sidewalk Repair Program");
    assert_eq!(sidewalk.deadline, None);

    assert!(leads
        .iter()
        .all(|l| l.location == "Rockford, IL" && l.contact_phone.as_deref() == Some("779-348-7000")));
}

#[test]
fn winnebago_fixture_parses_catalog_links() {
    let leads = winnebago_extractor()
        .parse_listing(&fixture("winnebago"))
        .expect("parse winnebago");

    let titles: Vec<_> = leads.iter().map(|l| l.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "26B-2464 - Courthouse Roof Replacement",
            "25P-2450 - Request for Proposals Janitorial Services",
            "25Q-2445 - Quote for Tree Removal",
        ]
    );
    assert_eq!(
        leads[1].source_url.as_deref(),
        Some("https://wincoil.gov/images/purchasing/25P-2450.pdf")
    );
    assert_eq!(leads[1].posting_type, PostingType::Rfp);
    assert_eq!(leads[2].posting_type, PostingType::Rfp);
    // "remov" is ranked ahead of "tree".
    assert_eq!(leads[2].trade_category, TradeCategory::DemoAbatement);
    assert!(leads.iter().all(|l| l.deadline.is_none()));
    assert!(leads
        .iter()
        .all(|l| l.contact_email.as_deref() == Some("purchasing@wincoil.gov")));
}

#[test]
fn parsing_is_deterministic() {
    let html = fixture("rockford");
    let extractor = rockford_extractor();
    let first = extractor.parse_listing(&html).expect("first parse");
    let second = extractor.parse_listing(&html).expect("second parse");
    assert_eq!(first, second);
}

#[tokio::test]
async fn unreachable_listing_surfaces_fetch_error() {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_millis(500),
        backoff: BackoffPolicy::none(),
        ..Default::default()
    })
    .expect("http client");
    let extractor = PortalLinkExtractor::new(SourceProfile {
        listing_url: "http://127.0.0.1:9/Bids.aspx",
        ..ROCKFORD
    });

    let err = extractor
        .fetch_listing(&http, &ExtractContext::new(Uuid::new_v4()))
        .await
        .expect_err("closed port");
    assert!(matches!(err, AdapterError::Fetch { .. }));
}
