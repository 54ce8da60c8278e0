use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bidfront_adapters::{AdapterError, ExtractContext, SourceExtractor, SourceProfile, ROCKFORD};
use bidfront_core::{LeadCandidate, LeadRecord, LeadStatus, PostingType, TradeCategory};
use bidfront_storage::{HttpClientConfig, HttpFetcher};
use bidfront_sync::{
    CycleOutcome, MemoryLeadStore, ReconcileCounts, ReportWriter, SweepOutcome, SyncPipeline,
};
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use tokio::sync::Notify;

enum Behavior {
    Return(Vec<LeadCandidate>),
    Fail(&'static str),
    Panic,
    Hang,
    Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        candidates: Vec<LeadCandidate>,
    },
}

struct FakeExtractor {
    profile: SourceProfile,
    behavior: Behavior,
}

fn fake(source_id: &'static str, behavior: Behavior) -> Arc<dyn SourceExtractor> {
    Arc::new(FakeExtractor {
        profile: SourceProfile { source_id, ..ROCKFORD },
        behavior,
    })
}

#[async_trait]
impl SourceExtractor for FakeExtractor {
    fn source_id(&self) -> &str {
        self.profile.source_id
    }

    fn profile(&self) -> &SourceProfile {
        &self.profile
    }

    fn parse_listing(&self, _html: &str) -> Result<Vec<LeadCandidate>, AdapterError> {
        Ok(Vec::new())
    }

    async fn fetch_listing(
        &self,
        _http: &HttpFetcher,
        _ctx: &ExtractContext,
    ) -> Result<Vec<LeadCandidate>, AdapterError> {
        match &self.behavior {
            Behavior::Return(candidates) => Ok(candidates.clone()),
            Behavior::Fail(message) => Err(AdapterError::Message(message.to_string())),
            Behavior::Panic => panic!("fake extractor blew up"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            Behavior::Gate {
                entered,
                release,
                candidates,
            } => {
                entered.notify_one();
                release.notified().await;
                Ok(candidates.clone())
            }
        }
    }
}

fn candidate(url: &str, deadline: Option<NaiveDate>) -> LeadCandidate {
    LeadCandidate {
        title: format!("Posting at {url}"),
        posting_type: PostingType::Bid,
        trade_category: TradeCategory::Paving,
        location: "Rockford, IL".into(),
        filing_date: None,
        deadline,
        estimated_value: None,
        contact_name: Some("City of Rockford Purchasing".into()),
        contact_email: None,
        contact_phone: None,
        source_url: Some(url.into()),
        description: None,
    }
}

fn future_date() -> NaiveDate {
    Utc::now().date_naive() + ChronoDuration::days(30)
}

fn past_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 15).unwrap()
}

fn pipeline(store: &MemoryLeadStore, extractors: Vec<Arc<dyn SourceExtractor>>) -> SyncPipeline {
    let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
    SyncPipeline::new(extractors, http, Arc::new(store.clone()))
}

#[tokio::test]
async fn failing_extractor_does_not_block_siblings() {
    let store = MemoryLeadStore::new();
    let pipeline = pipeline(
        &store,
        vec![
            fake("down", Behavior::Fail("http status 503")),
            fake(
                "up",
                Behavior::Return(vec![candidate("https://up/1", None), candidate("https://up/2", None)]),
            ),
        ],
    );

    let report = pipeline.run_scrape_only().await;
    assert_eq!(report.counts(), Some(ReconcileCounts { inserted: 2, updated: 0 }));
    assert_eq!(report.sources[0].source_id, "down");
    assert_eq!(report.sources[0].error.as_deref(), Some("http status 503"));
    assert_eq!(report.sources[1].candidates, 2);
    assert!(report.sources[1].succeeded());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn panicking_extractor_is_isolated() {
    let store = MemoryLeadStore::new();
    let pipeline = pipeline(
        &store,
        vec![
            fake("boom", Behavior::Panic),
            fake("up", Behavior::Return(vec![candidate("https://up/1", None)])),
        ],
    );

    let report = pipeline.run_scrape_only().await;
    assert_eq!(report.counts(), Some(ReconcileCounts { inserted: 1, updated: 0 }));
    assert!(!report.sources[0].succeeded());
}

#[tokio::test]
async fn hung_extractor_times_out() {
    let store = MemoryLeadStore::new();
    let pipeline = pipeline(
        &store,
        vec![
            fake("slow", Behavior::Hang),
            fake("up", Behavior::Return(vec![candidate("https://up/1", None)])),
        ],
    )
    .with_source_timeout(Duration::from_millis(100));

    let report = pipeline.run_scrape_only().await;
    assert!(report.sources[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));
    assert_eq!(report.counts(), Some(ReconcileCounts { inserted: 1, updated: 0 }));
}

#[tokio::test]
async fn end_to_end_reactivates_closed_record_and_inserts_new_one() {
    let store = MemoryLeadStore::new();
    let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let mut closed = LeadRecord::from_candidate(
        &candidate("https://rockford/bid/1", Some(past_date())),
        "https://rockford/bid/1",
        created,
    );
    closed.status = LeadStatus::Closed;
    store.seed(closed.clone()).await;

    let pipeline = pipeline(
        &store,
        vec![fake(
            "rockford-fake",
            Behavior::Return(vec![
                candidate("https://rockford/bid/1", Some(future_date())),
                candidate("https://rockford/bid/2", Some(future_date())),
            ]),
        )],
    );

    let report = pipeline.run_full_cycle().await;
    assert_eq!(report.sweep, Some(SweepOutcome::Closed { count: 0 }));
    assert_eq!(report.counts(), Some(ReconcileCounts { inserted: 1, updated: 1 }));

    let revived = store.get("https://rockford/bid/1").await.unwrap();
    assert_eq!(revived.status, LeadStatus::Active);
    assert_eq!(revived.id, closed.id);
    assert_eq!(revived.created_at, created);
    assert_eq!(revived.deadline, Some(future_date()));
    assert_eq!(
        store.get("https://rockford/bid/2").await.unwrap().status,
        LeadStatus::Active
    );
}

#[tokio::test]
async fn repeated_cycles_keep_source_urls_unique() {
    let store = MemoryLeadStore::new();
    let batch = vec![
        candidate("https://a/1", None),
        candidate("https://a/2", None),
        candidate("https://a/3", None),
    ];
    let pipeline = pipeline(&store, vec![fake("a", Behavior::Return(batch))]);

    let first = pipeline.run_scrape_only().await;
    let second = pipeline.run_scrape_only().await;
    assert_eq!(first.counts(), Some(ReconcileCounts { inserted: 3, updated: 0 }));
    assert_eq!(second.counts(), Some(ReconcileCounts { inserted: 0, updated: 3 }));

    let records = store.records().await;
    let urls: HashSet<_> = records.iter().map(|r| r.source_url.as_str()).collect();
    assert_eq!(urls.len(), records.len());
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn empty_cycle_is_a_no_op() {
    let store = MemoryLeadStore::new();
    let pipeline = pipeline(
        &store,
        vec![
            fake("quiet", Behavior::Return(Vec::new())),
            fake("down", Behavior::Fail("connection refused")),
        ],
    );

    let report = pipeline.run_scrape_only().await;
    assert_eq!(report.outcome, CycleOutcome::NoCandidates);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn storage_failure_fails_cycle_and_next_cycle_recovers() {
    let store = MemoryLeadStore::new();
    store.inject_failure_after(1);
    let pipeline = pipeline(
        &store,
        vec![fake(
            "a",
            Behavior::Return(vec![candidate("https://a/1", None), candidate("https://a/2", None)]),
        )],
    );

    let failed = pipeline.run_scrape_only().await;
    assert!(matches!(failed.outcome, CycleOutcome::Failed { .. }));
    assert!(store.is_empty().await);

    store.clear_failure();
    let retried = pipeline.run_scrape_only().await;
    assert_eq!(retried.counts(), Some(ReconcileCounts { inserted: 2, updated: 0 }));
}

#[tokio::test]
async fn full_cycle_sweeps_before_scraping() {
    let store = MemoryLeadStore::new();
    let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    store
        .seed(LeadRecord::from_candidate(
            &candidate("https://old/1", Some(past_date())),
            "https://old/1",
            created,
        ))
        .await;
    let pipeline = pipeline(
        &store,
        vec![fake("a", Behavior::Return(vec![candidate("https://a/1", None)]))],
    );

    let scrape_only = pipeline.run_scrape_only().await;
    assert_eq!(scrape_only.sweep, None);
    assert_eq!(store.get("https://old/1").await.unwrap().status, LeadStatus::Active);

    let full = pipeline.run_full_cycle().await;
    assert_eq!(full.sweep, Some(SweepOutcome::Closed { count: 1 }));
    assert_eq!(store.get("https://old/1").await.unwrap().status, LeadStatus::Closed);
    assert_eq!(pipeline.run_sweep_only().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_trigger_is_dropped() {
    let store = MemoryLeadStore::new();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let pipeline = Arc::new(pipeline(
        &store,
        vec![fake(
            "gated",
            Behavior::Gate {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
                candidates: vec![candidate("https://gated/1", None)],
            },
        )],
    ));

    let running = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_full_cycle().await })
    };
    entered.notified().await;

    let dropped = pipeline.run_scrape_only().await;
    assert!(dropped.is_skipped());
    assert!(dropped.sources.is_empty());

    release.notify_one();
    let finished = running.await.expect("first cycle task");
    assert_eq!(finished.counts(), Some(ReconcileCounts { inserted: 1, updated: 0 }));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn cycle_reports_are_written_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryLeadStore::new();
    let pipeline = pipeline(
        &store,
        vec![fake("a", Behavior::Return(vec![candidate("https://a/1", None)]))],
    )
    .with_reports(ReportWriter::new(dir.path()));

    let report = pipeline.run_scrape_only().await;
    let run_dir = dir.path().join(report.run_id.to_string());
    let candidates: Vec<LeadCandidate> =
        serde_json::from_slice(&std::fs::read(run_dir.join("candidates.json")).unwrap()).unwrap();
    assert_eq!(candidates.len(), 1);
    assert!(run_dir.join("cycle.json").exists());
}
