use std::sync::Arc;
use std::time::Duration;

use bidfront_adapters::{ExtractContext, SourceExtractor};
use bidfront_core::LeadCandidate;
use bidfront_storage::{HttpFetcher, PageArchive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{SourceRegistry, SyncConfig};
use crate::reconcile::{ReconcileCounts, Reconciler};
use crate::report::ReportWriter;
use crate::store::LeadStore;
use crate::sweep::Sweeper;
use crate::{StoreError, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Sweep, then scrape.
    Full,
    ScrapeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Closed { count: u64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Reconciled { inserted: usize, updated: usize },
    NoCandidates,
    Failed { reason: String },
    /// Another cycle held the store; this trigger was dropped.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub candidates: usize,
    pub error: Option<String>,
}

impl SourceReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sweep: Option<SweepOutcome>,
    pub sources: Vec<SourceReport>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn counts(&self) -> Option<ReconcileCounts> {
        match self.outcome {
            CycleOutcome::Reconciled { inserted, updated } => Some(ReconcileCounts { inserted, updated }),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == CycleOutcome::Skipped
    }

    pub fn summary_line(&self) -> String {
        let sources_ok = self.sources.iter().filter(|s| s.succeeded()).count();
        let outcome = match &self.outcome {
            CycleOutcome::Reconciled { inserted, updated } => format!("inserted={inserted} updated={updated}"),
            CycleOutcome::NoCandidates => "no candidates".to_string(),
            CycleOutcome::Failed { reason } => format!("failed: {reason}"),
            CycleOutcome::Skipped => "skipped (cycle already running)".to_string(),
        };
        let sweep = match &self.sweep {
            Some(SweepOutcome::Closed { count }) => format!(" closed={count}"),
            Some(SweepOutcome::Failed { reason }) => format!(" sweep_failed=\"{reason}\""),
            None => String::new(),
        };
        format!(
            "run {} sources_ok={}/{}{} {}",
            self.run_id,
            sources_ok,
            self.sources.len(),
            sweep,
            outcome
        )
    }
}

/// Runs extractors concurrently, merges their candidates, and hands the
/// batch to the reconciler. At most one cycle runs at a time.
pub struct SyncPipeline {
    extractors: Vec<Arc<dyn SourceExtractor>>,
    http: Arc<HttpFetcher>,
    reconciler: Reconciler,
    sweeper: Sweeper,
    archive: Option<PageArchive>,
    reports: Option<ReportWriter>,
    source_timeout: Duration,
    cycle_lock: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(
        extractors: Vec<Arc<dyn SourceExtractor>>,
        http: HttpFetcher,
        store: Arc<dyn LeadStore>,
    ) -> Self {
        Self {
            extractors,
            http: Arc::new(http),
            reconciler: Reconciler::new(Arc::clone(&store)),
            sweeper: Sweeper::new(store),
            archive: None,
            reports: None,
            source_timeout: Duration::from_secs(120),
            cycle_lock: Mutex::new(()),
        }
    }

    /// Builds a pipeline from env config and the on-disk source registry.
    pub async fn from_config(config: &SyncConfig, store: Arc<dyn LeadStore>) -> Result<Self, SyncError> {
        let registry = SourceRegistry::load(&config.registry_path()).await?;
        let extractors = registry.enabled_extractors()?;
        let http = HttpFetcher::new(config.http_config())?;

        let mut pipeline = Self::new(extractors, http, store);
        if let Some(dir) = &config.artifacts_dir {
            pipeline = pipeline.with_archive(PageArchive::new(dir));
        }
        if let Some(dir) = &config.reports_dir {
            pipeline = pipeline.with_reports(ReportWriter::new(dir));
        }
        Ok(pipeline)
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_reports(mut self, reports: ReportWriter) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.extractors.iter().map(|e| e.source_id().to_string()).collect()
    }

    pub async fn run_full_cycle(&self) -> CycleReport {
        self.run_cycle(CycleKind::Full).await
    }

    pub async fn run_scrape_only(&self) -> CycleReport {
        self.run_cycle(CycleKind::ScrapeOnly).await
    }

    /// Sweep without scraping. Not serialized against cycles; the sweep is a
    /// single atomic statement.
    pub async fn run_sweep_only(&self) -> Result<u64, StoreError> {
        self.sweeper.sweep().await
    }

    async fn run_cycle(&self, kind: CycleKind) -> CycleReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!(%run_id, ?kind, "cycle already in progress; dropping trigger");
            return CycleReport {
                run_id,
                kind,
                started_at,
                finished_at: Utc::now(),
                sweep: None,
                sources: Vec::new(),
                outcome: CycleOutcome::Skipped,
            };
        };

        info!(%run_id, ?kind, sources = self.extractors.len(), "cycle started");

        let sweep = match kind {
            CycleKind::Full => Some(match self.sweeper.sweep().await {
                Ok(count) => SweepOutcome::Closed { count },
                Err(err) => {
                    error!(%run_id, error = %err, "pre-scrape sweep failed");
                    SweepOutcome::Failed { reason: err.to_string() }
                }
            }),
            CycleKind::ScrapeOnly => None,
        };

        let (sources, candidates) = self.extract_all(run_id).await;

        let outcome = if candidates.is_empty() {
            warn!(%run_id, "no candidates extracted; nothing to reconcile");
            CycleOutcome::NoCandidates
        } else {
            match self.reconciler.reconcile(&candidates).await {
                Ok(counts) => CycleOutcome::Reconciled {
                    inserted: counts.inserted,
                    updated: counts.updated,
                },
                Err(err) => {
                    error!(%run_id, error = %err, "cycle failed during reconciliation");
                    CycleOutcome::Failed { reason: err.to_string() }
                }
            }
        };

        let report = CycleReport {
            run_id,
            kind,
            started_at,
            finished_at: Utc::now(),
            sweep,
            sources,
            outcome,
        };

        if let Some(writer) = &self.reports {
            if let Err(err) = writer.write(&report, &candidates).await {
                warn!(%run_id, error = %err, "writing cycle report failed");
            }
        }

        info!(%run_id, summary = %report.summary_line(), "cycle finished");
        report
    }

    /// Fans out one task per extractor. A task that errors, panics, or
    /// overruns the source timeout contributes no candidates; results are
    /// merged in extractor order.
    async fn extract_all(&self, run_id: Uuid) -> (Vec<SourceReport>, Vec<LeadCandidate>) {
        let ctx = Arc::new(ExtractContext {
            run_id,
            archive: self.archive.clone(),
        });

        let handles: Vec<(String, JoinHandle<_>)> = self
            .extractors
            .iter()
            .map(|extractor| {
                let extractor = Arc::clone(extractor);
                let http = Arc::clone(&self.http);
                let ctx = Arc::clone(&ctx);
                let timeout = self.source_timeout;
                let source_id = extractor.source_id().to_string();
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(timeout, extractor.fetch_listing(&http, &ctx)).await
                });
                (source_id, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        let mut candidates = Vec::new();
        for (source_id, handle) in handles {
            let result = match handle.await {
                Ok(Ok(Ok(found))) => Ok(found),
                Ok(Ok(Err(err))) => Err(err.to_string()),
                Ok(Err(_elapsed)) => Err(format!("timed out after {:?}", self.source_timeout)),
                Err(join_err) if join_err.is_panic() => Err("extractor panicked".to_string()),
                Err(join_err) => Err(join_err.to_string()),
            };

            match result {
                Ok(found) => {
                    info!(%run_id, source_id = %source_id, count = found.len(), "source extracted");
                    reports.push(SourceReport {
                        source_id,
                        candidates: found.len(),
                        error: None,
                    });
                    candidates.extend(found);
                }
                Err(message) => {
                    warn!(%run_id, source_id = %source_id, error = %message, "extractor failed");
                    reports.push(SourceReport {
                        source_id,
                        candidates: 0,
                        error: Some(message),
                    });
                }
            }
        }
        (reports, candidates)
    }
}
