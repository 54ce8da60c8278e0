use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::pipeline::SyncPipeline;
use crate::SyncError;

/// Registers the full-cycle and sweep-only jobs. Cron strings carry a
/// leading seconds field and are evaluated in UTC.
pub async fn build_scheduler(pipeline: Arc<SyncPipeline>, config: &SyncConfig) -> Result<JobScheduler, SyncError> {
    let sched = JobScheduler::new().await?;

    let cycle_pipeline = Arc::clone(&pipeline);
    let cycle_job = Job::new_async(config.scrape_cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&cycle_pipeline);
        Box::pin(async move {
            let report = pipeline.run_full_cycle().await;
            info!(summary = %report.summary_line(), "scheduled cycle finished");
        })
    })?;
    sched.add(cycle_job).await?;

    let sweep_pipeline = Arc::clone(&pipeline);
    let sweep_job = Job::new_async(config.sweep_cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&sweep_pipeline);
        Box::pin(async move {
            match pipeline.run_sweep_only().await {
                Ok(closed) => info!(closed, "scheduled sweep finished"),
                Err(err) => error!(error = %err, "scheduled sweep failed"),
            }
        })
    })?;
    sched.add(sweep_job).await?;

    Ok(sched)
}

pub fn spawn_startup_cycle(pipeline: Arc<SyncPipeline>, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let report = pipeline.run_full_cycle().await;
        info!(summary = %report.summary_line(), "startup cycle finished");
    })
}

/// Starts the scheduler plus the delayed startup cycle when enabled.
pub async fn start_scheduler(
    pipeline: Arc<SyncPipeline>,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>, SyncError> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = build_scheduler(Arc::clone(&pipeline), config).await?;
    sched.start().await?;
    info!(
        scrape_cron = %config.scrape_cron,
        sweep_cron = %config.sweep_cron,
        startup_delay_secs = config.startup_delay.as_secs(),
        "scheduler started"
    );
    spawn_startup_cycle(pipeline, config.startup_delay);
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryLeadStore;
    use bidfront_storage::{HttpClientConfig, HttpFetcher};

    fn pipeline() -> Arc<SyncPipeline> {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        Arc::new(SyncPipeline::new(Vec::new(), http, Arc::new(MemoryLeadStore::new())))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_scheduler_is_not_built() {
        let config = SyncConfig::default();
        assert!(start_scheduler(pipeline(), &config).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn default_cron_strings_are_accepted() {
        let config = SyncConfig::default();
        build_scheduler(pipeline(), &config).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_cron_is_rejected() {
        let config = SyncConfig {
            scrape_cron: "every morning".into(),
            ..SyncConfig::default()
        };
        assert!(matches!(
            build_scheduler(pipeline(), &config).await,
            Err(SyncError::Scheduler(_))
        ));
    }
}
