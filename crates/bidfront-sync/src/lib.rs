//! Lead ingestion: reconciliation, expiration sweep, and cycle orchestration.

use bidfront_storage::FetchError;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

mod config;
mod pg;
mod pipeline;
mod reconcile;
mod report;
mod scheduler;
mod store;
mod sweep;

pub use config::{SourceEntry, SourceRegistry, SyncConfig};
pub use pg::PgLeadStore;
pub use pipeline::{CycleKind, CycleOutcome, CycleReport, SourceReport, SweepOutcome, SyncPipeline};
pub use reconcile::{ReconcileCounts, Reconciler};
pub use report::ReportWriter;
pub use scheduler::{build_scheduler, spawn_startup_cycle, start_scheduler};
pub use store::{LeadStore, LeadTransaction, MemoryLeadStore, StoredIdentity};
pub use sweep::Sweeper;

pub const CRATE_NAME: &str = "bidfront-sync";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("injected store failure after {writes} writes")]
    Injected { writes: usize },
    #[error("source url already stored: {0}")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("http client: {0}")]
    Http(#[from] FetchError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}
