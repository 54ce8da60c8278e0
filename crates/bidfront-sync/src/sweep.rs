use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::store::LeadStore;
use crate::StoreError;

/// Closes active leads whose deadline has passed by more than the grace window.
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn LeadStore>,
    grace: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self {
            store,
            grace: Duration::days(1),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub async fn sweep(&self) -> Result<u64, StoreError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now - self.grace;
        let closed = self.store.close_expired(cutoff, now).await?;
        if closed > 0 {
            info!(closed, %cutoff, "closed expired leads");
        }
        Ok(closed)
    }
}
