use std::sync::Arc;

use bidfront_core::{LeadCandidate, LeadRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::store::{LeadStore, LeadTransaction};
use crate::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    pub inserted: usize,
    pub updated: usize,
}

/// Upserts candidate batches keyed by source url. A batch is one transaction;
/// any storage error rolls back every write of that batch.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LeadStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, candidates: &[LeadCandidate]) -> Result<ReconcileCounts, StoreError> {
        self.reconcile_at(candidates, Utc::now()).await
    }

    pub async fn reconcile_at(
        &self,
        candidates: &[LeadCandidate],
        now: DateTime<Utc>,
    ) -> Result<ReconcileCounts, StoreError> {
        let keyed: Vec<(&str, &LeadCandidate)> = candidates
            .iter()
            .filter_map(|c| c.reconcile_key().map(|key| (key, c)))
            .collect();

        let skipped = candidates.len() - keyed.len();
        if skipped > 0 {
            debug!(skipped, "skipping candidates without source url");
        }
        if keyed.is_empty() {
            return Ok(ReconcileCounts::default());
        }

        let mut tx = self.store.begin().await?;
        match apply_batch(tx.as_mut(), &keyed, now).await {
            Ok(counts) => {
                tx.commit().await?;
                info!(inserted = counts.inserted, updated = counts.updated, "reconciled lead batch");
                Ok(counts)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed reconcile also failed");
                }
                error!(error = %err, "lead reconciliation rolled back");
                Err(err)
            }
        }
    }
}

async fn apply_batch(
    tx: &mut dyn LeadTransaction,
    keyed: &[(&str, &LeadCandidate)],
    now: DateTime<Utc>,
) -> Result<ReconcileCounts, StoreError> {
    let mut counts = ReconcileCounts::default();
    for (source_url, candidate) in keyed {
        match tx.find_identity(source_url).await? {
            Some(existing) => {
                let record =
                    LeadRecord::from_candidate(candidate, source_url, now).with_identity(existing.id, existing.created_at);
                tx.update(&record).await?;
                counts.updated += 1;
            }
            None => {
                tx.insert(&LeadRecord::from_candidate(candidate, source_url, now)).await?;
                counts.inserted += 1;
            }
        }
    }
    Ok(counts)
}
