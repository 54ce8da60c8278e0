use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bidfront_core::{LeadRecord, LeadStatus};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::StoreError;

/// Persisted lead storage. Reconciliation goes through [`LeadStore::begin`];
/// the expiration sweep is a single bulk statement.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LeadTransaction>, StoreError>;

    /// Closes active leads whose deadline (midnight UTC) is earlier than
    /// `cutoff`, stamping `updated_at = now`. Returns the affected count.
    async fn close_expired(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Identity of a row already stored under a source url. Reconciliation
/// rebuilds every other column from the candidate, so nothing else is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredIdentity {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One atomic unit of work. Dropping without `commit` discards the writes.
#[async_trait]
pub trait LeadTransaction: Send {
    async fn find_identity(&mut self, source_url: &str) -> Result<Option<StoredIdentity>, StoreError>;
    async fn insert(&mut self, record: &LeadRecord) -> Result<(), StoreError>;
    /// Full-field update keyed by `record.source_url`.
    async fn update(&mut self, record: &LeadRecord) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

const NO_FAULT: usize = usize::MAX;

/// In-process store keyed by source url. Transactions stage their writes and
/// apply them under the store lock at commit.
#[derive(Debug, Clone)]
pub struct MemoryLeadStore {
    records: Arc<Mutex<BTreeMap<String, LeadRecord>>>,
    fail_after_writes: Arc<AtomicUsize>,
}

impl Default for MemoryLeadStore {
    fn default() -> Self {
        Self {
            records: Arc::default(),
            fail_after_writes: Arc::new(AtomicUsize::new(NO_FAULT)),
        }
    }
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent transaction fail on its `writes + 1`-th write.
    pub fn inject_failure_after(&self, writes: usize) {
        self.fail_after_writes.store(writes, Ordering::SeqCst);
    }

    pub fn clear_failure(&self) {
        self.fail_after_writes.store(NO_FAULT, Ordering::SeqCst);
    }

    pub async fn seed(&self, record: LeadRecord) {
        self.records.lock().await.insert(record.source_url.clone(), record);
    }

    pub async fn get(&self, source_url: &str) -> Option<LeadRecord> {
        self.records.lock().await.get(source_url).cloned()
    }

    pub async fn records(&self) -> Vec<LeadRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn begin(&self) -> Result<Box<dyn LeadTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: BTreeMap::new(),
            writes: 0,
        }))
    }

    async fn close_expired(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let mut closed = 0u64;
        for record in records.values_mut().filter(|r| r.is_expired(cutoff)) {
            record.status = LeadStatus::Closed;
            record.updated_at = now;
            closed += 1;
        }
        Ok(closed)
    }
}

struct MemoryTransaction {
    store: MemoryLeadStore,
    staged: BTreeMap<String, LeadRecord>,
    writes: usize,
}

impl MemoryTransaction {
    fn count_write(&mut self) -> Result<(), StoreError> {
        let limit = self.store.fail_after_writes.load(Ordering::SeqCst);
        if self.writes >= limit {
            return Err(StoreError::Injected { writes: self.writes });
        }
        self.writes += 1;
        Ok(())
    }
}

#[async_trait]
impl LeadTransaction for MemoryTransaction {
    async fn find_identity(&mut self, source_url: &str) -> Result<Option<StoredIdentity>, StoreError> {
        let identity = |record: &LeadRecord| StoredIdentity {
            id: record.id,
            created_at: record.created_at,
        };
        if let Some(record) = self.staged.get(source_url) {
            return Ok(Some(identity(record)));
        }
        Ok(self.store.get(source_url).await.as_ref().map(identity))
    }

    async fn insert(&mut self, record: &LeadRecord) -> Result<(), StoreError> {
        self.count_write()?;
        let exists = self.staged.contains_key(&record.source_url)
            || self.store.records.lock().await.contains_key(&record.source_url);
        if exists {
            return Err(StoreError::Conflict(record.source_url.clone()));
        }
        self.staged.insert(record.source_url.clone(), record.clone());
        Ok(())
    }

    async fn update(&mut self, record: &LeadRecord) -> Result<(), StoreError> {
        self.count_write()?;
        self.staged.insert(record.source_url.clone(), record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut records = this.store.records.lock().await;
        for (source_url, record) in this.staged {
            match records.get_mut(&source_url) {
                Some(existing) => {
                    // keep the identity of the row already stored
                    let id = existing.id;
                    let created_at = existing.created_at;
                    *existing = record;
                    existing.id = id;
                    existing.created_at = created_at;
                }
                None => {
                    records.insert(source_url, record);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
