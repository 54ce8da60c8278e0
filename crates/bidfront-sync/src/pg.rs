use std::time::Duration;

use async_trait::async_trait;
use bidfront_core::LeadRecord;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};

use crate::store::{LeadStore, LeadTransaction, StoredIdentity};
use crate::StoreError;

const SELECT_IDENTITY: &str = r#"
    SELECT id, created_at
      FROM projects
     WHERE source_url = $1
"#;

const INSERT_LEAD: &str = r#"
    INSERT INTO projects (
        id, title, type, trade_category, location, filing_date, deadline,
        estimated_value, contact_name, contact_email, contact_phone,
        source_url, description, status, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
"#;

const UPDATE_LEAD: &str = r#"
    UPDATE projects
       SET title = $2,
           type = $3,
           trade_category = $4,
           location = $5,
           filing_date = $6,
           deadline = $7,
           estimated_value = $8,
           contact_name = $9,
           contact_email = $10,
           contact_phone = $11,
           description = $12,
           status = $13,
           updated_at = $14
     WHERE source_url = $1
"#;

const CLOSE_EXPIRED: &str = r#"
    UPDATE projects
       SET status = 'closed',
           updated_at = $2
     WHERE status = 'active'
       AND deadline IS NOT NULL
       AND (deadline::timestamp AT TIME ZONE 'UTC') < $1
"#;

/// Postgres-backed lead store over the `projects` table.
#[derive(Debug, Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn begin(&self) -> Result<Box<dyn LeadTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLeadTransaction { tx }))
    }

    async fn close_expired(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(CLOSE_EXPIRED)
            .bind(cutoff)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

struct PgLeadTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LeadTransaction for PgLeadTransaction {
    async fn find_identity(&mut self, source_url: &str) -> Result<Option<StoredIdentity>, StoreError> {
        let row = sqlx::query(SELECT_IDENTITY)
            .bind(source_url)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| -> Result<StoredIdentity, StoreError> {
            Ok(StoredIdentity {
                id: row.try_get("id")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn insert(&mut self, record: &LeadRecord) -> Result<(), StoreError> {
        sqlx::query(INSERT_LEAD)
            .bind(record.id)
            .bind(&record.title)
            .bind(record.posting_type.as_str())
            .bind(record.trade_category.as_str())
            .bind(&record.location)
            .bind(record.filing_date)
            .bind(record.deadline)
            .bind(record.estimated_value)
            .bind(record.contact_name.as_deref())
            .bind(record.contact_email.as_deref())
            .bind(record.contact_phone.as_deref())
            .bind(&record.source_url)
            .bind(record.description.as_deref())
            .bind(record.status.as_str())
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update(&mut self, record: &LeadRecord) -> Result<(), StoreError> {
        sqlx::query(UPDATE_LEAD)
            .bind(&record.source_url)
            .bind(&record.title)
            .bind(record.posting_type.as_str())
            .bind(record.trade_category.as_str())
            .bind(&record.location)
            .bind(record.filing_date)
            .bind(record.deadline)
            .bind(record.estimated_value)
            .bind(record.contact_name.as_deref())
            .bind(record.contact_email.as_deref())
            .bind(record.contact_phone.as_deref())
            .bind(record.description.as_deref())
            .bind(record.status.as_str())
            .bind(record.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
