//! Postgres-backed campaign store.
//!
//! Campaigns and recipients are kept as JSONB bodies next to the few columns
//! queries filter on (`user_id`, `status`, `sent_at`). Every `modify_*` runs
//! in one transaction that takes `SELECT ... FOR UPDATE` on the rows it
//! touches, so two workers racing on the same recipient serialise on the row
//! lock and the loser's closure sees the winner's write.
//!
//! Like the ledger adapter, the trait is synchronous and blocks on the
//! runtime that owns the pool.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;

use sendwave_campaigns::{Campaign, Recipient};
use sendwave_core::{CampaignId, RecipientId, UserId};

use super::{CampaignMutation, CampaignStore, RecipientMutation, StoreError};

/// DDL for the campaign tables; applied by `ensure_schema`.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS campaigns (
    id         UUID PRIMARY KEY,
    user_id    UUID NOT NULL,
    status     TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    body       JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS campaigns_user_created
    ON campaigns (user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS campaign_recipients (
    id          UUID PRIMARY KEY,
    campaign_id UUID NOT NULL REFERENCES campaigns (id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    status      TEXT NOT NULL,
    sent_at     TIMESTAMPTZ NULL,
    body        JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS campaign_recipients_campaign
    ON campaign_recipients (campaign_id, position);
"#;

/// Postgres campaign store.
#[derive(Debug, Clone)]
pub struct PostgresCampaignStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresCampaignStore {
    /// `runtime` must be the runtime the pool was created on.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(campaign_id = %campaign.id(), recipients = recipients.len()), err)]
    async fn insert_async(
        &self,
        campaign: Campaign,
        recipients: Vec<Recipient>,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO campaigns (id, user_id, status, created_at, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(campaign.id().as_uuid())
        .bind(campaign.user_id().as_uuid())
        .bind(campaign.status().as_str())
        .bind(campaign.created_at())
        .bind(Json(&campaign))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_campaign", e))?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(campaign.id()));
        }

        for (position, r) in recipients.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (id, campaign_id, position, status, sent_at, body)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(r.id().as_uuid())
            .bind(campaign.id().as_uuid())
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(r.status().as_str())
            .bind(r.sent_at())
            .bind(Json(r))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_recipient", e))?;
        }

        self.commit(tx).await
    }

    async fn campaign_async(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        let row = sqlx::query("SELECT body FROM campaigns WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("campaign", e))?;
        row.as_ref().map(body).transpose()
    }

    async fn campaigns_for_user_async(&self, user_id: UserId) -> Result<Vec<Campaign>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM campaigns
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("campaigns_for_user", e))?;
        rows.iter().map(body).collect()
    }

    async fn dispatching_campaigns_async(&self) -> Result<Vec<Campaign>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM campaigns
            WHERE status IN ('QUEUED', 'SENDING')
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("dispatching_campaigns", e))?;
        rows.iter().map(body).collect()
    }

    async fn recipient_async(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError> {
        let row = sqlx::query("SELECT body FROM campaign_recipients WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("recipient", e))?;
        row.as_ref().map(body).transpose()
    }

    async fn recipients_async(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>, StoreError> {
        if self.campaign_async(campaign_id).await?.is_none() {
            return Err(StoreError::CampaignNotFound(campaign_id));
        }
        let rows = sqlx::query(
            r#"
            SELECT body FROM campaign_recipients
            WHERE campaign_id = $1
            ORDER BY position
            "#,
        )
        .bind(campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("recipients", e))?;
        rows.iter().map(body).collect()
    }

    async fn delivered_since_async(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM campaign_recipients r
            JOIN campaigns c ON c.id = r.campaign_id
            WHERE c.user_id = $1
              AND r.status IN ('SENT', 'READ')
              AND r.sent_at >= $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delivered_since", e))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, mutate), fields(campaign_id = %id), err)]
    async fn modify_campaign_async(
        &self,
        id: CampaignId,
        mutate: &mut CampaignMutation<'_, bool>,
    ) -> Result<(Campaign, bool), StoreError> {
        let mut tx = self.begin().await?;
        let mut campaign = Self::lock_campaign(&mut tx, id).await?;

        // Dropping `tx` on error rolls back and releases the row lock.
        let changed = mutate(&mut campaign)?;
        if changed {
            Self::update_campaign(&mut tx, &campaign).await?;
            self.commit(tx).await?;
        }
        Ok((campaign, changed))
    }

    #[instrument(skip(self, mutate), fields(recipient_id = %id), err)]
    async fn modify_recipient_async(
        &self,
        id: RecipientId,
        mutate: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Recipient, bool), StoreError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT body FROM campaign_recipients WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_recipient", e))?;
        let mut recipient: Recipient = row
            .as_ref()
            .map(body)
            .transpose()?
            .ok_or(StoreError::RecipientNotFound(id))?;

        let changed = mutate(&mut recipient)?;
        if changed {
            Self::update_recipient(&mut tx, &recipient).await?;
            self.commit(tx).await?;
        }
        Ok((recipient, changed))
    }

    #[instrument(skip(self, campaign_fn, recipient_fn), fields(campaign_id = %id), err)]
    async fn modify_campaign_and_recipients_async(
        &self,
        id: CampaignId,
        campaign_fn: &mut CampaignMutation<'_, ()>,
        recipient_fn: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Campaign, Vec<Recipient>), StoreError> {
        let mut tx = self.begin().await?;
        let mut campaign = Self::lock_campaign(&mut tx, id).await?;
        campaign_fn(&mut campaign)?;

        let rows = sqlx::query(
            r#"
            SELECT body FROM campaign_recipients
            WHERE campaign_id = $1
            ORDER BY position
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_recipients", e))?;

        let mut changed = Vec::new();
        for row in &rows {
            let mut recipient: Recipient = body(row)?;
            if recipient_fn(&mut recipient)? {
                changed.push(recipient);
            }
        }

        for r in &changed {
            Self::update_recipient(&mut tx, r).await?;
        }
        Self::update_campaign(&mut tx, &campaign).await?;
        self.commit(tx).await?;
        Ok((campaign, changed))
    }

    async fn lock_campaign(
        tx: &mut Transaction<'_, Postgres>,
        id: CampaignId,
    ) -> Result<Campaign, StoreError> {
        let row = sqlx::query("SELECT body FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_campaign", e))?;
        row.as_ref()
            .map(body)
            .transpose()?
            .ok_or(StoreError::CampaignNotFound(id))
    }

    async fn update_campaign(
        tx: &mut Transaction<'_, Postgres>,
        campaign: &Campaign,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE campaigns SET status = $2, body = $3 WHERE id = $1")
            .bind(campaign.id().as_uuid())
            .bind(campaign.status().as_str())
            .bind(Json(campaign))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_campaign", e))?;
        Ok(())
    }

    async fn update_recipient(
        tx: &mut Transaction<'_, Postgres>,
        recipient: &Recipient,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = $2, sent_at = $3, body = $4
            WHERE id = $1
            "#,
        )
        .bind(recipient.id().as_uuid())
        .bind(recipient.status().as_str())
        .bind(recipient.sent_at())
        .bind(Json(recipient))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_recipient", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

fn body<T: serde::de::DeserializeOwned>(row: &sqlx::postgres::PgRow) -> Result<T, StoreError> {
    let Json(value) = row
        .try_get::<Json<T>, _>("body")
        .map_err(|e| StoreError::Storage(format!("failed to decode campaign row: {e}")))?;
    Ok(value)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Storage(format!(
            "database error in {operation} ({}): {}",
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed during {operation}"))
        }
        other => StoreError::Storage(format!("{operation} failed: {other}")),
    }
}

impl CampaignStore for PostgresCampaignStore {
    fn insert(&self, campaign: Campaign, recipients: Vec<Recipient>) -> Result<(), StoreError> {
        self.runtime.block_on(self.insert_async(campaign, recipients))
    }

    fn campaign(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        self.runtime.block_on(self.campaign_async(id))
    }

    fn campaigns_for_user(&self, user_id: UserId) -> Result<Vec<Campaign>, StoreError> {
        self.runtime.block_on(self.campaigns_for_user_async(user_id))
    }

    fn dispatching_campaigns(&self) -> Result<Vec<Campaign>, StoreError> {
        self.runtime.block_on(self.dispatching_campaigns_async())
    }

    fn recipient(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError> {
        self.runtime.block_on(self.recipient_async(id))
    }

    fn recipients(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>, StoreError> {
        self.runtime.block_on(self.recipients_async(campaign_id))
    }

    fn delivered_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.runtime
            .block_on(self.delivered_since_async(user_id, since))
    }

    fn modify_campaign(
        &self,
        id: CampaignId,
        mutate: &mut CampaignMutation<'_, bool>,
    ) -> Result<(Campaign, bool), StoreError> {
        self.runtime.block_on(self.modify_campaign_async(id, mutate))
    }

    fn modify_recipient(
        &self,
        id: RecipientId,
        mutate: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Recipient, bool), StoreError> {
        self.runtime.block_on(self.modify_recipient_async(id, mutate))
    }

    fn modify_campaign_and_recipients(
        &self,
        id: CampaignId,
        campaign_fn: &mut CampaignMutation<'_, ()>,
        recipient_fn: &mut RecipientMutation<'_, bool>,
    ) -> Result<(Campaign, Vec<Recipient>), StoreError> {
        self.runtime.block_on(self.modify_campaign_and_recipients_async(
            id,
            campaign_fn,
            recipient_fn,
        ))
    }
}
