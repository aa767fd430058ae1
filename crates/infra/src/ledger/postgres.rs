//! Postgres-backed points ledger.
//!
//! ## Atomicity
//!
//! `debit` and `credit` run in one SQL transaction:
//! 1. `SELECT ... FOR UPDATE` the account row
//! 2. Apply the domain rule (`PointsAccount::debit` / `credit`)
//! 3. `UPDATE` the balance and `INSERT` the transaction line
//! 4. Commit
//!
//! The row lock serialises concurrent debits for the same user, so no update
//! is lost and the stored balance always equals the sum of the lines.
//!
//! ## Runtime
//!
//! `PointsLedger` is synchronous (workers are plain threads). The adapter
//! keeps a handle to the tokio runtime that owns the pool and blocks on it.
//! Call it from worker threads or `spawn_blocking`, never from async code.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;

use sendwave_core::{AggregateRoot, TransactionId, UserId};
use sendwave_wallet::{PointsAccount, TxnKind, WalletTransaction};

use super::{LedgerError, PointsLedger};

/// DDL for the ledger tables; applied by `ensure_schema`.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS points_accounts (
    user_id         UUID PRIMARY KEY,
    balance         BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
    plan_expires_at TIMESTAMPTZ NULL,
    version         BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS points_transactions (
    id               UUID PRIMARY KEY,
    user_id          UUID NOT NULL REFERENCES points_accounts (user_id),
    kind             TEXT NOT NULL,
    points           BIGINT NOT NULL,
    balance_after    BIGINT NOT NULL,
    reference        TEXT NULL,
    expires_at       TIMESTAMPTZ NULL,
    expire_processed BOOLEAN NOT NULL DEFAULT TRUE,
    created_at       TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS points_transactions_user_created
    ON points_transactions (user_id, created_at DESC);
"#;

/// Postgres points ledger.
#[derive(Debug, Clone)]
pub struct PostgresPointsLedger {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresPointsLedger {
    /// `runtime` must be the runtime the pool was created on.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn lock_account(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> Result<Option<PointsAccount>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT balance, plan_expires_at, version
            FROM points_accounts
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_account", e))?;

        row.map(|row| account_from_row(user_id, &row)).transpose()
    }

    async fn store(
        tx: &mut Transaction<'_, Postgres>,
        account: &PointsAccount,
        txn: &WalletTransaction,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE points_accounts
            SET balance = $2, version = $3
            WHERE user_id = $1
            "#,
        )
        .bind(account.user_id().as_uuid())
        .bind(account.balance())
        .bind(account.version() as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        sqlx::query(
            r#"
            INSERT INTO points_transactions (
                id, user_id, kind, points, balance_after,
                reference, expires_at, expire_processed, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(txn.id.as_uuid())
        .bind(txn.user_id.as_uuid())
        .bind(txn.kind.as_str())
        .bind(txn.points)
        .bind(txn.balance_after)
        .bind(txn.reference.as_deref())
        .bind(txn.expires_at)
        .bind(txn.expire_processed)
        .bind(txn.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        Ok(())
    }

    async fn insert_account(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> Result<PointsAccount, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO points_accounts (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;

        Self::lock_account(tx, user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn debit_async(
        &self,
        user_id: UserId,
        points: i64,
        reference: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        let mut tx = self.begin().await?;
        let mut account = Self::lock_account(&mut tx, user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        // Dropping `tx` on error rolls back and releases the row lock.
        let txn = account.debit(points, reference, Utc::now())?;
        Self::store(&mut tx, &account, &txn).await?;
        self.commit(tx).await?;
        Ok(txn)
    }

    #[instrument(skip(self, reference), fields(user_id = %user_id, kind = kind.as_str()), err)]
    async fn credit_async(
        &self,
        user_id: UserId,
        kind: TxnKind,
        points: i64,
        reference: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<WalletTransaction, LedgerError> {
        let mut tx = self.begin().await?;
        let mut account = Self::insert_account(&mut tx, user_id).await?;

        let txn = account.credit(kind, points, reference, expires_at, Utc::now())?;
        Self::store(&mut tx, &account, &txn).await?;
        self.commit(tx).await?;
        Ok(txn)
    }

    async fn open_account_async(&self, user_id: UserId) -> Result<PointsAccount, LedgerError> {
        let mut tx = self.begin().await?;
        let account = Self::insert_account(&mut tx, user_id).await?;
        self.commit(tx).await?;
        Ok(account)
    }

    async fn account_async(&self, user_id: UserId) -> Result<Option<PointsAccount>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT balance, plan_expires_at, version
            FROM points_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("account", e))?;

        row.map(|row| account_from_row(user_id, &row)).transpose()
    }

    async fn transactions_async(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, points, balance_after, reference,
                   expires_at, expire_processed, created_at
            FROM points_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions", e))?;

        rows.iter()
            .map(|row| transaction_from_row(user_id, row))
            .collect()
    }

    async fn set_plan_expiry_async(
        &self,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> Result<PointsAccount, LedgerError> {
        let mut tx = self.begin().await?;
        let mut account = Self::lock_account(&mut tx, user_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(user_id))?;
        account.set_plan_expiry(at);

        sqlx::query(
            r#"
            UPDATE points_accounts
            SET plan_expires_at = $2, version = $3
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(at)
        .bind(account.version() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_plan_expiry", e))?;

        self.commit(tx).await?;
        Ok(account)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LedgerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<(), LedgerError> {
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

fn account_from_row(user_id: UserId, row: &sqlx::postgres::PgRow) -> Result<PointsAccount, LedgerError> {
    let balance: i64 = row.try_get("balance").map_err(decode_error)?;
    let plan_expires_at: Option<DateTime<Utc>> =
        row.try_get("plan_expires_at").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    Ok(PointsAccount::restore(
        user_id,
        balance,
        plan_expires_at,
        version.max(0) as u64,
    ))
}

fn transaction_from_row(
    user_id: UserId,
    row: &sqlx::postgres::PgRow,
) -> Result<WalletTransaction, LedgerError> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let kind = TxnKind::parse(&kind)
        .ok_or_else(|| LedgerError::Storage(format!("unknown transaction kind: {kind}")))?;
    Ok(WalletTransaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(decode_error)?),
        user_id,
        kind,
        points: row.try_get("points").map_err(decode_error)?,
        balance_after: row.try_get("balance_after").map_err(decode_error)?,
        reference: row.try_get("reference").map_err(decode_error)?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
        expire_processed: row.try_get("expire_processed").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn decode_error(err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(format!("failed to decode ledger row: {err}"))
}

/// Map SQLx errors to `LedgerError::Storage`, keeping the operation name and
/// the Postgres error code when there is one.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => LedgerError::Storage(format!(
            "database error in {operation} ({}): {}",
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed during {operation}"))
        }
        other => LedgerError::Storage(format!("{operation} failed: {other}")),
    }
}

impl PointsLedger for PostgresPointsLedger {
    fn open_account(&self, user_id: UserId) -> Result<PointsAccount, LedgerError> {
        self.runtime.block_on(self.open_account_async(user_id))
    }

    fn account(&self, user_id: UserId) -> Result<Option<PointsAccount>, LedgerError> {
        self.runtime.block_on(self.account_async(user_id))
    }

    fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        self.account(user_id)?
            .map(|a| a.balance())
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn debit(
        &self,
        user_id: UserId,
        points: i64,
        reference: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        self.runtime
            .block_on(self.debit_async(user_id, points, reference))
    }

    fn credit(
        &self,
        user_id: UserId,
        kind: TxnKind,
        points: i64,
        reference: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<WalletTransaction, LedgerError> {
        self.runtime
            .block_on(self.credit_async(user_id, kind, points, reference, expires_at))
    }

    fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.runtime
            .block_on(self.transactions_async(user_id, limit))
    }

    fn set_plan_expiry(
        &self,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> Result<PointsAccount, LedgerError> {
        self.runtime
            .block_on(self.set_plan_expiry_async(user_id, at))
    }
}
