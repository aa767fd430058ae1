//! Points ledger persistence.
//!
//! Every balance change is one atomic unit: lock the account, apply the
//! domain debit/credit, append the resulting transaction, store the new
//! balance. Concurrent debits from many workers therefore never lose updates
//! and `balance == sum(points)` holds after every commit.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;
mod wallet;

pub use in_memory::InMemoryPointsLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPointsLedger;
pub use wallet::WalletService;

use chrono::{DateTime, Utc};

use sendwave_core::{DomainError, UserId};
use sendwave_wallet::{PointsAccount, TxnKind, WalletTransaction};

/// Ledger error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("no points account for user {0}")]
    AccountNotFound(UserId),
    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: i64, required: i64 },
    #[error(transparent)]
    Rejected(DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientBalance {
                required,
                available,
            } => LedgerError::InsufficientBalance {
                balance: available,
                required,
            },
            other => LedgerError::Rejected(other),
        }
    }
}

/// Points ledger abstraction.
pub trait PointsLedger: Send + Sync {
    /// Create a zero-balance account, or return the existing one.
    fn open_account(&self, user_id: UserId) -> Result<PointsAccount, LedgerError>;

    fn account(&self, user_id: UserId) -> Result<Option<PointsAccount>, LedgerError>;

    fn balance(&self, user_id: UserId) -> Result<i64, LedgerError>;

    /// Deduct `points`, appending a `deduct` transaction. Fails with
    /// `InsufficientBalance` and changes nothing if the balance is too low.
    fn debit(
        &self,
        user_id: UserId,
        points: i64,
        reference: &str,
    ) -> Result<WalletTransaction, LedgerError>;

    /// Add `points`, appending a transaction of the given credit kind.
    fn credit(
        &self,
        user_id: UserId,
        kind: TxnKind,
        points: i64,
        reference: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<WalletTransaction, LedgerError>;

    /// Most recent transactions first.
    fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, LedgerError>;

    fn set_plan_expiry(
        &self,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> Result<PointsAccount, LedgerError>;
}

impl<L: PointsLedger + ?Sized> PointsLedger for std::sync::Arc<L> {
    fn open_account(&self, user_id: UserId) -> Result<PointsAccount, LedgerError> {
        (**self).open_account(user_id)
    }

    fn account(&self, user_id: UserId) -> Result<Option<PointsAccount>, LedgerError> {
        (**self).account(user_id)
    }

    fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        (**self).balance(user_id)
    }

    fn debit(
        &self,
        user_id: UserId,
        points: i64,
        reference: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        (**self).debit(user_id, points, reference)
    }

    fn credit(
        &self,
        user_id: UserId,
        kind: TxnKind,
        points: i64,
        reference: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<WalletTransaction, LedgerError> {
        (**self).credit(user_id, kind, points, reference, expires_at)
    }

    fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        (**self).transactions(user_id, limit)
    }

    fn set_plan_expiry(
        &self,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> Result<PointsAccount, LedgerError> {
        (**self).set_plan_expiry(user_id, at)
    }
}
