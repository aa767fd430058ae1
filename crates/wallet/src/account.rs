use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sendwave_core::{AggregateRoot, DomainError, DomainResult, TransactionId, UserId};

/// Ledger transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    Allocation,
    Topup,
    Deduct,
    Refund,
    Adjustment,
    CoinPurchase,
    Expire,
}

impl TxnKind {
    /// Kinds that add points to the balance.
    pub fn is_credit(self) -> bool {
        matches!(
            self,
            TxnKind::Allocation
                | TxnKind::Topup
                | TxnKind::Refund
                | TxnKind::Adjustment
                | TxnKind::CoinPurchase
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxnKind::Allocation => "allocation",
            TxnKind::Topup => "topup",
            TxnKind::Deduct => "deduct",
            TxnKind::Refund => "refund",
            TxnKind::Adjustment => "adjustment",
            TxnKind::CoinPurchase => "coin_purchase",
            TxnKind::Expire => "expire",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "allocation" => TxnKind::Allocation,
            "topup" => TxnKind::Topup,
            "deduct" => TxnKind::Deduct,
            "refund" => TxnKind::Refund,
            "adjustment" => TxnKind::Adjustment,
            "coin_purchase" => TxnKind::CoinPurchase,
            "expire" => TxnKind::Expire,
            _ => return None,
        })
    }
}

/// One immutable ledger line.
///
/// Only `expire_processed` may change after the row is written (by the expiry
/// sweep, which lives outside this crate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TxnKind,
    /// Signed delta: negative for debits.
    pub points: i64,
    pub balance_after: i64,
    /// e.g. `campaign:<id>`, `plan:30d`.
    pub reference: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expire_processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregate root: a user's points account.
///
/// Every balance change goes through `debit`/`credit`, which return the ledger
/// line that must be persisted together with the new balance. That keeps
/// `balance == sum(points)` as long as callers commit both in one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAccount {
    user_id: UserId,
    balance: i64,
    plan_expires_at: Option<DateTime<Utc>>,
    version: u64,
}

impl PointsAccount {
    /// Fresh account with a zero balance.
    pub fn open(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            plan_expires_at: None,
            version: 0,
        }
    }

    /// Rebuild from persisted columns.
    pub fn restore(
        user_id: UserId,
        balance: i64,
        plan_expires_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            user_id,
            balance,
            plan_expires_at,
            version,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn plan_expires_at(&self) -> Option<DateTime<Utc>> {
        self.plan_expires_at
    }

    pub fn is_plan_expired(&self, now: DateTime<Utc>) -> bool {
        self.plan_expires_at.is_some_and(|at| at < now)
    }

    pub fn can_afford(&self, points: i64) -> bool {
        self.balance >= points
    }

    pub fn set_plan_expiry(&mut self, at: Option<DateTime<Utc>>) {
        self.plan_expires_at = at;
        self.version += 1;
    }

    /// Deduct `points` and produce the matching ledger line.
    pub fn debit(
        &mut self,
        points: i64,
        reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<WalletTransaction> {
        if points < 0 {
            return Err(DomainError::validation("debit amount must not be negative"));
        }
        if !self.can_afford(points) {
            return Err(DomainError::InsufficientBalance {
                required: points,
                available: self.balance,
            });
        }

        self.balance -= points;
        self.version += 1;

        Ok(WalletTransaction {
            id: TransactionId::new(),
            user_id: self.user_id,
            kind: TxnKind::Deduct,
            points: -points,
            balance_after: self.balance,
            reference: Some(reference.into()),
            expires_at: None,
            expire_processed: true,
            created_at: now,
        })
    }

    /// Add `points` and produce the matching ledger line.
    pub fn credit(
        &mut self,
        kind: TxnKind,
        points: i64,
        reference: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DomainResult<WalletTransaction> {
        if !kind.is_credit() {
            return Err(DomainError::validation(format!(
                "{} is not a credit kind",
                kind.as_str()
            )));
        }
        if points <= 0 {
            return Err(DomainError::validation("points must be positive"));
        }

        self.balance += points;
        self.version += 1;

        Ok(WalletTransaction {
            id: TransactionId::new(),
            user_id: self.user_id,
            kind,
            points,
            balance_after: self.balance,
            reference,
            expires_at,
            expire_processed: expires_at.is_none(),
            created_at: now,
        })
    }
}

impl AggregateRoot for PointsAccount {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
