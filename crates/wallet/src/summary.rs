use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{PointsAccount, WalletTransaction};

/// Deployment limits echoed back to the wallet owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletLimits {
    pub points_per_recipient: i64,
    pub max_daily_recipients: u64,
    pub max_campaign_recipients: u64,
}

/// Read model: balance plus upcoming expiries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub balance: i64,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub points_per_recipient: i64,
    pub max_daily_recipients: u64,
    pub max_campaign_recipients: u64,
    /// Sum of not-yet-swept credits that expire in the future.
    pub expiring_points: i64,
    pub next_expiry_at: Option<DateTime<Utc>>,
}

impl WalletSummary {
    pub fn build(
        account: &PointsAccount,
        transactions: &[WalletTransaction],
        limits: WalletLimits,
        now: DateTime<Utc>,
    ) -> Self {
        let mut expiring_points = 0;
        let mut next_expiry_at: Option<DateTime<Utc>> = None;

        for txn in transactions {
            if txn.expire_processed || txn.points <= 0 {
                continue;
            }
            let Some(at) = txn.expires_at else { continue };
            if at <= now {
                continue;
            }
            expiring_points += txn.points;
            next_expiry_at = Some(next_expiry_at.map_or(at, |cur| cur.min(at)));
        }

        Self {
            balance: account.balance(),
            plan_expires_at: account.plan_expires_at(),
            points_per_recipient: limits.points_per_recipient,
            max_daily_recipients: limits.max_daily_recipients,
            max_campaign_recipients: limits.max_campaign_recipients,
            expiring_points,
            next_expiry_at,
        }
    }
}
