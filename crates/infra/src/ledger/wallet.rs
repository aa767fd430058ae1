use std::sync::Arc;

use tracing::info;

use sendwave_core::UserId;
use sendwave_wallet::{PointsAccount, TopupRequest, WalletLimits, WalletSummary, WalletTransaction};

use super::{LedgerError, PointsLedger};
use crate::jobs::Clock;

/// Transactions scanned when computing upcoming expiries.
const SUMMARY_SCAN_LIMIT: usize = 1000;

/// Wallet operations on top of the ledger: summaries, history, top-ups.
pub struct WalletService {
    ledger: Arc<dyn PointsLedger>,
    limits: WalletLimits,
    clock: Arc<dyn Clock>,
}

impl WalletService {
    pub fn new(ledger: Arc<dyn PointsLedger>, limits: WalletLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            limits,
            clock,
        }
    }

    pub fn summary(&self, user_id: UserId) -> Result<WalletSummary, LedgerError> {
        let account = self.ledger.open_account(user_id)?;
        let txns = self.ledger.transactions(user_id, SUMMARY_SCAN_LIMIT)?;
        Ok(WalletSummary::build(
            &account,
            &txns,
            self.limits,
            self.clock.now(),
        ))
    }

    pub fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.ledger.transactions(user_id, limit)
    }

    /// Apply a plan or ad-hoc top-up. Returns the ledger line and the account
    /// as it stands afterwards.
    pub fn topup(
        &self,
        user_id: UserId,
        request: &TopupRequest,
    ) -> Result<(WalletTransaction, PointsAccount), LedgerError> {
        let account = self.ledger.open_account(user_id)?;
        let grant = request.resolve(&account, self.clock.now())?;

        let txn = self.ledger.credit(
            user_id,
            grant.kind,
            grant.points,
            Some(grant.reference.clone()),
            Some(grant.expires_at),
        )?;

        let account = match grant.plan_expires_at {
            Some(at) => self.ledger.set_plan_expiry(user_id, Some(at))?,
            None => self.ledger.open_account(user_id)?,
        };

        info!(
            user_id = %user_id,
            points = grant.points,
            reference = %grant.reference,
            balance = account.balance(),
            "wallet topped up"
        );
        Ok((txn, account))
    }
}
