use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use sendwave_core::UserId;
use sendwave_wallet::{PointsAccount, TxnKind, WalletTransaction};

use super::{LedgerError, PointsLedger};
use crate::jobs::{Clock, SystemClock};

#[derive(Debug, Default)]
struct Books {
    accounts: HashMap<UserId, PointsAccount>,
    /// Append-only, oldest first.
    transactions: HashMap<UserId, Vec<WalletTransaction>>,
}

/// In-memory points ledger for tests/dev.
///
/// A single lock spans accounts and transactions, so each debit/credit is one
/// atomic read-modify-write plus append.
pub struct InMemoryPointsLedger {
    books: Mutex<Books>,
    clock: Arc<dyn Clock>,
}

impl InMemoryPointsLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            books: Mutex::new(Books::default()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Books>, LedgerError> {
        self.books
            .lock()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".into()))
    }
}

impl Default for InMemoryPointsLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PointsLedger for InMemoryPointsLedger {
    fn open_account(&self, user_id: UserId) -> Result<PointsAccount, LedgerError> {
        let mut books = self.lock()?;
        Ok(books
            .accounts
            .entry(user_id)
            .or_insert_with(|| PointsAccount::open(user_id))
            .clone())
    }

    fn account(&self, user_id: UserId) -> Result<Option<PointsAccount>, LedgerError> {
        Ok(self.lock()?.accounts.get(&user_id).cloned())
    }

    fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        self.lock()?
            .accounts
            .get(&user_id)
            .map(PointsAccount::balance)
            .ok_or(LedgerError::AccountNotFound(user_id))
    }

    fn debit(
        &self,
        user_id: UserId,
        points: i64,
        reference: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        let now = self.clock.now();
        let mut books = self.lock()?;
        let account = books
            .accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))?;

        let txn = account.debit(points, reference, now)?;
        books
            .transactions
            .entry(user_id)
            .or_default()
            .push(txn.clone());
        Ok(txn)
    }

    fn credit(
        &self,
        user_id: UserId,
        kind: TxnKind,
        points: i64,
        reference: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<WalletTransaction, LedgerError> {
        let now = self.clock.now();
        let mut books = self.lock()?;
        let account = books
            .accounts
            .entry(user_id)
            .or_insert_with(|| PointsAccount::open(user_id));

        let txn = account.credit(kind, points, reference, expires_at, now)?;
        books
            .transactions
            .entry(user_id)
            .or_default()
            .push(txn.clone());
        Ok(txn)
    }

    fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let books = self.lock()?;
        Ok(books
            .transactions
            .get(&user_id)
            .map(|txns| txns.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn set_plan_expiry(
        &self,
        user_id: UserId,
        at: Option<DateTime<Utc>>,
    ) -> Result<PointsAccount, LedgerError> {
        let mut books = self.lock()?;
        let account = books
            .accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::AccountNotFound(user_id))?;
        account.set_plan_expiry(at);
        Ok(account.clone())
    }
}
