//! Campaign delivery pipeline.
//!
//! ```text
//! CampaignController --enqueue--> JobQueue --claim--> RecipientProcessor
//!        |                                                 |   |
//!        | lifecycle                        throttle+gateway   | debit
//!        v                                                 v   v
//!   CampaignStore <------------- transitions -------- PointsLedger
//!        ^
//!        | recompute after every terminal recipient transition
//!   CampaignAggregator
//! ```
//!
//! Every component gets its collaborators at construction through
//! `DeliveryServices`; there is no global state.

mod aggregator;
mod controller;
mod processor;
mod throttle;

pub use aggregator::CampaignAggregator;
pub use controller::CampaignController;
pub use processor::{ProcessOutcome, RecipientProcessor};
pub use throttle::{NoThrottle, RandomThrottle, Throttle};

use std::sync::Arc;

use tracing::warn;

use sendwave_campaigns::{CampaignNotice, NoticeKind};
use sendwave_core::{CampaignId, DomainError, RecipientId, UserId};
use sendwave_events::EventBus;

use crate::contacts::ContactListError;
use crate::jobs::{Clock, JobQueue, QueueError};
use crate::ledger::{LedgerError, PointsLedger};
use crate::store::{CampaignStore, StoreError};

/// Failure reason recorded when the balance cannot cover a delivery.
pub const INSUFFICIENT_POINTS: &str = "Insufficient points";
/// Failure reason for recipients swept up by `cancel`.
pub const CANCELLED: &str = "Cancelled";
/// Failure reason for jobs that find their campaign cancelled.
pub const CAMPAIGN_CANCELLED: &str = "Campaign cancelled";

/// Delivery pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),
    #[error("recipient not found: {0}")]
    RecipientNotFound(RecipientId),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    ContactList(#[from] ContactListError),
    #[error("export failed: {0}")]
    Export(#[from] csv::Error),
}

/// Coarse error class, used for HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unprocessable,
    QuotaExceeded,
    Unauthorized,
    Internal,
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::Domain(e) => match e {
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
                DomainError::NotFound => ErrorKind::NotFound,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::InsufficientBalance { .. } | DomainError::SubscriptionExpired => {
                    ErrorKind::Unprocessable
                }
                DomainError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
                DomainError::Unauthorized => ErrorKind::Unauthorized,
                DomainError::InvariantViolation(_) => ErrorKind::Internal,
            },
            DeliveryError::CampaignNotFound(_) | DeliveryError::RecipientNotFound(_) => {
                ErrorKind::NotFound
            }
            DeliveryError::ContactList(ContactListError::NotFound(_)) => ErrorKind::NotFound,
            DeliveryError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                ErrorKind::Unprocessable
            }
            DeliveryError::Store(_)
            | DeliveryError::Ledger(_)
            | DeliveryError::Queue(_)
            | DeliveryError::ContactList(_)
            | DeliveryError::Export(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::Domain(DomainError::InsufficientBalance { .. })
            | DeliveryError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                "insufficient_balance"
            }
            DeliveryError::Domain(DomainError::SubscriptionExpired) => "subscription_expired",
            _ => match self.kind() {
                ErrorKind::Validation => "validation_error",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Conflict => "conflict",
                ErrorKind::Unprocessable => "unprocessable",
                ErrorKind::QuotaExceeded => "quota_exceeded",
                ErrorKind::Unauthorized => "unauthorized",
                ErrorKind::Internal => "internal_error",
            },
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => DeliveryError::Domain(e),
            StoreError::CampaignNotFound(id) => DeliveryError::CampaignNotFound(id),
            StoreError::RecipientNotFound(id) => DeliveryError::RecipientNotFound(id),
            other => DeliveryError::Store(other),
        }
    }
}

impl From<LedgerError> for DeliveryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(e) => DeliveryError::Domain(e),
            other => DeliveryError::Ledger(other),
        }
    }
}

/// Shared collaborators of the delivery components.
#[derive(Clone)]
pub struct DeliveryServices {
    pub store: Arc<dyn CampaignStore>,
    pub ledger: Arc<dyn PointsLedger>,
    pub queue: Arc<dyn JobQueue>,
    pub notices: Arc<dyn EventBus<CampaignNotice>>,
    pub clock: Arc<dyn Clock>,
}

impl DeliveryServices {
    /// Publish after commit. A failed publish is logged and otherwise ignored.
    pub(crate) fn notify(&self, campaign_id: CampaignId, user_id: UserId, kind: NoticeKind) {
        let mut notice = CampaignNotice::new(campaign_id, user_id, kind);
        notice.occurred_at = self.clock.now();
        if let Err(e) = self.notices.publish(notice) {
            warn!(campaign_id = %campaign_id, error = %e, "failed to publish campaign notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_rejections_surface_as_domain_errors() {
        let err: DeliveryError = StoreError::Rejected(DomainError::conflict("nope")).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn quota_and_balance_have_distinct_codes() {
        let quota: DeliveryError = DomainError::QuotaExceeded {
            sent_today: 10,
            requested: 5,
            cap: 12,
        }
        .into();
        assert_eq!(quota.kind(), ErrorKind::QuotaExceeded);

        let balance: DeliveryError = LedgerError::InsufficientBalance {
            balance: 1,
            required: 2,
        }
        .into();
        assert_eq!(balance.kind(), ErrorKind::Unprocessable);
        assert_eq!(balance.code(), "insufficient_balance");
    }

    #[test]
    fn storage_failures_are_internal() {
        let err: DeliveryError = StoreError::Storage("disk".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
