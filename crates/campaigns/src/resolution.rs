//! Campaign completion rule.
//!
//! Pure function over the campaign's current status and its recipients'
//! statuses. Re-running it on unchanged input yields the same verdict, so the
//! aggregator can be invoked after every recipient transition without
//! coordination.

use crate::campaign::CampaignStatus;
use crate::recipient::DeliveryStatus;

/// Aggregator verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Some recipient is still QUEUED or SENDING.
    InProgress,
    /// Campaign is parked (DRAFT, PAUSED, CANCELLED); leave it alone.
    Untouched,
    Completed,
    Failed,
}

pub fn resolve_status<I>(current: CampaignStatus, recipients: I) -> Resolution
where
    I: IntoIterator<Item = DeliveryStatus>,
{
    let mut any_failed = false;
    for status in recipients {
        if status.is_pending() {
            return Resolution::InProgress;
        }
        any_failed |= status == DeliveryStatus::Failed;
    }

    match current {
        CampaignStatus::Draft | CampaignStatus::Paused | CampaignStatus::Cancelled => {
            Resolution::Untouched
        }
        _ if any_failed => Resolution::Failed,
        _ => Resolution::Completed,
    }
}
