use serde::{Deserialize, Serialize};

use sendwave_core::CampaignId;

use crate::campaign::{Campaign, CampaignStatus};
use crate::recipient::{DeliveryStatus, Recipient};

/// Per-status recipient counts for one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub total: u64,
    pub queued: u64,
    pub sending: u64,
    pub sent: u64,
    pub read: u64,
    pub failed: u64,
    pub consecutive_failures: u32,
}

impl CampaignProgress {
    pub fn tally<'a>(campaign: &Campaign, recipients: impl IntoIterator<Item = &'a Recipient>) -> Self {
        let mut progress = Self {
            campaign_id: campaign.id(),
            status: campaign.status(),
            total: 0,
            queued: 0,
            sending: 0,
            sent: 0,
            read: 0,
            failed: 0,
            consecutive_failures: campaign.consecutive_failures(),
        };
        for r in recipients {
            progress.total += 1;
            match r.status() {
                DeliveryStatus::Queued => progress.queued += 1,
                DeliveryStatus::Sending => progress.sending += 1,
                DeliveryStatus::Sent => progress.sent += 1,
                DeliveryStatus::Read => progress.read += 1,
                DeliveryStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }

    /// Recipients that reached a final status.
    pub fn resolved(&self) -> u64 {
        self.sent + self.read + self.failed
    }
}
