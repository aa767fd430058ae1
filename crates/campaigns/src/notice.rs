//! Notices published after campaign and recipient transitions commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sendwave_core::{CampaignId, RecipientId, UserId};
use sendwave_events::Event;

use crate::campaign::CampaignStatus;
use crate::recipient::DeliveryStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    CircuitBreaker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoticeKind {
    Created { recipients: u64 },
    Started { enqueued: u64 },
    Paused { reason: PauseReason },
    Resumed { enqueued: u64 },
    Cancelled { failed_recipients: u64 },
    RecipientUpdated {
        recipient_id: RecipientId,
        status: DeliveryStatus,
    },
    Finished { status: CampaignStatus },
}

/// Advisory campaign notice; subscribers re-read state from the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignNotice {
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub kind: NoticeKind,
    pub occurred_at: DateTime<Utc>,
}

impl CampaignNotice {
    pub fn new(campaign_id: CampaignId, user_id: UserId, kind: NoticeKind) -> Self {
        Self {
            campaign_id,
            user_id,
            kind,
            occurred_at: Utc::now(),
        }
    }
}

impl Event for CampaignNotice {
    fn event_type(&self) -> &'static str {
        match self.kind {
            NoticeKind::Created { .. } => "campaign.created",
            NoticeKind::Started { .. } => "campaign.started",
            NoticeKind::Paused { .. } => "campaign.paused",
            NoticeKind::Resumed { .. } => "campaign.resumed",
            NoticeKind::Cancelled { .. } => "campaign.cancelled",
            NoticeKind::RecipientUpdated { .. } => "campaign.recipient_updated",
            NoticeKind::Finished { .. } => "campaign.finished",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
