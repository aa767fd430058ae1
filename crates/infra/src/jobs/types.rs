//! Core job types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sendwave_core::{CampaignId, RecipientId};

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a job was put on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EnqueueReason {
    /// Initial sweep from `start`.
    Start,
    /// Sweep from `resume`.
    Resume,
    /// Backoff re-enqueue after a retryable failure.
    Retry { attempt: u32 },
    /// Campaign was paused when the job ran; poll again later.
    PauseDeferral,
    /// Startup sweep over campaigns left QUEUED or SENDING by a previous run.
    Recovery,
}

/// One unit of queued work: "try to deliver to this recipient".
///
/// Jobs carry references only; the processor reloads recipient and campaign
/// state, so a stale or duplicated job is always safe to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientJob {
    pub id: JobId,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub reason: EnqueueReason,
    pub enqueued_at: DateTime<Utc>,
}

impl RecipientJob {
    pub fn new(
        campaign_id: CampaignId,
        recipient_id: RecipientId,
        reason: EnqueueReason,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            campaign_id,
            recipient_id,
            reason,
            enqueued_at: now,
        }
    }

    /// Follow-up job for the same recipient.
    pub fn follow_up(&self, reason: EnqueueReason, now: DateTime<Utc>) -> Self {
        Self::new(self.campaign_id, self.recipient_id, reason, now)
    }
}

/// Outcome reported by a job handler to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Handled (including no-op discards); acknowledge the job.
    Done,
    /// Infrastructure failure; leave the job unacknowledged so the queue
    /// redelivers it after the visibility timeout.
    Abandon(String),
}
