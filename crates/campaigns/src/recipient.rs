use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use sendwave_core::{CampaignId, ContactId, DomainError, DomainResult, RecipientId};

/// Per-recipient delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "QUEUED",
            DeliveryStatus::Sending => "SENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Read => "READ",
        }
    }

    /// Not yet resolved: the aggregator must wait for these.
    pub fn is_pending(self) -> bool {
        matches!(self, DeliveryStatus::Queued | DeliveryStatus::Sending)
    }

    /// Counts against the daily quota once `sent_at` is set.
    pub fn is_delivered(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Read)
    }
}

/// A contact as provided by a contact list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: Option<ContactId>,
    #[serde(default)]
    pub name: Option<String>,
    pub phone: String,
}

impl Contact {
    pub fn new(name: Option<String>, phone: impl Into<String>) -> Self {
        Self {
            id: Some(ContactId::new()),
            name,
            phone: phone.into(),
        }
    }
}

/// Result of trying to take a recipient for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Now SENDING; carries the attempt number of this dispatch.
    Claimed { attempt: u32 },
    /// Already resolved (SENT, READ or FAILED).
    Resolved,
    /// Another worker holds a live claim.
    InFlight,
    /// A backoff is still running; an earlier duplicate job arrived.
    NotDue,
}

/// One delivery unit of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    id: RecipientId,
    campaign_id: CampaignId,
    contact_id: Option<ContactId>,
    name: Option<String>,
    phone: String,
    status: DeliveryStatus,
    attempts: u32,
    last_error: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Recipient {
    pub fn from_contact(campaign_id: CampaignId, contact: &Contact, now: DateTime<Utc>) -> Self {
        Self {
            id: RecipientId::new(),
            campaign_id,
            contact_id: contact.id,
            name: contact.name.clone(),
            phone: contact.phone.clone(),
            status: DeliveryStatus::Queued,
            attempts: 0,
            last_error: None,
            sent_at: None,
            read_at: None,
            claimed_at: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> RecipientId {
        self.id
    }

    pub fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    pub fn contact_id(&self) -> Option<ContactId> {
        self.contact_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn read_at(&self) -> Option<DateTime<Utc>> {
        self.read_at
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Earliest instant at which [`claim`](Self::claim) can succeed, or `None`
    /// once the recipient is resolved.
    pub fn claimable_at(&self, lease: Duration) -> Option<DateTime<Utc>> {
        match self.status {
            DeliveryStatus::Queued => Some(self.next_attempt_at.unwrap_or(self.updated_at)),
            DeliveryStatus::Sending => Some(self.claimed_at.map_or(self.updated_at, |at| at + lease)),
            _ => None,
        }
    }

    /// Atomic check-and-claim for dispatch.
    ///
    /// A SENDING row is only re-claimable when its claim is older than
    /// `lease` (the previous worker died mid-send). Only `Claimed` mutates.
    pub fn claim(&mut self, now: DateTime<Utc>, lease: Duration) -> ClaimOutcome {
        match self.status {
            DeliveryStatus::Queued => {
                if self.next_attempt_at.is_some_and(|at| at > now) {
                    return ClaimOutcome::NotDue;
                }
            }
            DeliveryStatus::Sending => {
                let stale = self.claimed_at.is_none_or(|at| now - at >= lease);
                if !stale {
                    return ClaimOutcome::InFlight;
                }
            }
            _ => return ClaimOutcome::Resolved,
        }

        self.status = DeliveryStatus::Sending;
        self.attempts += 1;
        self.claimed_at = Some(now);
        self.next_attempt_at = None;
        self.updated_at = now;
        ClaimOutcome::Claimed {
            attempt: self.attempts,
        }
    }

    /// SENDING -> QUEUED after a retryable failure.
    pub fn requeue(
        &mut self,
        error: impl Into<String>,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != DeliveryStatus::Sending {
            return Err(self.rejected("requeue"));
        }
        self.status = DeliveryStatus::Queued;
        self.last_error = Some(error.into());
        self.claimed_at = None;
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = now;
        Ok(())
    }

    /// SENDING -> SENT. Clears any error left by earlier attempts.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DeliveryStatus::Sending {
            return Err(self.rejected("mark sent"));
        }
        self.status = DeliveryStatus::Sent;
        self.sent_at.get_or_insert(now);
        self.last_error = None;
        self.claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// QUEUED|SENDING -> FAILED.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_pending() {
            return Err(self.rejected("fail"));
        }
        self.status = DeliveryStatus::Failed;
        self.last_error = Some(reason.into());
        self.claimed_at = None;
        self.next_attempt_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// SENT -> READ. Repeating on a READ row is a no-op.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            DeliveryStatus::Read => Ok(()),
            DeliveryStatus::Sent => {
                self.status = DeliveryStatus::Read;
                self.read_at.get_or_insert(now);
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.rejected("mark read")),
        }
    }

    fn rejected(&self, action: &str) -> DomainError {
        DomainError::conflict(format!(
            "cannot {action} recipient in status {}",
            self.status.as_str()
        ))
    }
}
