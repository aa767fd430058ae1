//! Campaign lifecycle: create, start, pause, resume, cancel, plus the
//! read-side queries the API needs.
//!
//! `start` runs every guard (status, subscription, recipients, balance, daily
//! cap) before the status transition, and enqueues only after the transition
//! has committed. A failed guard therefore leaves the campaign untouched and
//! the queue empty.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, instrument};

use sendwave_campaigns::{
    Campaign, CampaignDraft, CampaignProgress, CampaignStatus, DeliveryStatus, NoticeKind,
    PauseReason, Recipient, export_csv,
};
use sendwave_core::{CampaignId, DomainError, RecipientId, UserId};

use super::{CANCELLED, CampaignAggregator, DeliveryError, DeliveryServices};
use crate::config::DeliveryPolicy;
use crate::contacts::ContactListProvider;
use crate::jobs::{EnqueueReason, RecipientJob};

/// Lifecycle controller.
pub struct CampaignController {
    services: DeliveryServices,
    contacts: Arc<dyn ContactListProvider>,
    aggregator: CampaignAggregator,
    policy: DeliveryPolicy,
}

impl CampaignController {
    pub fn new(
        services: DeliveryServices,
        contacts: Arc<dyn ContactListProvider>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            aggregator: CampaignAggregator::new(services.clone()),
            services,
            contacts,
            policy,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Create a DRAFT campaign with one QUEUED recipient per contact.
    #[instrument(skip(self, draft), fields(user_id = %user_id, list_id = %draft.list_id))]
    pub fn create(&self, user_id: UserId, draft: &CampaignDraft) -> Result<Campaign, DeliveryError> {
        let max_throttle = self.policy.max_throttle_seconds();
        if u64::from(draft.throttle_max_seconds) > max_throttle {
            return Err(DomainError::validation(format!(
                "throttle_max_seconds must be <= {max_throttle}"
            ))
            .into());
        }

        let contacts = self.contacts.contacts(user_id, draft.list_id)?;
        let (campaign, recipients) = Campaign::create(
            user_id,
            draft,
            &contacts,
            self.policy.max_campaign_recipients,
            self.services.clock.now(),
        )?;
        self.services.store.insert(campaign.clone(), recipients)?;

        info!(campaign_id = %campaign.id(), recipients = campaign.recipient_count(), "campaign created");
        self.services.notify(
            campaign.id(),
            user_id,
            NoticeKind::Created {
                recipients: campaign.recipient_count(),
            },
        );
        Ok(campaign)
    }

    /// DRAFT|PAUSED -> QUEUED, then enqueue every QUEUED recipient.
    #[instrument(skip(self), fields(user_id = %user_id, campaign_id = %campaign_id))]
    pub fn start(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, DeliveryError> {
        let now = self.services.clock.now();
        let campaign = self.owned(user_id, campaign_id)?;

        if !matches!(campaign.status(), CampaignStatus::Draft | CampaignStatus::Paused) {
            return Err(DomainError::conflict(format!(
                "cannot start campaign in status {}",
                campaign.status().as_str()
            ))
            .into());
        }

        let account = self.services.ledger.account(user_id)?;
        if account.as_ref().is_some_and(|a| a.is_plan_expired(now)) {
            return Err(DomainError::SubscriptionExpired.into());
        }

        let count = campaign.recipient_count();
        if count == 0 {
            return Err(DomainError::validation("no recipients to send").into());
        }

        let required = i64::try_from(count)
            .unwrap_or(i64::MAX)
            .saturating_mul(self.policy.points_per_recipient);
        let balance = account.as_ref().map_or(0, |a| a.balance());
        if balance < required {
            return Err(DomainError::InsufficientBalance {
                required,
                available: balance,
            }
            .into());
        }

        let sent_today = self
            .services
            .store
            .delivered_since(user_id, start_of_day(now))?;
        if sent_today + count > self.policy.max_daily_recipients {
            return Err(DomainError::QuotaExceeded {
                sent_today,
                requested: count,
                cap: self.policy.max_daily_recipients,
            }
            .into());
        }

        let (campaign, _) = self.services.store.modify_campaign(campaign_id, &mut |c| {
            c.start(now)?;
            Ok(true)
        })?;

        let enqueued = self.enqueue_queued(&campaign, EnqueueReason::Start)?;
        info!(enqueued, "campaign started");
        self.services
            .notify(campaign_id, user_id, NoticeKind::Started { enqueued });
        self.settle_if_idle(campaign, enqueued)
    }

    /// QUEUED|SENDING -> PAUSED. In-flight jobs finish; later ones defer.
    #[instrument(skip(self), fields(user_id = %user_id, campaign_id = %campaign_id))]
    pub fn pause(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, DeliveryError> {
        self.owned(user_id, campaign_id)?;
        let (campaign, _) = self.services.store.modify_campaign(campaign_id, &mut |c| {
            c.pause()?;
            Ok(true)
        })?;

        info!("campaign paused");
        self.services.notify(
            campaign_id,
            user_id,
            NoticeKind::Paused {
                reason: PauseReason::Manual,
            },
        );
        Ok(campaign)
    }

    /// PAUSED -> QUEUED with the breaker reset, then a fresh enqueue sweep.
    #[instrument(skip(self), fields(user_id = %user_id, campaign_id = %campaign_id))]
    pub fn resume(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, DeliveryError> {
        self.owned(user_id, campaign_id)?;
        let (campaign, _) = self.services.store.modify_campaign(campaign_id, &mut |c| {
            c.resume()?;
            Ok(true)
        })?;

        let enqueued = self.enqueue_queued(&campaign, EnqueueReason::Resume)?;
        info!(enqueued, "campaign resumed");
        self.services
            .notify(campaign_id, user_id, NoticeKind::Resumed { enqueued });
        self.settle_if_idle(campaign, enqueued)
    }

    /// Any non-terminal status -> CANCELLED; pending recipients fail.
    #[instrument(skip(self), fields(user_id = %user_id, campaign_id = %campaign_id))]
    pub fn cancel(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, DeliveryError> {
        self.owned(user_id, campaign_id)?;
        let now = self.services.clock.now();
        let (campaign, failed) = self.services.store.modify_campaign_and_recipients(
            campaign_id,
            &mut |c| c.cancel(),
            &mut |r| {
                if !r.is_pending() {
                    return Ok(false);
                }
                r.fail(CANCELLED, now)?;
                Ok(true)
            },
        )?;

        info!(failed_recipients = failed.len(), "campaign cancelled");
        for r in &failed {
            self.services.notify(
                campaign_id,
                user_id,
                NoticeKind::RecipientUpdated {
                    recipient_id: r.id(),
                    status: DeliveryStatus::Failed,
                },
            );
        }
        self.services.notify(
            campaign_id,
            user_id,
            NoticeKind::Cancelled {
                failed_recipients: failed.len() as u64,
            },
        );
        Ok(campaign)
    }

    /// Re-enqueue every pending recipient of every dispatching campaign.
    ///
    /// Jobs live only as long as the process, but campaign rows may outlive
    /// it. Run once at startup before workers spawn. QUEUED recipients become
    /// ready when their backoff ends; SENDING ones when their claim goes stale,
    /// so a claim still held elsewhere is not sent twice. Returns the number of
    /// jobs enqueued.
    #[instrument(skip(self))]
    pub fn recover(&self) -> Result<u64, DeliveryError> {
        let now = self.services.clock.now();
        let lease = TimeDelta::from_std(self.policy.in_flight_lease).unwrap_or(TimeDelta::MAX);
        let mut enqueued = 0;
        for campaign in self.services.store.dispatching_campaigns()? {
            for r in self.services.store.recipients(campaign.id())? {
                let Some(at) = r.claimable_at(lease) else {
                    continue;
                };
                let job = RecipientJob::new(campaign.id(), r.id(), EnqueueReason::Recovery, now);
                match (at - now).to_std() {
                    Ok(delay) if !delay.is_zero() => self.services.queue.enqueue_after(job, delay)?,
                    _ => self.services.queue.enqueue(job)?,
                };
                enqueued += 1;
            }
        }
        info!(enqueued, "recovered dispatching campaigns");
        Ok(enqueued)
    }

    /// Read receipt: SENT -> READ.
    #[instrument(skip(self), fields(user_id = %user_id, recipient_id = %recipient_id))]
    pub fn mark_read(&self, user_id: UserId, recipient_id: RecipientId) -> Result<Recipient, DeliveryError> {
        let recipient = self
            .services
            .store
            .recipient(recipient_id)?
            .ok_or(DeliveryError::RecipientNotFound(recipient_id))?;
        let campaign_id = recipient.campaign_id();
        if self.owned(user_id, campaign_id).is_err() {
            return Err(DeliveryError::RecipientNotFound(recipient_id));
        }

        let now = self.services.clock.now();
        let (recipient, changed) = self.services.store.modify_recipient(recipient_id, &mut |r| {
            let was_sent = r.status() == DeliveryStatus::Sent;
            r.mark_read(now)?;
            Ok(was_sent)
        })?;

        if changed {
            self.services.notify(
                campaign_id,
                user_id,
                NoticeKind::RecipientUpdated {
                    recipient_id,
                    status: DeliveryStatus::Read,
                },
            );
        }
        Ok(recipient)
    }

    pub fn campaign(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, DeliveryError> {
        self.owned(user_id, campaign_id)
    }

    /// Newest first.
    pub fn campaigns_for_user(&self, user_id: UserId) -> Result<Vec<Campaign>, DeliveryError> {
        Ok(self.services.store.campaigns_for_user(user_id)?)
    }

    pub fn recipients(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Vec<Recipient>, DeliveryError> {
        self.owned(user_id, campaign_id)?;
        Ok(self.services.store.recipients(campaign_id)?)
    }

    pub fn progress(&self, user_id: UserId, campaign_id: CampaignId) -> Result<CampaignProgress, DeliveryError> {
        let campaign = self.owned(user_id, campaign_id)?;
        let recipients = self.services.store.recipients(campaign_id)?;
        Ok(CampaignProgress::tally(&campaign, &recipients))
    }

    pub fn export_csv(&self, user_id: UserId, campaign_id: CampaignId) -> Result<String, DeliveryError> {
        self.owned(user_id, campaign_id)?;
        let recipients = self.services.store.recipients(campaign_id)?;
        Ok(export_csv(&recipients)?)
    }

    /// Load a campaign, hiding other users' campaigns as not found.
    fn owned(&self, user_id: UserId, campaign_id: CampaignId) -> Result<Campaign, DeliveryError> {
        match self.services.store.campaign(campaign_id)? {
            Some(c) if c.user_id() == user_id => Ok(c),
            _ => Err(DeliveryError::CampaignNotFound(campaign_id)),
        }
    }

    /// With no job in the queue nothing else will run the aggregator, e.g. when
    /// the breaker tripped on the last pending recipient.
    fn settle_if_idle(&self, campaign: Campaign, enqueued: u64) -> Result<Campaign, DeliveryError> {
        if enqueued > 0 || self.aggregator.recompute(campaign.id())?.is_none() {
            return Ok(campaign);
        }
        self.services
            .store
            .campaign(campaign.id())?
            .ok_or(DeliveryError::CampaignNotFound(campaign.id()))
    }

    fn enqueue_queued(&self, campaign: &Campaign, reason: EnqueueReason) -> Result<u64, DeliveryError> {
        let now = self.services.clock.now();
        let mut enqueued = 0;
        for r in self.services.store.recipients(campaign.id())? {
            if r.status() != DeliveryStatus::Queued {
                continue;
            }
            self.services
                .queue
                .enqueue(RecipientJob::new(campaign.id(), r.id(), reason, now))?;
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}
