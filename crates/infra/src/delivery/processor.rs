//! Per-job delivery logic.
//!
//! ## Algorithm
//!
//! 1. Discard the job unless its recipient is still QUEUED/SENDING
//! 2. Campaign CANCELLED: fail the recipient. PAUSED: defer the job
//! 3. Claim the recipient (QUEUED -> SENDING, attempts + 1) and commit
//! 4. Render, throttle, call the gateway
//! 5. Success: debit, mark SENT. Retryable: backoff or exhaust.
//!    Permanent: fail. Every terminal transition runs the aggregator
//!
//! The claim in step 3 is a compare-and-set on the persisted row, so two
//! deliveries of the same job never both reach the gateway while the claim is
//! fresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, error, info, instrument, warn};

use sendwave_campaigns::{
    Campaign, CampaignStatus, ClaimOutcome, DeliveryStatus, NoticeKind, PauseReason, Recipient,
    render,
};
use sendwave_core::RecipientId;
use sendwave_wallet::TxnKind;

use super::{
    CAMPAIGN_CANCELLED, CampaignAggregator, DeliveryError, DeliveryServices, INSUFFICIENT_POINTS,
    Throttle,
};
use crate::config::DeliveryPolicy;
use crate::gateway::{MessagingGateway, OutgoingMessage, SendOutcome};
use crate::jobs::{BackoffDecision, EnqueueReason, JobHandler, JobResult, RecipientJob};
use crate::ledger::LedgerError;

/// What one job invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Duplicate, stale or not-yet-due job; nothing changed.
    Discarded,
    /// Campaign paused; job re-enqueued after the pause poll delay.
    Deferred,
    /// Campaign cancelled; recipient failed without a send.
    Cancelled,
    Sent { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Failed { reason: String },
}

/// Handles recipient jobs.
pub struct RecipientProcessor {
    services: DeliveryServices,
    gateway: Arc<dyn MessagingGateway>,
    throttle: Arc<dyn Throttle>,
    aggregator: CampaignAggregator,
    policy: DeliveryPolicy,
}

impl RecipientProcessor {
    pub fn new(
        services: DeliveryServices,
        gateway: Arc<dyn MessagingGateway>,
        throttle: Arc<dyn Throttle>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            aggregator: CampaignAggregator::new(services.clone()),
            services,
            gateway,
            throttle,
            policy,
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, recipient_id = %job.recipient_id, campaign_id = %job.campaign_id))]
    pub fn process(&self, job: &RecipientJob) -> Result<ProcessOutcome, DeliveryError> {
        let store = &self.services.store;

        let Some(recipient) = store.recipient(job.recipient_id)? else {
            debug!("recipient gone, discarding job");
            return Ok(ProcessOutcome::Discarded);
        };
        if !recipient.is_pending() {
            debug!(status = recipient.status().as_str(), "recipient resolved, discarding job");
            return Ok(ProcessOutcome::Discarded);
        }

        let Some(campaign) = store.campaign(recipient.campaign_id())? else {
            warn!("campaign missing for pending recipient, discarding job");
            return Ok(ProcessOutcome::Discarded);
        };

        match campaign.status() {
            CampaignStatus::Cancelled => return self.cancel_recipient(&campaign, recipient.id()),
            CampaignStatus::Paused => {
                let now = self.services.clock.now();
                self.services.queue.enqueue_after(
                    job.follow_up(EnqueueReason::PauseDeferral, now),
                    self.policy.pause_poll,
                )?;
                debug!(delay_secs = self.policy.pause_poll.as_secs(), "campaign paused, job deferred");
                return Ok(ProcessOutcome::Deferred);
            }
            CampaignStatus::Queued | CampaignStatus::Sending => {}
            CampaignStatus::Draft | CampaignStatus::Completed | CampaignStatus::Failed => {
                debug!(status = campaign.status().as_str(), "campaign not dispatching, discarding job");
                return Ok(ProcessOutcome::Discarded);
            }
        }

        let Some((recipient, attempt)) = self.claim(recipient.id())? else {
            return Ok(ProcessOutcome::Discarded);
        };

        let (campaign, promoted) = store.modify_campaign(campaign.id(), &mut |c| Ok(c.mark_sending()))?;
        if promoted {
            info!(campaign_id = %campaign.id(), "campaign sending");
        }
        self.notify_recipient(&campaign, recipient.id(), DeliveryStatus::Sending);

        let template = campaign.template();
        let message = OutgoingMessage {
            phone: recipient.phone().to_string(),
            body: render(&template.body, &recipient),
            media_url: template.media_url.clone(),
            document_url: template.document_url.clone(),
        };

        self.throttle.pause(campaign.throttle());

        match self.gateway.send(&message) {
            SendOutcome::Success => self.on_success(&campaign, &recipient, attempt),
            SendOutcome::Retryable(reason) => {
                self.on_retryable(job, &campaign, recipient.id(), attempt, reason)
            }
            SendOutcome::Permanent(reason) => {
                error!(attempt, error = %reason, "gateway rejected message");
                self.fail(&campaign, recipient.id(), reason)
            }
        }
    }

    /// Compare-and-set QUEUED/stale SENDING -> SENDING.
    fn claim(&self, id: RecipientId) -> Result<Option<(Recipient, u32)>, DeliveryError> {
        let now = self.services.clock.now();
        let lease = TimeDelta::from_std(self.policy.in_flight_lease).unwrap_or(TimeDelta::MAX);
        let mut outcome = ClaimOutcome::Resolved;

        let (recipient, _) = self.services.store.modify_recipient(id, &mut |r| {
            outcome = r.claim(now, lease);
            Ok(matches!(outcome, ClaimOutcome::Claimed { .. }))
        })?;

        match outcome {
            ClaimOutcome::Claimed { attempt } => {
                debug!(attempt, "recipient claimed");
                Ok(Some((recipient, attempt)))
            }
            other => {
                debug!(outcome = ?other, "claim refused, discarding job");
                Ok(None)
            }
        }
    }

    fn on_success(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        attempt: u32,
    ) -> Result<ProcessOutcome, DeliveryError> {
        let points = self.policy.points_per_recipient;
        let reference = format!("campaign:{}", campaign.id());

        // The message is already out; a failed debit means it goes unbilled.
        match self.services.ledger.debit(campaign.user_id(), points, &reference) {
            Ok(txn) => debug!(points, balance_after = txn.balance_after, "recipient billed"),
            Err(LedgerError::InsufficientBalance { balance, required }) => {
                warn!(balance, required, "delivered but balance too low, recipient failed");
                return self.fail(campaign, recipient.id(), INSUFFICIENT_POINTS.to_string());
            }
            Err(LedgerError::AccountNotFound(_)) => {
                warn!("delivered but owner has no points account, recipient failed");
                return self.fail(campaign, recipient.id(), INSUFFICIENT_POINTS.to_string());
            }
            Err(e) => return Err(e.into()),
        }

        let now = self.services.clock.now();
        let marked = self.services.store.modify_recipient(recipient.id(), &mut |r| {
            if r.status() != DeliveryStatus::Sending {
                return Ok(false);
            }
            r.mark_sent(now)?;
            Ok(true)
        });

        match marked {
            Ok((_, true)) => {}
            Ok((r, false)) => {
                // Cancelled while the gateway call was in flight: undo the charge.
                warn!(status = r.status().as_str(), "recipient resolved during send, refunding");
                if points > 0 {
                    self.services.ledger.credit(
                        campaign.user_id(),
                        TxnKind::Refund,
                        points,
                        Some(reference),
                        None,
                    )?;
                }
                return Ok(ProcessOutcome::Discarded);
            }
            Err(e) => return Err(e.into()),
        }

        self.services.store.modify_campaign(campaign.id(), &mut |c| {
            let had_failures = c.consecutive_failures() != 0;
            c.record_success();
            Ok(had_failures)
        })?;

        info!(attempt, "recipient sent");
        self.notify_recipient(campaign, recipient.id(), DeliveryStatus::Sent);
        self.aggregator.recompute(campaign.id())?;
        Ok(ProcessOutcome::Sent { attempt })
    }

    fn on_retryable(
        &self,
        job: &RecipientJob,
        campaign: &Campaign,
        recipient_id: RecipientId,
        attempt: u32,
        reason: String,
    ) -> Result<ProcessOutcome, DeliveryError> {
        let delay = match self.policy.backoff.decide(attempt) {
            BackoffDecision::RetryAfter(delay) => delay,
            BackoffDecision::Exhausted => {
                warn!(attempt, error = %reason, "retries exhausted");
                return self.fail(campaign, recipient_id, reason);
            }
        };

        let now = self.services.clock.now();
        let next_attempt_at = now + TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::days(365));
        let (_, requeued) = self.services.store.modify_recipient(recipient_id, &mut |r| {
            if r.status() != DeliveryStatus::Sending {
                return Ok(false);
            }
            r.requeue(reason.as_str(), next_attempt_at, now)?;
            Ok(true)
        })?;
        if !requeued {
            return Ok(ProcessOutcome::Discarded);
        }

        self.services
            .queue
            .enqueue_after(job.follow_up(EnqueueReason::Retry { attempt }, now), delay)?;

        warn!(attempt, delay_secs = delay.as_secs(), error = %reason, "retryable failure, retry scheduled");
        self.notify_recipient(campaign, recipient_id, DeliveryStatus::Queued);
        Ok(ProcessOutcome::Retrying { attempt, delay })
    }

    /// Terminal failure: fail the recipient, feed the circuit breaker, recompute.
    fn fail(
        &self,
        campaign: &Campaign,
        recipient_id: RecipientId,
        reason: String,
    ) -> Result<ProcessOutcome, DeliveryError> {
        let now = self.services.clock.now();
        let (_, failed) = self.services.store.modify_recipient(recipient_id, &mut |r| {
            if !r.is_pending() {
                return Ok(false);
            }
            r.fail(reason.as_str(), now)?;
            Ok(true)
        })?;
        if !failed {
            return Ok(ProcessOutcome::Discarded);
        }
        self.notify_recipient(campaign, recipient_id, DeliveryStatus::Failed);

        let threshold = self.policy.failure_threshold;
        let mut tripped = false;
        let (updated, _) = self.services.store.modify_campaign(campaign.id(), &mut |c| {
            tripped = c.record_failure(threshold);
            Ok(true)
        })?;

        if tripped {
            warn!(
                campaign_id = %campaign.id(),
                consecutive_failures = updated.consecutive_failures(),
                "circuit breaker tripped, campaign paused"
            );
            self.services.notify(
                campaign.id(),
                campaign.user_id(),
                NoticeKind::Paused {
                    reason: PauseReason::CircuitBreaker,
                },
            );
        }

        self.aggregator.recompute(campaign.id())?;
        Ok(ProcessOutcome::Failed { reason })
    }

    fn cancel_recipient(
        &self,
        campaign: &Campaign,
        recipient_id: RecipientId,
    ) -> Result<ProcessOutcome, DeliveryError> {
        let now = self.services.clock.now();
        let (_, failed) = self.services.store.modify_recipient(recipient_id, &mut |r| {
            if !r.is_pending() {
                return Ok(false);
            }
            r.fail(CAMPAIGN_CANCELLED, now)?;
            Ok(true)
        })?;
        if !failed {
            return Ok(ProcessOutcome::Discarded);
        }
        debug!("campaign cancelled, recipient failed");
        self.notify_recipient(campaign, recipient_id, DeliveryStatus::Failed);
        Ok(ProcessOutcome::Cancelled)
    }

    fn notify_recipient(&self, campaign: &Campaign, recipient_id: RecipientId, status: DeliveryStatus) {
        self.services.notify(
            campaign.id(),
            campaign.user_id(),
            NoticeKind::RecipientUpdated {
                recipient_id,
                status,
            },
        );
    }
}

impl JobHandler for RecipientProcessor {
    fn handle(&self, job: &RecipientJob) -> JobResult {
        match self.process(job) {
            Ok(_) => JobResult::Done,
            Err(e) => {
                error!(job_id = %job.id, recipient_id = %job.recipient_id, error = %e, "job failed");
                JobResult::Abandon(e.to_string())
            }
        }
    }
}
