//! End-to-end tests for the delivery pipeline.
//!
//! Tests: Controller → JobQueue → RecipientProcessor → Gateway → Ledger → Aggregator
//!
//! Verifies:
//! - Retry timing follows the backoff schedule on a manual clock
//! - Terminal recipient transitions converge the campaign status
//! - Ledger conservation under sequential and concurrent delivery
//! - Pause, cancel and the circuit breaker stop future dispatch

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration as StdDuration, Instant};

    use chrono::Duration;
    use proptest::prelude::*;

    use sendwave_campaigns::{
        CampaignNotice, CampaignStatus, ClaimOutcome, DeliveryStatus, NoticeKind, PauseReason,
        ThrottleWindow,
    };
    use sendwave_core::{CampaignId, DomainError};
    use sendwave_events::EventBus;
    use sendwave_wallet::TxnKind;

    use crate::config::DeliveryPolicy;
    use crate::delivery::{
        CAMPAIGN_CANCELLED, CampaignAggregator, INSUFFICIENT_POINTS, NoThrottle, ProcessOutcome,
        RecipientProcessor, Throttle,
    };
    use crate::gateway::{MessagingGateway, OutgoingMessage, SendOutcome};
    use crate::jobs::{
        Clock, EnqueueReason, InMemoryJobQueue, JobExecutor, JobExecutorConfig, JobQueue,
        ManualClock, RecipientJob,
    };
    use crate::ledger::PointsLedger;
    use crate::store::CampaignStore;
    use crate::testkit::Harness;

    fn retryable() -> SendOutcome {
        SendOutcome::Retryable("429 from upstream".into())
    }

    fn ledger_sum(h: &Harness, user: sendwave_core::UserId) -> i64 {
        h.ledger
            .transactions(user, usize::MAX)
            .unwrap()
            .iter()
            .map(|t| t.points)
            .sum()
    }

    /// Drain, then jump the clock past the longest backoff until nothing is left.
    fn run_to_quiescence(h: &Harness) {
        for _ in 0..20 {
            h.drain();
            let stats = h.queue.stats().unwrap();
            if stats.ready == 0 && stats.scheduled == 0 && stats.in_flight == 0 {
                return;
            }
            h.advance_secs(120);
        }
        panic!("queue did not settle");
    }

    #[test]
    fn retry_permanent_and_success_scenario() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+A", "+B", "+C"]);
        h.gateway.script("+A", [retryable(), retryable()]);
        h.gateway
            .script("+B", [SendOutcome::Permanent("invalid recipient".into())]);

        let started = h.controller.start(user, campaign.id()).unwrap();
        assert_eq!(started.status(), CampaignStatus::Queued);
        assert_eq!(h.queue.stats().unwrap().ready, 3);

        // First pass: A retries, B fails, C is billed.
        assert_eq!(h.drain(), 3);
        let a = h.recipient_by_phone(campaign.id(), "+A");
        assert_eq!((a.status(), a.attempts()), (DeliveryStatus::Queued, 1));
        assert_eq!(a.last_error(), Some("429 from upstream"));
        assert_eq!(
            h.recipient_by_phone(campaign.id(), "+B").status(),
            DeliveryStatus::Failed
        );
        assert_eq!(
            h.recipient_by_phone(campaign.id(), "+C").status(),
            DeliveryStatus::Sent
        );
        assert_eq!(h.ledger.balance(user).unwrap(), 8);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Sending);

        // Nothing is due before the first backoff delay elapses.
        h.advance_secs(29);
        assert_eq!(h.drain(), 0);
        h.advance_secs(1);
        assert_eq!(h.drain(), 1);
        assert_eq!(h.recipient_by_phone(campaign.id(), "+A").attempts(), 2);

        // Second retry waits schedule[1] = 60s.
        h.advance_secs(59);
        assert_eq!(h.drain(), 0);
        h.advance_secs(1);
        assert_eq!(h.drain(), 1);

        let a = h.recipient_by_phone(campaign.id(), "+A");
        assert_eq!((a.status(), a.attempts()), (DeliveryStatus::Sent, 3));
        assert_eq!(a.last_error(), None);
        assert_eq!(h.ledger.balance(user).unwrap(), 6);
        assert_eq!(ledger_sum(&h, user), 6);

        let finished = h.campaign(campaign.id());
        assert_eq!(finished.status(), CampaignStatus::Failed);
        assert_eq!(finished.completed_at(), Some(h.clock.now()));
        assert_eq!(finished.consecutive_failures(), 0);

        let deducts: Vec<_> = h
            .ledger
            .transactions(user, 10)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TxnKind::Deduct)
            .collect();
        assert_eq!(deducts.len(), 2);
        let reference = format!("campaign:{}", campaign.id());
        assert!(deducts
            .iter()
            .all(|t| t.points == -2 && t.reference.as_deref() == Some(reference.as_str())));
    }

    #[test]
    fn exhausted_backoff_fails_the_recipient() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1"]);
        h.gateway
            .script("+1", [retryable(), retryable(), retryable(), retryable()]);
        h.controller.start(user, campaign.id()).unwrap();

        let mut last_attempts = 0;
        for delay in [0, 30, 60, 120] {
            h.advance_secs(delay);
            assert_eq!(h.drain(), 1);
            let attempts = h.recipient_by_phone(campaign.id(), "+1").attempts();
            assert!(attempts > last_attempts);
            last_attempts = attempts;
        }

        let r = h.recipient_by_phone(campaign.id(), "+1");
        assert_eq!((r.status(), r.attempts()), (DeliveryStatus::Failed, 4));
        assert_eq!(h.gateway.calls_to("+1"), 4);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Failed);
        assert_eq!(h.queue.stats().unwrap().scheduled, 0);
        assert_eq!(h.ledger.balance(user).unwrap(), 10);
    }

    #[test]
    fn circuit_breaker_pauses_after_consecutive_failures() {
        let h = Harness::new();
        let user = h.user_with_points(100);
        let campaign = h.create(user, &["+1", "+2", "+3", "+4"]);
        for phone in ["+1", "+2", "+3"] {
            h.gateway
                .script(phone, [SendOutcome::Permanent("token revoked".into())]);
        }
        let notices = h.notices.subscribe();
        h.controller.start(user, campaign.id()).unwrap();

        h.drain();

        let paused = h.campaign(campaign.id());
        assert_eq!(paused.status(), CampaignStatus::Paused);
        assert_eq!(paused.consecutive_failures(), 3);
        assert_eq!(h.gateway.calls_to("+4"), 0);
        assert_eq!(
            h.recipient_by_phone(campaign.id(), "+4").status(),
            DeliveryStatus::Queued
        );
        let tripped = std::iter::from_fn(|| notices.try_recv().ok()).any(|n: CampaignNotice| {
            n.kind
                == NoticeKind::Paused {
                    reason: PauseReason::CircuitBreaker,
                }
        });
        assert!(tripped);

        // Manual resume resets the counter and finishes the campaign.
        h.controller.resume(user, campaign.id()).unwrap();
        assert_eq!(h.campaign(campaign.id()).consecutive_failures(), 0);
        run_to_quiescence(&h);

        assert_eq!(
            h.recipient_by_phone(campaign.id(), "+4").status(),
            DeliveryStatus::Sent
        );
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Failed);
        assert_eq!(h.gateway.calls_to("+4"), 1);
    }

    #[test]
    fn paused_campaign_defers_without_spending_attempts() {
        let h = Harness::new();
        let user = h.user_with_points(100);
        let campaign = h.create(user, &["+1", "+2"]);
        h.controller.start(user, campaign.id()).unwrap();
        h.controller.pause(user, campaign.id()).unwrap();

        assert_eq!(h.drain(), 2);
        assert!(h.gateway.sent().is_empty());
        assert!(h
            .recipients(campaign.id())
            .iter()
            .all(|r| r.status() == DeliveryStatus::Queued && r.attempts() == 0));
        assert_eq!(h.queue.stats().unwrap().scheduled, 2);

        // Deferred jobs poll again after pause_poll and defer again.
        h.advance_secs(15);
        assert_eq!(h.drain(), 2);
        assert!(h.gateway.sent().is_empty());

        h.controller.resume(user, campaign.id()).unwrap();
        run_to_quiescence(&h);

        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Completed);
        assert_eq!(h.gateway.sent().len(), 2);
        assert_eq!(h.ledger.balance(user).unwrap(), 96);
    }

    #[test]
    fn insufficient_points_after_send_fails_without_billing() {
        let h = Harness::new();
        let user = h.user_with_points(4);
        let campaign = h.create(user, &["+1", "+2"]);
        h.controller.start(user, campaign.id()).unwrap();
        // Balance drains elsewhere between start and delivery.
        h.ledger.debit(user, 3, "campaign:other").unwrap();

        h.drain();

        // The channel was still called: send first, bill after.
        assert_eq!(h.gateway.sent().len(), 2);
        for r in h.recipients(campaign.id()) {
            assert_eq!(r.status(), DeliveryStatus::Failed);
            assert_eq!(r.last_error(), Some(INSUFFICIENT_POINTS));
        }
        assert_eq!(h.ledger.balance(user).unwrap(), 1);
        assert_eq!(ledger_sum(&h, user), 1);
        let finished = h.campaign(campaign.id());
        assert_eq!(finished.status(), CampaignStatus::Failed);
        assert_eq!(finished.consecutive_failures(), 2);
    }

    #[test]
    fn duplicate_delivery_is_discarded_until_the_claim_goes_stale() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1"]);
        h.controller.start(user, campaign.id()).unwrap();
        let recipient = h.recipient_by_phone(campaign.id(), "+1");

        // Another worker holds the claim.
        let now = h.clock.now();
        h.store
            .modify_recipient(recipient.id(), &mut |r| {
                r.claim(now, Duration::minutes(10));
                Ok(true)
            })
            .unwrap();

        let job = RecipientJob::new(campaign.id(), recipient.id(), EnqueueReason::Start, now);
        assert_eq!(h.processor.process(&job).unwrap(), ProcessOutcome::Discarded);
        assert!(h.gateway.sent().is_empty());

        // The holder died; once the lease runs out the recipient is re-claimable.
        h.advance_secs(600);
        assert_eq!(
            h.processor.process(&job).unwrap(),
            ProcessOutcome::Sent { attempt: 2 }
        );
        assert_eq!(h.gateway.sent().len(), 1);

        // Resolved recipients ignore further duplicates.
        assert_eq!(h.processor.process(&job).unwrap(), ProcessOutcome::Discarded);
        assert_eq!(h.ledger.balance(user).unwrap(), 8);
    }

    #[test]
    fn job_for_a_cancelled_campaign_fails_its_recipient() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1"]);
        h.controller.start(user, campaign.id()).unwrap();
        let recipient = h.recipient_by_phone(campaign.id(), "+1");

        // Cancelled directly in storage, leaving the recipient pending.
        h.store
            .modify_campaign(campaign.id(), &mut |c| {
                c.cancel()?;
                Ok(true)
            })
            .unwrap();

        assert_eq!(h.drain(), 1);
        let r = h.store.recipient(recipient.id()).unwrap().unwrap();
        assert_eq!(r.status(), DeliveryStatus::Failed);
        assert_eq!(r.last_error(), Some(CAMPAIGN_CANCELLED));
        assert!(h.gateway.sent().is_empty());
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Cancelled);
    }

    /// Cancels the campaign while "on the wire", then reports success.
    struct CancellingGateway {
        store: Arc<dyn CampaignStore>,
        campaign: Mutex<Option<CampaignId>>,
    }

    impl MessagingGateway for CancellingGateway {
        fn send(&self, _message: &OutgoingMessage) -> SendOutcome {
            if let Some(id) = *self.campaign.lock().unwrap() {
                let now = chrono::Utc::now();
                self.store
                    .modify_campaign_and_recipients(id, &mut |c| c.cancel(), &mut |r| {
                        if !r.is_pending() {
                            return Ok(false);
                        }
                        r.fail("Cancelled", now)?;
                        Ok(true)
                    })
                    .unwrap();
            }
            SendOutcome::Success
        }
    }

    #[test]
    fn cancel_during_send_refunds_the_debit() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1"]);
        h.controller.start(user, campaign.id()).unwrap();

        let gateway = Arc::new(CancellingGateway {
            store: h.store.clone(),
            campaign: Mutex::new(Some(campaign.id())),
        });
        let processor = RecipientProcessor::new(
            h.services.clone(),
            gateway,
            Arc::new(NoThrottle),
            DeliveryPolicy::default(),
        );
        let job = h.queue.claim_ready().unwrap().unwrap();

        assert_eq!(processor.process(&job).unwrap(), ProcessOutcome::Discarded);

        assert_eq!(h.ledger.balance(user).unwrap(), 10);
        assert_eq!(ledger_sum(&h, user), 10);
        let kinds: Vec<TxnKind> = h
            .ledger
            .transactions(user, 10)
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(kinds, vec![TxnKind::Refund, TxnKind::Deduct, TxnKind::Topup]);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Cancelled);
    }

    #[test]
    fn cancel_during_free_send_needs_no_refund() {
        let policy = DeliveryPolicy {
            points_per_recipient: 0,
            ..DeliveryPolicy::default()
        };
        let h = Harness::with_policy(policy.clone());
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1"]);
        h.controller.start(user, campaign.id()).unwrap();

        let gateway = Arc::new(CancellingGateway {
            store: h.store.clone(),
            campaign: Mutex::new(Some(campaign.id())),
        });
        let processor =
            RecipientProcessor::new(h.services.clone(), gateway, Arc::new(NoThrottle), policy);
        let job = h.queue.claim_ready().unwrap().unwrap();

        assert_eq!(processor.process(&job).unwrap(), ProcessOutcome::Discarded);

        assert_eq!(h.ledger.balance(user).unwrap(), 10);
        let kinds: Vec<TxnKind> = h
            .ledger
            .transactions(user, 10)
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(kinds, vec![TxnKind::Deduct, TxnKind::Topup]);
    }

    /// Spends the throttle on the manual clock and lets a second worker poll
    /// the queue while the first one is still "asleep".
    struct ClockThrottle {
        clock: Arc<ManualClock>,
        secs: i64,
        rival: JobExecutor<Arc<InMemoryJobQueue>, Arc<RecipientProcessor>>,
        rival_ran: Mutex<Vec<bool>>,
    }

    impl Throttle for ClockThrottle {
        fn pause(&self, _window: ThrottleWindow) {
            self.clock.advance(Duration::seconds(self.secs));
            let ran = self.rival.run_once().unwrap();
            self.rival_ran.lock().unwrap().push(ran);
        }
    }

    #[test]
    fn longest_allowed_throttle_keeps_a_single_send() {
        let h = Harness::new();
        let policy = DeliveryPolicy::default();
        let longest = policy.max_throttle_seconds();
        let user = h.user_with_points(10);
        let mut draft = h.draft(user, &["+1"]);
        draft.throttle_min_seconds = longest as u32;
        draft.throttle_max_seconds = longest as u32;
        let campaign = h.controller.create(user, &draft).unwrap();
        h.controller.start(user, campaign.id()).unwrap();

        // Worst case: the whole throttle plus a gateway call that times out.
        let throttle = Arc::new(ClockThrottle {
            clock: h.clock.clone(),
            secs: (longest + policy.gateway_timeout.as_secs()) as i64,
            rival: JobExecutor::new(h.queue.clone(), h.processor.clone()),
            rival_ran: Mutex::new(Vec::new()),
        });
        let processor = RecipientProcessor::new(
            h.services.clone(),
            h.gateway.clone(),
            throttle.clone(),
            policy,
        );
        let job = h.queue.claim_ready().unwrap().unwrap();

        assert_eq!(
            processor.process(&job).unwrap(),
            ProcessOutcome::Sent { attempt: 1 }
        );
        h.queue.ack(job.id).unwrap();

        assert_eq!(*throttle.rival_ran.lock().unwrap(), vec![false]);
        assert_eq!(h.gateway.calls_to("+1"), 1);
        assert_eq!(h.recipient_by_phone(campaign.id(), "+1").attempts(), 1);
        assert_eq!(h.ledger.balance(user).unwrap(), 8);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Completed);
    }

    #[test]
    fn resume_after_breaker_on_last_recipient_settles_the_campaign() {
        let h = Harness::new();
        let user = h.user_with_points(100);
        let campaign = h.create(user, &["+1", "+2", "+3"]);
        for phone in ["+1", "+2", "+3"] {
            h.gateway
                .script(phone, [SendOutcome::Permanent("token revoked".into())]);
        }
        h.controller.start(user, campaign.id()).unwrap();
        h.drain();
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Paused);

        let notices = h.notices.subscribe();
        let resumed = h.controller.resume(user, campaign.id()).unwrap();

        assert_eq!(resumed.status(), CampaignStatus::Failed);
        assert!(resumed.completed_at().is_some());
        assert_eq!(h.campaign(campaign.id()), resumed);
        assert_eq!(h.queue.stats().unwrap().ready, 0);
        let finished = std::iter::from_fn(|| notices.try_recv().ok()).any(|n: CampaignNotice| {
            n.kind
                == NoticeKind::Finished {
                    status: CampaignStatus::Failed,
                }
        });
        assert!(finished);
    }

    #[test]
    fn recover_rebuilds_lost_jobs_without_stealing_live_claims() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1", "+2", "+3"]);
        h.controller.start(user, campaign.id()).unwrap();

        // The queue dies with the process; the rows survive.
        while let Some(job) = h.queue.claim_ready().unwrap() {
            h.queue.ack(job.id).unwrap();
        }
        let held = h.recipient_by_phone(campaign.id(), "+3");
        let lease = Duration::from_std(h.controller.policy().in_flight_lease).unwrap();
        let now = h.clock.now();
        h.store
            .modify_recipient(held.id(), &mut |r| Ok(r.claim(now, lease) != ClaimOutcome::InFlight))
            .unwrap();

        assert_eq!(h.controller.recover().unwrap(), 3);
        let stats = h.queue.stats().unwrap();
        assert_eq!((stats.ready, stats.scheduled), (2, 1));

        assert_eq!(h.drain(), 2);
        assert_eq!(h.gateway.calls_to("+3"), 0);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Sending);

        h.advance_secs(lease.num_seconds());
        assert_eq!(h.drain(), 1);
        let taken_over = h.recipient_by_phone(campaign.id(), "+3");
        assert_eq!((taken_over.status(), taken_over.attempts()), (DeliveryStatus::Sent, 2));
        assert_eq!(h.gateway.calls_to("+3"), 1);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Completed);

        // Finished campaigns are not swept again.
        assert_eq!(h.controller.recover().unwrap(), 0);
    }

    #[test]
    fn aggregator_is_idempotent_once_finished() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1", "+2"]);
        h.controller.start(user, campaign.id()).unwrap();
        h.drain();
        let finished = h.campaign(campaign.id());
        assert_eq!(finished.status(), CampaignStatus::Completed);

        let aggregator = CampaignAggregator::new(h.services.clone());
        h.advance_secs(3600);
        for _ in 0..3 {
            assert_eq!(aggregator.recompute(campaign.id()).unwrap(), None);
        }
        assert_eq!(h.campaign(campaign.id()), finished);
    }

    #[test]
    fn aggregator_leaves_in_progress_and_paused_campaigns_alone() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let campaign = h.create(user, &["+1"]);
        h.controller.start(user, campaign.id()).unwrap();
        let aggregator = CampaignAggregator::new(h.services.clone());

        assert_eq!(aggregator.recompute(campaign.id()).unwrap(), None);
        h.controller.pause(user, campaign.id()).unwrap();
        assert_eq!(aggregator.recompute(campaign.id()).unwrap(), None);
        assert_eq!(h.campaign(campaign.id()).status(), CampaignStatus::Paused);
    }

    #[test]
    fn notices_follow_the_lifecycle() {
        let h = Harness::new();
        let user = h.user_with_points(10);
        let notices = h.notices.subscribe();
        let campaign = h.create(user, &["+1"]);
        h.controller.start(user, campaign.id()).unwrap();
        h.drain();

        let kinds: Vec<NoticeKind> = std::iter::from_fn(|| notices.try_recv().ok())
            .map(|n| n.kind)
            .collect();
        let recipient_id = h.recipient_by_phone(campaign.id(), "+1").id();
        assert_eq!(
            kinds,
            vec![
                NoticeKind::Created { recipients: 1 },
                NoticeKind::Started { enqueued: 1 },
                NoticeKind::RecipientUpdated {
                    recipient_id,
                    status: DeliveryStatus::Sending
                },
                NoticeKind::RecipientUpdated {
                    recipient_id,
                    status: DeliveryStatus::Sent
                },
                NoticeKind::Finished {
                    status: CampaignStatus::Completed
                },
            ]
        );
    }

    #[test]
    fn start_failure_leaves_nothing_behind() {
        let h = Harness::with_policy(DeliveryPolicy {
            max_daily_recipients: 2,
            ..DeliveryPolicy::default()
        });
        let user = h.user_with_points(100);
        let campaign = h.create(user, &["+1", "+2", "+3"]);

        let err = h.controller.start(user, campaign.id()).unwrap_err();

        assert!(matches!(
            err,
            crate::delivery::DeliveryError::Domain(DomainError::QuotaExceeded { .. })
        ));
        assert_eq!(h.queue.stats().unwrap().enqueued_total, 0);
        assert!(h
            .recipients(campaign.id())
            .iter()
            .all(|r| r.status() == DeliveryStatus::Queued && r.attempts() == 0));
        assert_eq!(h.drain(), 0);
    }

    #[test]
    fn worker_pool_delivers_each_recipient_once() {
        let h = Harness::new();
        let user = h.user_with_points(1_000);
        let phones: Vec<String> = (0..40).map(|i| format!("+1555{i:04}")).collect();
        let phone_refs: Vec<&str> = phones.iter().map(String::as_str).collect();
        let campaign = h.create(user, &phone_refs);
        h.controller.start(user, campaign.id()).unwrap();
        // A second sweep puts a duplicate job on the queue for every recipient.
        h.controller.pause(user, campaign.id()).unwrap();
        h.controller.resume(user, campaign.id()).unwrap();

        let handle = JobExecutor::new(h.queue.clone(), h.processor.clone())
            .spawn(
                JobExecutorConfig::default()
                    .with_workers(4)
                    .with_poll_interval(StdDuration::from_millis(5)),
            )
            .unwrap();

        let deadline = Instant::now() + StdDuration::from_secs(10);
        while h.campaign(campaign.id()).status() != CampaignStatus::Completed {
            assert!(Instant::now() < deadline, "campaign did not complete");
            thread::sleep(StdDuration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(h.gateway.sent().len(), 40);
        assert_eq!(h.ledger.balance(user).unwrap(), 1_000 - 80);
        assert_eq!(ledger_sum(&h, user), 1_000 - 80);
        assert!(h
            .recipients(campaign.id())
            .iter()
            .all(|r| r.status() == DeliveryStatus::Sent && r.attempts() == 1));
    }

    #[derive(Debug, Clone)]
    enum Script {
        Succeed,
        Reject,
        RetryThenSucceed(usize),
        AlwaysRetry,
    }

    fn script_strategy() -> impl Strategy<Value = Script> {
        prop_oneof![
            Just(Script::Succeed),
            Just(Script::Reject),
            (1usize..=3).prop_map(Script::RetryThenSucceed),
            Just(Script::AlwaysRetry),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: whatever the gateway does, the campaign converges to a
        /// terminal status, every recipient resolves, attempts never exceed
        /// the schedule plus one, and exactly one debit exists per SENT recipient.
        #[test]
        fn pipeline_converges_and_conserves_points(
            scripts in prop::collection::vec(script_strategy(), 1..8)
        ) {
            let h = Harness::with_policy(DeliveryPolicy {
                failure_threshold: u32::MAX,
                ..DeliveryPolicy::default()
            });
            let user = h.user_with_points(100);
            let phones: Vec<String> = (0..scripts.len()).map(|i| format!("+1{i}")).collect();
            for (phone, script) in phones.iter().zip(&scripts) {
                match script {
                    Script::Succeed => {}
                    Script::Reject => h.gateway.script(phone.as_str(), [SendOutcome::Permanent("no".into())]),
                    Script::RetryThenSucceed(n) => h.gateway.script(phone.as_str(), vec![retryable(); *n]),
                    Script::AlwaysRetry => h.gateway.script(phone.as_str(), vec![retryable(); 10]),
                }
            }
            let phone_refs: Vec<&str> = phones.iter().map(String::as_str).collect();
            let campaign = h.create(user, &phone_refs);
            h.controller.start(user, campaign.id()).unwrap();

            run_to_quiescence(&h);

            let recipients = h.recipients(campaign.id());
            let sent = recipients.iter().filter(|r| r.status() == DeliveryStatus::Sent).count() as i64;
            prop_assert!(recipients.iter().all(|r| !r.is_pending()));
            prop_assert!(recipients.iter().all(|r| r.attempts() <= 4));
            prop_assert!(h.campaign(campaign.id()).status().is_terminal());
            prop_assert_eq!(h.ledger.balance(user).unwrap(), 100 - 2 * sent);
            prop_assert_eq!(ledger_sum(&h, user), 100 - 2 * sent);

            for (r, script) in phones.iter().map(|p| h.recipient_by_phone(campaign.id(), p)).zip(&scripts) {
                let expected = match script {
                    Script::Succeed | Script::RetryThenSucceed(_) => DeliveryStatus::Sent,
                    Script::Reject | Script::AlwaysRetry => DeliveryStatus::Failed,
                };
                prop_assert_eq!(r.status(), expected);
            }
        }
    }
}
