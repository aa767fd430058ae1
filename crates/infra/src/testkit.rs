//! Shared wiring for pipeline tests: in-memory stores, a manual clock, no
//! throttle and a scripted gateway.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use sendwave_campaigns::{Campaign, CampaignDraft, CampaignNotice, Contact, Recipient};
use sendwave_core::{CampaignId, UserId};
use sendwave_events::InMemoryEventBus;
use sendwave_wallet::TxnKind;

use crate::config::DeliveryPolicy;
use crate::contacts::InMemoryContactLists;
use crate::delivery::{CampaignController, DeliveryServices, NoThrottle, RecipientProcessor};
use crate::gateway::ScriptedGateway;
use crate::jobs::{InMemoryJobQueue, JobExecutor, ManualClock};
use crate::ledger::{InMemoryPointsLedger, PointsLedger};
use crate::store::{CampaignStore, InMemoryCampaignStore};

pub(crate) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryCampaignStore>,
    pub ledger: Arc<InMemoryPointsLedger>,
    pub queue: Arc<InMemoryJobQueue>,
    pub notices: Arc<InMemoryEventBus<CampaignNotice>>,
    pub contacts: Arc<InMemoryContactLists>,
    pub gateway: Arc<ScriptedGateway>,
    pub services: DeliveryServices,
    pub controller: CampaignController,
    pub processor: Arc<RecipientProcessor>,
    pub executor: JobExecutor<Arc<InMemoryJobQueue>, Arc<RecipientProcessor>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(DeliveryPolicy::default())
    }

    pub fn with_policy(policy: DeliveryPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(noon()));
        let store = InMemoryCampaignStore::arc();
        let ledger = Arc::new(InMemoryPointsLedger::with_clock(clock.clone()));
        let queue = InMemoryJobQueue::arc(clock.clone(), policy.in_flight_lease);
        let notices = Arc::new(InMemoryEventBus::new());
        let contacts = InMemoryContactLists::arc();
        let gateway = Arc::new(ScriptedGateway::new());

        let services = DeliveryServices {
            store: store.clone(),
            ledger: ledger.clone(),
            queue: queue.clone(),
            notices: notices.clone(),
            clock: clock.clone(),
        };
        let controller = CampaignController::new(services.clone(), contacts.clone(), policy.clone());
        let processor = Arc::new(RecipientProcessor::new(
            services.clone(),
            gateway.clone(),
            Arc::new(NoThrottle),
            policy,
        ));
        let executor = JobExecutor::new(queue.clone(), processor.clone());

        Self {
            clock,
            store,
            ledger,
            queue,
            notices,
            contacts,
            gateway,
            services,
            controller,
            processor,
            executor,
        }
    }

    pub fn user_with_points(&self, points: i64) -> UserId {
        let user = UserId::new();
        self.ledger.open_account(user).unwrap();
        if points > 0 {
            self.ledger
                .credit(user, TxnKind::Topup, points, None, None)
                .unwrap();
        }
        user
    }

    /// Register a contact list and return a draft pointing at it.
    pub fn draft(&self, user: UserId, phones: &[&str]) -> CampaignDraft {
        let contacts = phones
            .iter()
            .map(|p| Contact::new(None, *p))
            .collect();
        let list_id = self.contacts.register(user, contacts).unwrap();
        CampaignDraft {
            name: "spring promo".into(),
            list_id,
            session_id: None,
            template_body: "Hi {{name}}, your code is ready".into(),
            template_variables: vec!["name".into()],
            media_url: None,
            document_url: None,
            throttle_min_seconds: 1,
            throttle_max_seconds: 1,
        }
    }

    pub fn create(&self, user: UserId, phones: &[&str]) -> Campaign {
        let draft = self.draft(user, phones);
        self.controller.create(user, &draft).unwrap()
    }

    /// Run every job that is ready now.
    pub fn drain(&self) -> usize {
        self.executor.drain().unwrap()
    }

    /// Run at most `n` ready jobs.
    pub fn run_jobs(&self, n: usize) {
        for _ in 0..n {
            assert!(self.executor.run_once().unwrap(), "expected a ready job");
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    pub fn campaign(&self, id: CampaignId) -> Campaign {
        self.store.campaign(id).unwrap().unwrap()
    }

    pub fn recipients(&self, id: CampaignId) -> Vec<Recipient> {
        self.store.recipients(id).unwrap()
    }

    pub fn recipient_by_phone(&self, id: CampaignId, phone: &str) -> Recipient {
        self.recipients(id)
            .into_iter()
            .find(|r| r.phone() == phone)
            .unwrap()
    }
}
