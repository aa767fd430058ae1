//! Wiring for a complete delivery pipeline.

use std::io;
use std::sync::Arc;

use sendwave_campaigns::CampaignNotice;
use sendwave_events::{EventBus, InMemoryEventBus};
use sendwave_wallet::WalletLimits;

use crate::config::{ConfigError, DeliveryConfig, DeliveryPolicy};
use crate::contacts::ContactListProvider;
use crate::delivery::{
    CampaignController, DeliveryError, DeliveryServices, RandomThrottle, RecipientProcessor,
    Throttle,
};
use crate::gateway::MessagingGateway;
use crate::jobs::{
    Clock, InMemoryJobQueue, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobQueue,
    QueueError, QueueStats, SystemClock,
};
use crate::ledger::{InMemoryPointsLedger, PointsLedger, WalletService};
use crate::store::{CampaignStore, InMemoryCampaignStore};

/// Swappable collaborators.
pub struct PipelineParts {
    pub store: Arc<dyn CampaignStore>,
    pub ledger: Arc<dyn PointsLedger>,
    pub contacts: Arc<dyn ContactListProvider>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub throttle: Arc<dyn Throttle>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineParts {
    /// In-memory stores, system clock, random throttle.
    pub fn in_memory(
        contacts: Arc<dyn ContactListProvider>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: InMemoryCampaignStore::arc(),
            ledger: Arc::new(InMemoryPointsLedger::with_clock(clock.clone())),
            contacts,
            gateway,
            throttle: Arc::new(RandomThrottle),
            clock,
        }
    }
}

/// Controller, wallet and worker pool sharing one set of stores and one queue.
pub struct DeliveryPipeline {
    controller: Arc<CampaignController>,
    wallet: Arc<WalletService>,
    notices: Arc<dyn EventBus<CampaignNotice>>,
    queue: Arc<dyn JobQueue>,
    processor: Arc<RecipientProcessor>,
    executor: JobExecutorConfig,
}

impl DeliveryPipeline {
    pub fn new(config: &DeliveryConfig, parts: PipelineParts) -> Result<Self, ConfigError> {
        let policy: DeliveryPolicy = config.policy()?;
        let queue: Arc<dyn JobQueue> =
            InMemoryJobQueue::arc(parts.clock.clone(), policy.in_flight_lease);
        let notices: Arc<dyn EventBus<CampaignNotice>> = Arc::new(InMemoryEventBus::new());

        let services = DeliveryServices {
            store: parts.store,
            ledger: parts.ledger.clone(),
            queue: queue.clone(),
            notices: notices.clone(),
            clock: parts.clock.clone(),
        };

        let wallet = WalletService::new(
            parts.ledger,
            WalletLimits {
                points_per_recipient: policy.points_per_recipient,
                max_daily_recipients: policy.max_daily_recipients,
                max_campaign_recipients: policy.max_campaign_recipients,
            },
            parts.clock,
        );
        let controller = CampaignController::new(services.clone(), parts.contacts, policy.clone());
        let processor = RecipientProcessor::new(services, parts.gateway, parts.throttle, policy);

        Ok(Self {
            controller: Arc::new(controller),
            wallet: Arc::new(wallet),
            notices,
            queue,
            processor: Arc::new(processor),
            executor: JobExecutorConfig::default()
                .with_workers(config.worker_count)
                .with_poll_interval(config.poll_interval()),
        })
    }

    pub fn controller(&self) -> &Arc<CampaignController> {
        &self.controller
    }

    pub fn wallet(&self) -> &Arc<WalletService> {
        &self.wallet
    }

    pub fn notices(&self) -> &Arc<dyn EventBus<CampaignNotice>> {
        &self.notices
    }

    pub fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        self.queue.stats()
    }

    /// Re-enqueue recipients of campaigns a previous process left
    /// dispatching. Call before [`spawn_workers`](Self::spawn_workers).
    pub fn recover(&self) -> Result<u64, DeliveryError> {
        self.controller.recover()
    }

    /// Start the worker pool.
    pub fn spawn_workers(&self) -> io::Result<JobExecutorHandle> {
        JobExecutor::new(self.queue.clone(), self.processor.clone()).spawn(self.executor.clone())
    }
}
