use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;

use sendwave_campaigns::CampaignProgress;
use sendwave_core::{CampaignId, UserId};
use sendwave_events::EventBus;
use sendwave_infra::{
    config::{ConfigError, DeliveryConfig},
    contacts::InMemoryContactLists,
    delivery::{CampaignController, DeliveryError},
    gateway::{GatewayError, build_gateway},
    jobs::JobExecutorHandle,
    ledger::WalletService,
    pipeline::{DeliveryPipeline, PipelineParts},
};

/// Startup failure while wiring services.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[cfg(feature = "postgres")]
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[cfg(feature = "postgres")]
    #[error("ledger schema: {0}")]
    Schema(#[from] sendwave_infra::ledger::LedgerError),
    #[cfg(feature = "postgres")]
    #[error("campaign schema: {0}")]
    StoreSchema(#[from] sendwave_infra::store::StoreError),
    #[error("recovery: {0}")]
    Recovery(#[from] DeliveryError),
    #[error("worker pool: {0}")]
    Workers(#[from] std::io::Error),
}

/// Everything the handlers need.
pub struct AppServices {
    pipeline: DeliveryPipeline,
    contacts: Arc<InMemoryContactLists>,
}

impl AppServices {
    pub fn new(pipeline: DeliveryPipeline, contacts: Arc<InMemoryContactLists>) -> Self {
        Self { pipeline, contacts }
    }

    pub fn controller(&self) -> &Arc<CampaignController> {
        self.pipeline.controller()
    }

    pub fn wallet(&self) -> &Arc<WalletService> {
        self.pipeline.wallet()
    }

    pub fn contacts(&self) -> &Arc<InMemoryContactLists> {
        &self.contacts
    }

    pub fn pipeline(&self) -> &DeliveryPipeline {
        &self.pipeline
    }

    /// Re-enqueue work left by a previous process; returns the job count.
    pub fn recover(&self) -> Result<u64, StartupError> {
        Ok(self.pipeline.recover()?)
    }

    pub fn spawn_workers(&self) -> Result<JobExecutorHandle, StartupError> {
        Ok(self.pipeline.spawn_workers()?)
    }
}

/// In-memory stores with the configured gateway.
///
/// Must run outside an async context: the HTTP gateways own blocking clients.
pub fn build_in_memory_services(config: &DeliveryConfig) -> Result<AppServices, StartupError> {
    let contacts = InMemoryContactLists::arc();
    let gateway = build_gateway(config)?;
    let parts = PipelineParts::in_memory(contacts.clone(), gateway);
    Ok(AppServices::new(DeliveryPipeline::new(config, parts)?, contacts))
}

/// Same as [`build_in_memory_services`] but with campaigns, recipients and the
/// points ledger in Postgres. The job queue stays in memory; call
/// [`AppServices::recover`] before spawning workers to rebuild it.
#[cfg(feature = "postgres")]
pub fn build_persistent_services(
    config: &DeliveryConfig,
    database_url: &str,
    runtime: &tokio::runtime::Runtime,
) -> Result<AppServices, StartupError> {
    use sendwave_infra::ledger::PostgresPointsLedger;
    use sendwave_infra::store::PostgresCampaignStore;

    let pool = runtime.block_on(sqlx::PgPool::connect(database_url))?;
    let ledger = PostgresPointsLedger::new(pool.clone(), runtime.handle().clone());
    runtime.block_on(ledger.ensure_schema())?;
    let store = PostgresCampaignStore::new(pool, runtime.handle().clone());
    runtime.block_on(store.ensure_schema())?;

    let contacts = InMemoryContactLists::arc();
    let gateway = build_gateway(config)?;
    let mut parts = PipelineParts::in_memory(contacts.clone(), gateway);
    parts.ledger = Arc::new(ledger);
    parts.store = Arc::new(store);
    Ok(AppServices::new(DeliveryPipeline::new(config, parts)?, contacts))
}

/// Progress stream for one campaign.
///
/// Sends a snapshot on connect and after every notice for the campaign, then
/// ends once the campaign reaches a terminal status. Ownership is checked by
/// the caller before streaming.
pub fn campaign_progress_stream(
    services: Arc<AppServices>,
    user_id: UserId,
    campaign_id: CampaignId,
) -> Sse<UnboundedReceiverStream<Result<SseEvent, Infallible>>> {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    tokio::task::spawn_blocking(move || {
        // Subscribe before the first snapshot so no transition slips between them.
        let subscription = services.pipeline.notices().subscribe();
        let controller = services.controller();

        let send_snapshot = |progress: &CampaignProgress| -> bool {
            let data = match serde_json::to_string(progress) {
                Ok(s) => s,
                Err(_) => return true,
            };
            tx.send(Ok(SseEvent::default().event("progress").data(data)))
                .is_ok()
        };

        let mut done = match controller.progress(user_id, campaign_id) {
            Ok(progress) => !send_snapshot(&progress) || progress.status.is_terminal(),
            Err(e) => {
                tracing::warn!(campaign_id = %campaign_id, error = %e, "progress snapshot failed");
                true
            }
        };

        while !done {
            match subscription.recv_timeout(Duration::from_millis(1000)) {
                Ok(notice) if notice.campaign_id == campaign_id => {
                    match controller.progress(user_id, campaign_id) {
                        Ok(progress) => {
                            done = !send_snapshot(&progress) || progress.status.is_terminal();
                        }
                        Err(e) => {
                            tracing::warn!(campaign_id = %campaign_id, error = %e, "progress snapshot failed");
                            done = true;
                        }
                    }
                }
                Ok(_) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => done = tx.is_closed(),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => done = true,
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
