use std::sync::Arc;

use anyhow::Context;

use sendwave_api::app::{self, services};
use sendwave_infra::config::DeliveryConfig;

fn main() -> anyhow::Result<()> {
    sendwave_observability::init();

    let config = DeliveryConfig::load().context("loading configuration")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    // Services are wired outside the runtime: the HTTP gateways own blocking clients.
    let services = build_services(&config, &runtime)?;
    let services = Arc::new(services);
    let recovered = services.recover().context("recovering dispatching campaigns")?;
    if recovered > 0 {
        tracing::info!(jobs = recovered, "re-enqueued pending recipients");
    }
    let workers = services.spawn_workers().context("starting worker pool")?;
    tracing::info!(
        workers = config.worker_count,
        gateway = ?config.gateway_mode,
        "delivery workers started"
    );

    let app = app::build_app(services);
    let result = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        tracing::info!("listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            })
            .await
            .context("server error")
    });

    workers.shutdown();
    result
}

#[cfg(feature = "postgres")]
fn build_services(
    config: &DeliveryConfig,
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<services::AppServices> {
    match config.database_url.as_deref() {
        Some(url) => Ok(services::build_persistent_services(config, url, runtime)?),
        None => {
            tracing::warn!("DATABASE_URL not set; campaigns and points ledger are in memory");
            Ok(services::build_in_memory_services(config)?)
        }
    }
}

#[cfg(not(feature = "postgres"))]
fn build_services(
    config: &DeliveryConfig,
    _runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<services::AppServices> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL set but postgres feature not enabled, falling back to in-memory");
    }
    Ok(services::build_in_memory_services(config)?)
}
