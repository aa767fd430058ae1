use axum::http::StatusCode;

use sendwave_infra::delivery::DeliveryError;

use crate::app::errors;

/// Run a synchronous service call on the blocking pool.
///
/// Delivery components are synchronous (and the Postgres ledger blocks on its
/// own runtime handle), so handlers never call them on an executor thread.
pub async fn run_blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> Result<T, DeliveryError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(errors::delivery_error_to_response(e)),
        Err(e) => {
            tracing::error!(error = %e, "blocking task failed");
            Err(errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "request task failed",
            ))
        }
    }
}
