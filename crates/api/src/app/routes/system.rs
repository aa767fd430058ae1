use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(user): Extension<UserContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": user.user_id().to_string(),
    }))
}

pub async fn queue_stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.pipeline().queue_stats() {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", e.to_string()),
    }
}
