use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use sendwave_core::RecipientId;

use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().route("/:id/read", post(mark_read))
}

/// POST /recipients/:id/read
///
/// Read receipt: SENT -> READ. Repeats are no-ops.
pub async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let recipient_id: RecipientId = match errors::parse_id(&id, "recipient") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || controller.mark_read(user_id, recipient_id)).await {
        Ok(recipient) => (StatusCode::OK, Json(dto::recipient_to_json(&recipient))).into_response(),
        Err(resp) => resp,
    }
}
