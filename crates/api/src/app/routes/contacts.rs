use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use sendwave_infra::delivery::DeliveryError;

use crate::app::dto;
use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().route("/", post(register_list))
}

pub async fn register_list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::RegisterContactListRequest>,
) -> axum::response::Response {
    let contacts = body.into_contacts();
    let count = contacts.len();
    let lists = services.contacts().clone();
    let user_id = user.user_id();
    match run_blocking(move || lists.register(user_id, contacts).map_err(DeliveryError::from)).await {
        Ok(list_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": list_id.to_string(),
                "contacts": count,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}
