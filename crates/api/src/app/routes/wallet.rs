use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use sendwave_wallet::TopupRequest;

use crate::app::dto;
use crate::app::routes::common::run_blocking;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_summary))
        .route("/transactions", get(list_transactions))
        .route("/topup", post(topup))
}

pub async fn get_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    let wallet = services.wallet().clone();
    let user_id = user.user_id();
    match run_blocking(move || Ok(wallet.summary(user_id)?)).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<dto::TransactionsQuery>,
) -> axum::response::Response {
    let wallet = services.wallet().clone();
    let user_id = user.user_id();
    let limit = query.limit.clamp(1, 500);
    match run_blocking(move || Ok(wallet.transactions(user_id, limit)?)).await {
        Ok(txns) => {
            let items = txns.iter().map(dto::transaction_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(resp) => resp,
    }
}

/// POST /wallet/topup
///
/// Either `{ "plan_type": "15d" | "30d" }` or
/// `{ "points": n, "expires_in_days": 5 | 15 | 30 }`.
pub async fn topup(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(request): Json<TopupRequest>,
) -> axum::response::Response {
    let wallet = services.wallet().clone();
    let user_id = user.user_id();
    match run_blocking(move || Ok(wallet.topup(user_id, &request)?)).await {
        Ok((txn, account)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "transaction": dto::transaction_to_json(&txn),
                "account": dto::account_to_json(&account),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}
