use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use sendwave_campaigns::{Campaign, CampaignDraft};
use sendwave_core::{CampaignId, UserId};
use sendwave_infra::delivery::{CampaignController, DeliveryError};

use crate::app::routes::common::run_blocking;
use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_campaign).get(list_campaigns))
        .route("/:id", get(get_campaign))
        .route("/:id/start", post(start_campaign))
        .route("/:id/pause", post(pause_campaign))
        .route("/:id/resume", post(resume_campaign))
        .route("/:id/cancel", post(cancel_campaign))
        .route("/:id/recipients", get(list_recipients))
        .route("/:id/progress", get(get_progress))
        .route("/:id/export", get(export_csv))
        .route("/:id/stream", get(stream_progress))
}

pub async fn create_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(draft): Json<CampaignDraft>,
) -> axum::response::Response {
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || controller.create(user_id, &draft)).await {
        Ok(campaign) => (StatusCode::CREATED, Json(dto::campaign_to_json(&campaign))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_campaigns(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || controller.campaigns_for_user(user_id)).await {
        Ok(campaigns) => {
            let items = campaigns.iter().map(dto::campaign_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn get_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, user, id, CampaignController::campaign).await
}

pub async fn start_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, user, id, CampaignController::start).await
}

pub async fn pause_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, user, id, CampaignController::pause).await
}

pub async fn resume_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, user, id, CampaignController::resume).await
}

pub async fn cancel_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, user, id, CampaignController::cancel).await
}

pub async fn list_recipients(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id, "campaign") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || controller.recipients(user_id, campaign_id)).await {
        Ok(recipients) => {
            let items = recipients.iter().map(dto::recipient_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn get_progress(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id, "campaign") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || controller.progress(user_id, campaign_id)).await {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn export_csv(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id, "campaign") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || controller.export_csv(user_id, campaign_id)).await {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"campaign-{campaign_id}.csv\""),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(resp) => resp,
    }
}

/// GET /campaigns/:id/stream
///
/// Server-Sent Events: one `progress` event per change, closed once the
/// campaign is terminal.
pub async fn stream_progress(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id, "campaign") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let controller = services.controller().clone();
    let user_id = user.user_id();
    if let Err(resp) = run_blocking(move || controller.campaign(user_id, campaign_id)).await {
        return resp;
    }
    services::campaign_progress_stream(services, user_id, campaign_id).into_response()
}

async fn transition(
    services: Arc<AppServices>,
    user: UserContext,
    id: String,
    op: fn(&CampaignController, UserId, CampaignId) -> Result<Campaign, DeliveryError>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id, "campaign") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let controller = services.controller().clone();
    let user_id = user.user_id();
    match run_blocking(move || op(&controller, user_id, campaign_id)).await {
        Ok(campaign) => (StatusCode::OK, Json(dto::campaign_to_json(&campaign))).into_response(),
        Err(resp) => resp,
    }
}
