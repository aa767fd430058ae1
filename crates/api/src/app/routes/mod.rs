use axum::{routing::get, Router};

pub mod campaigns;
pub mod common;
pub mod contacts;
pub mod recipients;
pub mod system;
pub mod wallet;

/// Router for all user-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/queue", get(system::queue_stats))
        .nest("/campaigns", campaigns::router())
        .nest("/recipients", recipients::router())
        .nest("/contact-lists", contacts::router())
        .nest("/wallet", wallet::router())
}
