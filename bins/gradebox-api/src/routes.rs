use crate::handlers;
use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/assignments/:id", get(handlers::get_assignment))
        .route("/assignments/:id/draft", post(handlers::save_draft))
        .route("/assignments/:id/precheck", post(handlers::pre_check))
        .route("/assignments/:id/submit", post(handlers::submit))
        .route(
            "/assignments/:id/submission/:user_id",
            get(handlers::get_submission),
        )
        .route("/session/restart", post(handlers::restart_session))
}
