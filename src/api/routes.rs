use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{client_info, decompose_id, generate_id, health_check, AppState};
use super::resource::ApiResource;

pub fn create_api_router(state: Arc<AppState>) -> Router {
    let ids = ApiResource::<Arc<AppState>>::new("ids")
        .store(generate_id)
        .show(decompose_id)
        .into_router();

    Router::new()
        .route("/health", get(health_check))
        .route("/client", get(client_info))
        .merge(ids)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
