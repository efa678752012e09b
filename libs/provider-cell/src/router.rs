// libs/provider-cell/src/router.rs
use axum::{routing::get, Router};

use shared_database::AppState;

use crate::handlers;

pub fn provider_routes(state: AppState) -> Router {
    Router::new()
        .route("/providers", get(handlers::list_providers))
        .route("/availability", get(handlers::get_availability))
        .with_state(state)
}
