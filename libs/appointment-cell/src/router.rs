// libs/appointment-cell/src/router.rs
use axum::{
    routing::{get, post},
    Router,
};

use shared_database::AppState;

use crate::handlers;

pub fn appointment_routes(state: AppState) -> Router {
    Router::new()
        .route("/appointments", post(handlers::book_appointment))
        .route("/providers/{provider_id}/appointments", get(handlers::get_provider_appointments))
        .with_state(state)
}
