use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::appointment_routes;
use provider_cell::provider_routes;
use shared_database::AppState;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(provider_routes(state.clone()))
        .merge(appointment_routes(state));

    Router::new()
        .route("/", get(banner))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .nest("/api", api)
}

async fn banner() -> Json<Value> {
    Json(json!({
        "message": "Clinic booking API is running!",
        "endpoints": [
            "GET /api/providers",
            "GET /api/availability?provider_id=&start_date=&end_date=",
            "POST /api/appointments",
            "GET /api/providers/{provider_id}/appointments?start_date=&end_date="
        ]
    }))
}
