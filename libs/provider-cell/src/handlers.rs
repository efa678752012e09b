// libs/provider-cell/src/handlers.rs
use axum::{
    extract::{Query, State},
    Json,
};
use tracing::error;

use shared_database::{AppState, StoreError};
use shared_models::error::AppError;

use crate::models::{AvailabilityError, AvailabilityQuery, AvailabilityResponse, ProviderProfile};
use crate::services::{AvailabilityService, ProviderService};

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::ProviderNotFound => AppError::NotFound(err.to_string()),
            AvailabilityError::InvalidDate
            | AvailabilityError::InvalidRange
            | AvailabilityError::RangeTooLong(_) => {
                AppError::BadRequest(err.to_string())
            }
            AvailabilityError::Store(e) => store_failure(e),
        }
    }
}

fn store_failure(err: StoreError) -> AppError {
    error!("Store error while reading providers: {}", err);
    AppError::Database(err.to_string())
}

#[axum::debug_handler]
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProviderProfile>>, AppError> {
    let provider_service = ProviderService::new(&state);

    let providers = provider_service.list_providers().await.map_err(store_failure)?;

    Ok(Json(providers))
}

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let availability_service = AvailabilityService::new(&state);

    let response = availability_service
        .get_availability(&query.provider_id, &query.start_date, &query.end_date)
        .await?;

    Ok(Json(response))
}
