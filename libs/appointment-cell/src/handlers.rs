// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use shared_database::AppState;
use shared_models::error::AppError;

use crate::models::{
    AppointmentResponse, BookAppointmentRequest, BookingError, ProviderAppointmentsQuery,
    ProviderAppointmentsResponse,
};
use crate::services::booking::AppointmentBookingService;

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::ProviderNotFound => AppError::NotFound("Provider not found".to_string()),
            BookingError::MalformedSlotId(msg) => AppError::BadRequest(format!("Invalid slot ID format: {}", msg)),
            BookingError::Validation(msg) => AppError::ValidationError(msg),
            BookingError::SlotAlreadyBooked => {
                AppError::Conflict("This time slot has already been booked".to_string())
            }
            err @ (BookingError::ReservationFailed | BookingError::LockTimeout) => {
                AppError::Unprocessable(err.to_string())
            }
            BookingError::Integrity(_) => {
                AppError::Unprocessable("Database integrity error: unable to create appointment".to_string())
            }
            BookingError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppState>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentResponse>), AppError> {
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service.book_appointment(request).await?;

    Ok((StatusCode::CREATED, Json(appointment)))
}

#[axum::debug_handler]
pub async fn get_provider_appointments(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<ProviderAppointmentsQuery>,
) -> Result<Json<ProviderAppointmentsResponse>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);

    let response = booking_service
        .list_provider_appointments(&provider_id, &query.start_date, &query.end_date)
        .await?;

    Ok(Json(response))
}
