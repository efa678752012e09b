// libs/appointment-cell/tests/handlers_test.rs

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::appointment_routes;
use appointment_cell::models::BookingError;
use shared_database::AppState;
use shared_models::error::AppError;

use common::*;

async fn state() -> (AppState, shared_database::InMemoryBookingStore) {
    let store = memory_store(Duration::from_secs(1)).await;
    (app_state(store.clone()), store)
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = appointment_routes(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_booking(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/appointments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn booking_body(slot_id: &str, email: &str) -> Value {
    json!({
        "provider_id": PROVIDER_ID,
        "slot_id": slot_id,
        "patient": {
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": email,
            "phone": "555-0100"
        },
        "reason": "Persistent cough"
    })
}

#[tokio::test]
async fn test_book_appointment_created() {
    let (state, _) = state().await;

    let (status, body) = send(&state, post_booking(booking_body(&slot_id_at(monday_at(10, 0)), "ada@example.com"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["slot"]["start_time"], "2025-03-10T10:00:00Z");
    assert_eq!(body["slot"]["end_time"], "2025-03-10T10:30:00Z");
    assert_eq!(body["provider"]["specialty"], "Family Medicine");
    assert_eq!(body["patient"]["email"], "ada@example.com");
    assert!(body["reference_number"].as_str().unwrap().starts_with("REF-20250310-"));
    assert!(body["id"].as_str().is_some());
}

#[tokio::test]
async fn test_book_taken_slot_conflict() {
    let (state, _) = state().await;
    let slot_id = slot_id_at(monday_at(10, 0));

    let (first, _) = send(&state, post_booking(booking_body(&slot_id, "ada@example.com"))).await;
    let (second, body) = send(&state, post_booking(booking_body(&slot_id, "grace@example.com"))).await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["error"], "This time slot has already been booked");
}

#[tokio::test]
async fn test_book_unknown_provider_not_found() {
    let (state, _) = state().await;
    let mut body = booking_body(&slot_id_at(monday_at(10, 0)), "ada@example.com");
    body["provider_id"] = json!("provider-404");

    let (status, body) = send(&state, post_booking(body)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Provider not found");
}

#[tokio::test]
async fn test_book_bad_input_is_bad_request() {
    let (state, store) = state().await;

    let (status, body) = send(&state, post_booking(booking_body("10am-monday", "ada@example.com"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid slot ID format"));

    let (status, _) = send(&state, post_booking(booking_body(&slot_id_at(monday_at(10, 0)), "not-an-email"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(store.slot_count().await, 0);
}

#[tokio::test]
async fn test_provider_appointments_listing() {
    let (state, _) = state().await;
    send(&state, post_booking(booking_body(&slot_id_at(monday_at(11, 0)), "ada@example.com"))).await;

    let request = Request::builder()
        .uri(format!("/providers/{}/appointments?start_date=2025-03-10&end_date=2025-03-14", PROVIDER_ID))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider_id"], PROVIDER_ID);
    let appointments = body["appointments"].as_array().unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0]["patient_name"], "Ada Lovelace");
    assert_eq!(appointments[0]["start_time"], "2025-03-10T11:00:00Z");
}

#[test]
fn test_booking_error_status_mapping() {
    let cases = [
        (BookingError::ProviderNotFound, StatusCode::NOT_FOUND),
        (BookingError::MalformedSlotId("x".into()), StatusCode::BAD_REQUEST),
        (BookingError::Validation("x".into()), StatusCode::BAD_REQUEST),
        (BookingError::SlotAlreadyBooked, StatusCode::CONFLICT),
        (BookingError::ReservationFailed, StatusCode::UNPROCESSABLE_ENTITY),
        (BookingError::LockTimeout, StatusCode::UNPROCESSABLE_ENTITY),
        (BookingError::Integrity("appointments_reference_number_key".into()), StatusCode::UNPROCESSABLE_ENTITY),
        (BookingError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (err, expected) in cases {
        assert_eq!(AppError::from(err).status_code(), expected);
    }
}

#[tokio::test]
async fn test_provider_appointments_out_of_range_end_date() {
    let (state, _) = state().await;

    let request = Request::builder()
        .uri(format!(
            "/providers/{}/appointments?start_date=2025-03-10&end_date=%2B262142-12-31",
            PROVIDER_ID
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "end_date is out of range");
}
