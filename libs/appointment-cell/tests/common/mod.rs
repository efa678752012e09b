// libs/appointment-cell/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use appointment_cell::models::{BookAppointmentRequest, PatientDetails};
use shared_config::AppConfig;
use shared_database::{AppState, BookingStore, InMemoryBookingStore};
use shared_models::{NewSlot, Provider, SlotId, SLOT_DURATION_MINUTES};

pub const PROVIDER_ID: &str = "provider-1";

pub fn provider() -> Provider {
    Provider {
        id: PROVIDER_ID.to_string(),
        name: "Dr. Sarah Chen".to_string(),
        specialty: "Family Medicine".to_string(),
        bio: Some("Board-certified family physician".to_string()),
    }
}

pub async fn memory_store(lock_timeout: Duration) -> InMemoryBookingStore {
    InMemoryBookingStore::with_providers(lock_timeout, vec![provider()]).await
}

pub fn app_state(store: InMemoryBookingStore) -> AppState {
    AppState::new(AppConfig::default(), Arc::new(store))
}

/// Monday 2025-03-10 at `hour:minute` UTC.
pub fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
}

pub fn slot_id_at(start: DateTime<Utc>) -> String {
    SlotId::derive(PROVIDER_ID, start).to_string()
}

pub fn patient(first_name: &str, email: &str) -> PatientDetails {
    PatientDetails {
        first_name: first_name.to_string(),
        last_name: "Lovelace".to_string(),
        email: email.to_string(),
        phone: "555-0100".to_string(),
    }
}

pub fn booking_request(slot_id: &str, email: &str) -> BookAppointmentRequest {
    BookAppointmentRequest {
        provider_id: PROVIDER_ID.to_string(),
        slot_id: slot_id.to_string(),
        patient: patient("Ada", email),
        reason: "Annual checkup".to_string(),
    }
}

/// Commit a slot row directly, as an earlier booking or an admin tool would.
pub async fn seed_slot(store: &InMemoryBookingStore, start: DateTime<Utc>, available: bool) -> String {
    let id = slot_id_at(start);
    let mut tx = store.begin().await.unwrap();
    tx.insert_slot(&NewSlot {
        id: id.clone(),
        provider_id: PROVIDER_ID.to_string(),
        start_time: start,
        end_time: start + chrono::Duration::minutes(SLOT_DURATION_MINUTES),
        available,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();
    id
}
