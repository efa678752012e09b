// libs/appointment-cell/tests/reservation_test.rs
//
// Fault injection around the claim protocol: mocked transactions for the
// insert race and a wrapping store that fails after the slot is claimed.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;

use appointment_cell::models::{BookingError, ClaimOutcome};
use appointment_cell::services::booking::AppointmentBookingService;
use appointment_cell::services::reservation::ReservationCoordinator;
use appointment_cell::services::writer::AppointmentWriter;
use shared_database::{BookingStore, InMemoryBookingStore, StoreError, StoreTransaction};
use shared_models::{
    AppointmentRecord, NewAppointment, NewPatient, NewSlot, PatientRecord, Provider,
    ScheduledAppointment, SlotRecord,
};

use common::*;

mock! {
    pub Tx {}

    #[async_trait]
    impl StoreTransaction for Tx {
        async fn lock_slot(&mut self, slot_id: &str) -> Result<Option<SlotRecord>, StoreError>;
        async fn mark_slot_unavailable(&mut self, slot_id: &str) -> Result<(), StoreError>;
        async fn insert_slot(&mut self, slot: &NewSlot) -> Result<(), StoreError>;
        async fn find_patient_by_email(&mut self, email: &str) -> Result<Option<PatientRecord>, StoreError>;
        async fn insert_patient(&mut self, patient: &NewPatient) -> Result<PatientRecord, StoreError>;
        async fn insert_appointment(&mut self, appointment: &NewAppointment) -> Result<AppointmentRecord, StoreError>;
        async fn commit(&mut self) -> Result<(), StoreError>;
        async fn rollback(&mut self) -> Result<(), StoreError>;
    }
}

mock! {
    pub Store {}

    #[async_trait]
    impl BookingStore for Store {
        async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
        async fn list_providers(&self) -> Result<Vec<Provider>, StoreError>;
        async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StoreError>;
        async fn booked_slot_ids(
            &self,
            provider_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<HashSet<String>, StoreError>;
        async fn provider_appointments(
            &self,
            provider_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<ScheduledAppointment>, StoreError>;
    }
}

fn slot_pkey_violation() -> StoreError {
    StoreError::UniqueViolation {
        constraint: "time_slots_pkey".to_string(),
    }
}

fn slot_record(available: bool) -> SlotRecord {
    SlotRecord {
        id: slot_id_at(monday_at(10, 0)),
        provider_id: PROVIDER_ID.to_string(),
        start_time: monday_at(10, 0),
        end_time: monday_at(10, 30),
        available,
    }
}

async fn reserve(tx: &mut MockTx) -> Result<ClaimOutcome, StoreError> {
    ReservationCoordinator::new()
        .reserve(
            tx,
            PROVIDER_ID,
            &slot_id_at(monday_at(10, 0)),
            monday_at(10, 0),
            monday_at(10, 30),
        )
        .await
}

#[tokio::test]
async fn test_relock_miss_is_a_reservation_failure() {
    let mut tx = MockTx::new();
    tx.expect_lock_slot().times(2).returning(|_| Ok(None));
    tx.expect_insert_slot().times(1).returning(|_| Err(slot_pkey_violation()));
    tx.expect_mark_slot_unavailable().never();

    assert_matches!(reserve(&mut tx).await, Ok(ClaimOutcome::ReservationFailed));
}

#[tokio::test]
async fn test_relock_after_lost_race_sees_winner() {
    let mut tx = MockTx::new();
    let mut calls = 0;
    tx.expect_lock_slot().times(2).returning(move |_| {
        calls += 1;
        Ok((calls == 2).then(|| slot_record(false)))
    });
    tx.expect_insert_slot().times(1).returning(|_| Err(slot_pkey_violation()));

    assert_matches!(reserve(&mut tx).await, Ok(ClaimOutcome::AlreadyBooked));
}

#[tokio::test]
async fn test_relock_after_winner_rolled_back_claims_slot() {
    let mut tx = MockTx::new();
    let mut calls = 0;
    tx.expect_lock_slot().times(2).returning(move |_| {
        calls += 1;
        Ok((calls == 2).then(|| slot_record(true)))
    });
    tx.expect_insert_slot().times(1).returning(|_| Err(slot_pkey_violation()));
    tx.expect_mark_slot_unavailable().times(1).returning(|_| Ok(()));

    let outcome = reserve(&mut tx).await.unwrap();
    assert_matches!(outcome, ClaimOutcome::Claimed(claim) => {
        assert!(!claim.created_slot());
        assert_eq!(claim.start_time(), monday_at(10, 0));
    });
}

#[tokio::test]
async fn test_missing_slot_is_inserted_claimed() {
    let mut tx = MockTx::new();
    tx.expect_lock_slot().times(1).returning(|_| Ok(None));
    tx.expect_insert_slot()
        .times(1)
        .returning(|slot| {
            assert!(!slot.available);
            assert_eq!(slot.provider_id, PROVIDER_ID);
            Ok(())
        });
    tx.expect_mark_slot_unavailable().never();

    let outcome = reserve(&mut tx).await.unwrap();
    assert_matches!(outcome, ClaimOutcome::Claimed(claim) => {
        assert!(claim.created_slot());
        assert_eq!(claim.slot_id(), "slot-provider-1-1741600800000");
    });
}

#[tokio::test]
async fn test_unexpected_insert_error_propagates() {
    let mut tx = MockTx::new();
    tx.expect_lock_slot().times(1).returning(|_| Ok(None));
    tx.expect_insert_slot().times(1).returning(|_| {
        Err(StoreError::IntegrityViolation {
            constraint: "time_slots_provider_id_fkey".to_string(),
        })
    });

    assert_matches!(reserve(&mut tx).await, Err(StoreError::IntegrityViolation { .. }));
}

#[tokio::test]
async fn test_reservation_failure_rolls_back_and_is_retryable() {
    let mut tx = MockTx::new();
    tx.expect_lock_slot().times(2).returning(|_| Ok(None));
    tx.expect_insert_slot().times(1).returning(|_| Err(slot_pkey_violation()));
    tx.expect_rollback().times(1).returning(|| Ok(()));
    tx.expect_commit().never();
    tx.expect_insert_patient().never();
    tx.expect_insert_appointment().never();

    let mut store = MockStore::new();
    store.expect_get_provider().returning(|_| Ok(Some(provider())));
    store
        .expect_begin()
        .times(1)
        .return_once(move || Ok(Box::new(tx) as Box<dyn StoreTransaction>));

    let service = AppointmentBookingService::with_writer(Arc::new(store), AppointmentWriter::new(5));
    let result = service
        .book_appointment(booking_request(&slot_id_at(monday_at(10, 0)), "ada@example.com"))
        .await;

    assert_matches!(result, Err(BookingError::ReservationFailed));
    assert!(result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_commit_failure_is_internal() {
    let mut tx = MockTx::new();
    tx.expect_lock_slot().returning(|_| Ok(Some(slot_record(true))));
    tx.expect_mark_slot_unavailable().returning(|_| Ok(()));
    tx.expect_find_patient_by_email().returning(|_| {
        Ok(Some(PatientRecord {
            id: 7,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "555-0100".to_string(),
        }))
    });
    tx.expect_insert_appointment()
        .returning(|appointment| Ok(AppointmentRecord::from(appointment.clone())));
    tx.expect_commit()
        .times(1)
        .returning(|| Err(StoreError::Backend("connection reset".to_string())));

    let mut store = MockStore::new();
    store.expect_get_provider().returning(|_| Ok(Some(provider())));
    store
        .expect_begin()
        .return_once(move || Ok(Box::new(tx) as Box<dyn StoreTransaction>));

    let service = AppointmentBookingService::with_writer(Arc::new(store), AppointmentWriter::new(5));
    let result = service
        .book_appointment(booking_request(&slot_id_at(monday_at(10, 0)), "ada@example.com"))
        .await;

    assert_matches!(result, Err(BookingError::Internal(_)));
}

/// Delegates to the in-memory store but fails every appointment insert.
struct FailingAppointmentStore {
    inner: InMemoryBookingStore,
}

struct FailingAppointmentTx {
    inner: Box<dyn StoreTransaction>,
}

#[async_trait]
impl BookingStore for FailingAppointmentStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(FailingAppointmentTx {
            inner: self.inner.begin().await?,
        }))
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        self.inner.list_providers().await
    }

    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StoreError> {
        self.inner.get_provider(provider_id).await
    }

    async fn booked_slot_ids(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        self.inner.booked_slot_ids(provider_id, from, to).await
    }

    async fn provider_appointments(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledAppointment>, StoreError> {
        self.inner.provider_appointments(provider_id, from, to).await
    }
}

#[async_trait]
impl StoreTransaction for FailingAppointmentTx {
    async fn lock_slot(&mut self, slot_id: &str) -> Result<Option<SlotRecord>, StoreError> {
        self.inner.lock_slot(slot_id).await
    }

    async fn mark_slot_unavailable(&mut self, slot_id: &str) -> Result<(), StoreError> {
        self.inner.mark_slot_unavailable(slot_id).await
    }

    async fn insert_slot(&mut self, slot: &NewSlot) -> Result<(), StoreError> {
        self.inner.insert_slot(slot).await
    }

    async fn find_patient_by_email(&mut self, email: &str) -> Result<Option<PatientRecord>, StoreError> {
        self.inner.find_patient_by_email(email).await
    }

    async fn insert_patient(&mut self, patient: &NewPatient) -> Result<PatientRecord, StoreError> {
        self.inner.insert_patient(patient).await
    }

    async fn insert_appointment(&mut self, _: &NewAppointment) -> Result<AppointmentRecord, StoreError> {
        Err(StoreError::Backend("could not extend relation appointments".to_string()))
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn test_failed_appointment_insert_leaves_slot_available() {
    let store = memory_store(Duration::from_secs(1)).await;
    let slot_id = seed_slot(&store, monday_at(10, 0), true).await;
    let failing = FailingAppointmentStore { inner: store.clone() };

    let service = AppointmentBookingService::with_writer(Arc::new(failing), AppointmentWriter::new(5));
    let result = service.book_appointment(booking_request(&slot_id, "ada@example.com")).await;

    assert_matches!(result, Err(BookingError::Internal(_)));
    assert!(store.slot(&slot_id).await.unwrap().available);
    assert!(store.patients().await.is_empty());
    assert!(store.appointments().await.is_empty());

    // The row lock went away with the rollback.
    let healthy = AppointmentBookingService::new(&app_state(store.clone()));
    assert!(healthy
        .book_appointment(booking_request(&slot_id, "ada@example.com"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_failed_appointment_insert_discards_new_slot_row() {
    let store = memory_store(Duration::from_secs(1)).await;
    let failing = FailingAppointmentStore { inner: store.clone() };
    let slot_id = slot_id_at(monday_at(13, 0));

    let service = AppointmentBookingService::with_writer(Arc::new(failing), AppointmentWriter::new(5));
    let result = service.book_appointment(booking_request(&slot_id, "ada@example.com")).await;

    assert_matches!(result, Err(BookingError::Internal(_)));
    assert!(store.slot(&slot_id).await.is_none());
}

#[tokio::test]
async fn test_reference_collision_draws_another() {
    let store = memory_store(Duration::from_secs(1)).await;
    let draws = Arc::new(AtomicUsize::new(0));
    let writer = {
        let draws = Arc::clone(&draws);
        AppointmentWriter::with_reference_source(
            5,
            Arc::new(move |start: DateTime<Utc>| {
                // First two draws repeat the same number.
                let n = draws.fetch_add(1, Ordering::SeqCst).max(1);
                format!("REF-{}-{:03}", start.format("%Y%m%d"), n)
            }),
        )
    };
    let service = AppointmentBookingService::with_writer(Arc::new(store.clone()), writer);

    let first = service
        .book_appointment(booking_request(&slot_id_at(monday_at(9, 0)), "a@example.com"))
        .await
        .unwrap();
    let second = service
        .book_appointment(booking_request(&slot_id_at(monday_at(9, 30)), "b@example.com"))
        .await
        .unwrap();

    assert_eq!(first.reference_number, "REF-20250310-001");
    assert_eq!(second.reference_number, "REF-20250310-002");
    assert_eq!(draws.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_reference_exhaustion_is_an_integrity_error() {
    let store = memory_store(Duration::from_secs(1)).await;
    let writer = AppointmentWriter::with_reference_source(
        3,
        Arc::new(|start: DateTime<Utc>| format!("REF-{}-042", start.format("%Y%m%d"))),
    );
    let service = AppointmentBookingService::with_writer(Arc::new(store.clone()), writer);

    service
        .book_appointment(booking_request(&slot_id_at(monday_at(9, 0)), "a@example.com"))
        .await
        .unwrap();
    let second_slot = slot_id_at(monday_at(9, 30));
    let result = service
        .book_appointment(booking_request(&second_slot, "b@example.com"))
        .await;

    assert_matches!(result, Err(BookingError::Integrity(_)));
    assert!(store.slot(&second_slot).await.is_none());
    assert_eq!(store.appointments().await.len(), 1);
    assert_eq!(store.patients().await.len(), 1);
}
