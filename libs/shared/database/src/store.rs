use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use shared_models::{
    AppointmentRecord, NewAppointment, NewPatient, NewSlot, PatientRecord, Provider,
    ScheduledAppointment, SlotRecord,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Integrity constraint violated: {constraint}")]
    IntegrityViolation { constraint: String },

    #[error("Timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Database error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// A single open database transaction.
///
/// Implementations give `lock_slot` row-level exclusive lock semantics: a
/// returned row stays locked until `commit` or `rollback`, and a concurrent
/// caller blocks for at most the store's lock timeout before failing with
/// [`StoreError::LockTimeout`]. A `lock_slot` miss locks nothing.
///
/// Every `insert_*` runs as its own sub-operation: when it fails with
/// [`StoreError::UniqueViolation`] only that insert is undone and the
/// transaction stays usable. Dropping a transaction without committing rolls
/// it back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn lock_slot(&mut self, slot_id: &str) -> Result<Option<SlotRecord>, StoreError>;

    async fn mark_slot_unavailable(&mut self, slot_id: &str) -> Result<(), StoreError>;

    async fn insert_slot(&mut self, slot: &NewSlot) -> Result<(), StoreError>;

    async fn find_patient_by_email(&mut self, email: &str) -> Result<Option<PatientRecord>, StoreError>;

    async fn insert_patient(&mut self, patient: &NewPatient) -> Result<PatientRecord, StoreError>;

    async fn insert_appointment(
        &mut self,
        appointment: &NewAppointment,
    ) -> Result<AppointmentRecord, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Shared relational store behind the booking service. Reads outside
/// `begin` are point-in-time and take no locks.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError>;

    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StoreError>;

    /// Ids of the provider's claimed slots starting in `[from, to)`.
    async fn booked_slot_ids(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError>;

    /// The provider's appointments whose slot starts in `[from, to)`, ordered by start.
    async fn provider_appointments(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledAppointment>, StoreError>;
}
