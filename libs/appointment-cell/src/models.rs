// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::{AppointmentRecord, AppointmentStatus, PatientRecord, Provider};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub provider_id: String,
    pub slot_id: String,
    pub patient: PatientDetails,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ProviderAppointmentsQuery {
    pub start_date: String,
    pub end_date: String,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: String,
    pub name: String,
    pub specialty: String,
}

impl From<&Provider> for ProviderSummary {
    fn from(provider: &Provider) -> Self {
        Self {
            id: provider.id.clone(),
            name: provider.name.clone(),
            specialty: provider.specialty.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub reference_number: String,
    pub status: AppointmentStatus,
    pub slot: AppointmentSlot,
    pub provider: ProviderSummary,
    pub patient: PatientDetails,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAppointmentEntry {
    pub id: Uuid,
    pub reference_number: String,
    pub patient_name: String,
    pub patient_email: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAppointmentsResponse {
    pub provider_id: String,
    pub appointments: Vec<ProviderAppointmentEntry>,
}

// ==============================================================================
// RESERVATION MODELS
// ==============================================================================

/// Proof that the current transaction holds a slot exclusively. Only the
/// reservation coordinator can mint one.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotClaim {
    slot_id: String,
    provider_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    created: bool,
}

impl SlotClaim {
    pub(crate) fn new(
        slot_id: &str,
        provider_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        created: bool,
    ) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            provider_id: provider_id.to_string(),
            start_time,
            end_time,
            created,
        }
    }

    pub fn slot_id(&self) -> &str {
        &self.slot_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// True when this transaction materialized the slot row.
    pub fn created_slot(&self) -> bool {
        self.created
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(SlotClaim),
    AlreadyBooked,
    ReservationFailed,
}

/// Steps of the claim protocol. `Relocking` is entered at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPhase {
    Locking,
    Found,
    NotFound,
    Inserting,
    Inserted,
    RaceLost,
    Relocking,
    Claimed,
    Rejected,
}

impl fmt::Display for ReservationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReservationPhase::Locking => "locking",
            ReservationPhase::Found => "found",
            ReservationPhase::NotFound => "not_found",
            ReservationPhase::Inserting => "inserting",
            ReservationPhase::Inserted => "inserted",
            ReservationPhase::RaceLost => "race_lost",
            ReservationPhase::Relocking => "relocking",
            ReservationPhase::Claimed => "claimed",
            ReservationPhase::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Everything the writer persisted for one claim.
#[derive(Debug, Clone, PartialEq)]
pub struct BookedAppointment {
    pub appointment: AppointmentRecord,
    pub patient: PatientRecord,
    pub slot: AppointmentSlot,
}

// ==============================================================================
// ERROR MODELS
// ==============================================================================

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Provider not found")]
    ProviderNotFound,

    #[error("Invalid slot ID format: {0}")]
    MalformedSlotId(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("This time slot has already been booked")]
    SlotAlreadyBooked,

    #[error("Unable to reserve the time slot, please retry")]
    ReservationFailed,

    #[error("Timed out waiting for the time slot, please retry")]
    LockTimeout,

    #[error("Database integrity error: {0}")]
    Integrity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::ReservationFailed | BookingError::LockTimeout)
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { .. } => BookingError::LockTimeout,
            StoreError::UniqueViolation { constraint } | StoreError::IntegrityViolation { constraint } => {
                BookingError::Integrity(constraint)
            }
            other => BookingError::Internal(other.to_string()),
        }
    }
}
