// libs/appointment-cell/src/services/writer.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{StoreError, StoreTransaction};
use shared_models::{AppointmentStatus, NewAppointment, NewPatient, PatientRecord};

use crate::models::{AppointmentSlot, BookedAppointment, BookingError, PatientDetails, SlotClaim};

pub type ReferenceSource = Arc<dyn Fn(DateTime<Utc>) -> String + Send + Sync>;

/// `REF-<YYYYMMDD of slot start>-<3-digit random>`.
pub fn random_reference(slot_start: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("REF-{}-{:03}", slot_start.format("%Y%m%d"), suffix)
}

/// Persists the patient and appointment for a claimed slot, inside the
/// claiming transaction.
#[derive(Clone)]
pub struct AppointmentWriter {
    reference_attempts: u32,
    reference_source: ReferenceSource,
}

impl AppointmentWriter {
    pub fn new(reference_attempts: u32) -> Self {
        Self::with_reference_source(reference_attempts, Arc::new(random_reference))
    }

    pub fn with_reference_source(reference_attempts: u32, reference_source: ReferenceSource) -> Self {
        Self {
            reference_attempts: reference_attempts.max(1),
            reference_source,
        }
    }

    pub async fn write(
        &self,
        tx: &mut dyn StoreTransaction,
        claim: &SlotClaim,
        patient: &PatientDetails,
        reason: &str,
    ) -> Result<BookedAppointment, BookingError> {
        let patient_record = self.resolve_patient(tx, patient).await?;

        let mut attempt = 0;
        let appointment = loop {
            attempt += 1;
            let new_appointment = NewAppointment {
                id: Uuid::new_v4(),
                reference_number: (self.reference_source)(claim.start_time()),
                slot_id: claim.slot_id().to_string(),
                provider_id: claim.provider_id().to_string(),
                patient_id: patient_record.id,
                reason: reason.to_string(),
                status: AppointmentStatus::Confirmed,
                created_at: Utc::now(),
            };

            match tx.insert_appointment(&new_appointment).await {
                Ok(record) => break record,
                Err(StoreError::UniqueViolation { constraint })
                    if constraint.contains("reference_number") && attempt < self.reference_attempts =>
                {
                    warn!(
                        "Reference number {} already taken (attempt {}/{}), drawing another",
                        new_appointment.reference_number, attempt, self.reference_attempts
                    );
                }
                Err(StoreError::UniqueViolation { constraint }) if constraint.contains("reference_number") => {
                    return Err(BookingError::Integrity(format!(
                        "no free reference number after {} attempts",
                        self.reference_attempts
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        };

        info!(
            "Appointment {} ({}) written for slot {}",
            appointment.id, appointment.reference_number, appointment.slot_id
        );

        Ok(BookedAppointment {
            appointment,
            patient: patient_record,
            slot: AppointmentSlot {
                start_time: claim.start_time(),
                end_time: claim.end_time(),
            },
        })
    }

    /// Existing patients are matched by email and kept as first seen.
    async fn resolve_patient(
        &self,
        tx: &mut dyn StoreTransaction,
        patient: &PatientDetails,
    ) -> Result<PatientRecord, BookingError> {
        if let Some(existing) = tx.find_patient_by_email(&patient.email).await? {
            debug!("Reusing patient {} for {}", existing.id, existing.email);
            return Ok(existing);
        }

        let new_patient = NewPatient {
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            email: patient.email.clone(),
            phone: patient.phone.clone(),
        };

        match tx.insert_patient(&new_patient).await {
            Ok(created) => {
                debug!("Created patient {} for {}", created.id, created.email);
                Ok(created)
            }
            Err(err) if err.is_unique_violation() => {
                // A concurrent booking registered the same email first.
                tx.find_patient_by_email(&patient.email)
                    .await?
                    .ok_or_else(|| BookingError::Internal(format!("patient {} vanished after insert race", patient.email)))
            }
            Err(err) => Err(err.into()),
        }
    }
}
