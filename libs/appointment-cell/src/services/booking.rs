// libs/appointment-cell/src/services/booking.rs
use std::sync::{Arc, OnceLock};

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use shared_database::{AppState, BookingStore, StoreTransaction};
use shared_models::{Provider, SlotId};

use crate::models::{
    AppointmentResponse, BookAppointmentRequest, BookedAppointment, BookingError, ClaimOutcome,
    PatientDetails, ProviderAppointmentEntry, ProviderAppointmentsResponse, ProviderSummary,
};
use crate::services::reservation::ReservationCoordinator;
use crate::services::writer::AppointmentWriter;

const MAX_NAME_LENGTH: usize = 100;
const MAX_EMAIL_LENGTH: usize = 254;
const MAX_PHONE_LENGTH: usize = 50;

pub struct AppointmentBookingService {
    store: Arc<dyn BookingStore>,
    coordinator: ReservationCoordinator,
    writer: AppointmentWriter,
}

impl AppointmentBookingService {
    pub fn new(state: &AppState) -> Self {
        Self::with_writer(
            Arc::clone(&state.store),
            AppointmentWriter::new(state.config.reference_attempts),
        )
    }

    pub fn with_writer(store: Arc<dyn BookingStore>, writer: AppointmentWriter) -> Self {
        Self {
            store,
            coordinator: ReservationCoordinator::new(),
            writer,
        }
    }

    /// Book one slot: claim it, write the patient and appointment, commit.
    /// Nothing is committed unless every step succeeds.
    #[instrument(skip(self, request), fields(provider_id = %request.provider_id, slot_id = %request.slot_id))]
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<AppointmentResponse, BookingError> {
        let patient = validate_patient(&request.patient)?;
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(BookingError::Validation("reason for visit is required".to_string()));
        }

        let provider = self
            .store
            .get_provider(&request.provider_id)
            .await?
            .ok_or(BookingError::ProviderNotFound)?;

        let slot_id = SlotId::parse_for_provider(&request.slot_id, &provider.id)
            .map_err(|e| BookingError::MalformedSlotId(e.to_string()))?;

        let mut tx = self.store.begin().await?;

        let booked = match self.claim_and_write(tx.as_mut(), &slot_id, &patient, &reason).await {
            Ok(booked) => booked,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed booking also failed: {}", rollback_err);
                }
                return Err(err);
            }
        };

        tx.commit().await.map_err(|e| {
            warn!("Commit failed for slot {}: {}", slot_id, e);
            BookingError::from(e)
        })?;

        info!(
            "Appointment {} confirmed for slot {}",
            booked.appointment.reference_number, slot_id
        );

        Ok(build_response(&provider, booked))
    }

    async fn claim_and_write(
        &self,
        tx: &mut dyn StoreTransaction,
        slot_id: &SlotId,
        patient: &PatientDetails,
        reason: &str,
    ) -> Result<BookedAppointment, BookingError> {
        let outcome = self
            .coordinator
            .reserve(
                tx,
                slot_id.provider_id(),
                &slot_id.to_string(),
                slot_id.start_time(),
                slot_id.end_time(),
            )
            .await?;

        match outcome {
            ClaimOutcome::Claimed(claim) => self.writer.write(tx, &claim, patient, reason).await,
            ClaimOutcome::AlreadyBooked => Err(BookingError::SlotAlreadyBooked),
            ClaimOutcome::ReservationFailed => Err(BookingError::ReservationFailed),
        }
    }

    /// Appointments whose slot starts within `[start_date, end_date]` (whole days, UTC).
    #[instrument(skip(self))]
    pub async fn list_provider_appointments(
        &self,
        provider_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<ProviderAppointmentsResponse, BookingError> {
        self.store
            .get_provider(provider_id)
            .await?
            .ok_or(BookingError::ProviderNotFound)?;

        let start = parse_date(start_date)?;
        let end = parse_date(end_date)?;
        if end < start {
            return Err(BookingError::Validation(
                "end_date must be after or equal to start_date".to_string(),
            ));
        }

        let from = Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN));
        let to = end
            .succ_opt()
            .map(|next| Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)))
            .ok_or_else(|| BookingError::Validation("end_date is out of range".to_string()))?;

        let rows = self.store.provider_appointments(provider_id, from, to).await?;
        debug!("Found {} appointments for provider {}", rows.len(), provider_id);

        Ok(ProviderAppointmentsResponse {
            provider_id: provider_id.to_string(),
            appointments: rows
                .into_iter()
                .map(|row| ProviderAppointmentEntry {
                    id: row.appointment_id,
                    reference_number: row.reference_number,
                    patient_name: format!("{} {}", row.patient_first_name, row.patient_last_name),
                    patient_email: row.patient_email,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    reason: row.reason,
                    status: row.status,
                })
                .collect(),
        })
    }
}

fn build_response(provider: &Provider, booked: BookedAppointment) -> AppointmentResponse {
    AppointmentResponse {
        id: booked.appointment.id,
        reference_number: booked.appointment.reference_number,
        status: booked.appointment.status,
        slot: booked.slot,
        provider: ProviderSummary::from(provider),
        patient: PatientDetails {
            first_name: booked.patient.first_name,
            last_name: booked.patient.last_name,
            email: booked.patient.email,
            phone: booked.patient.phone,
        },
        reason: booked.appointment.reason,
        created_at: booked.appointment.created_at,
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| BookingError::Validation("Invalid date format. Use YYYY-MM-DD".to_string()))
}

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok())
        .as_ref()
}

fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LENGTH && email_pattern().is_some_and(|re| re.is_match(email))
}

/// Trim every field and lowercase the email, which is the patient identity.
fn validate_patient(patient: &PatientDetails) -> Result<PatientDetails, BookingError> {
    let cleaned = PatientDetails {
        first_name: patient.first_name.trim().to_string(),
        last_name: patient.last_name.trim().to_string(),
        email: patient.email.trim().to_lowercase(),
        phone: patient.phone.trim().to_string(),
    };

    for (field, value) in [("first_name", &cleaned.first_name), ("last_name", &cleaned.last_name)] {
        if value.is_empty() || value.chars().count() > MAX_NAME_LENGTH {
            return Err(BookingError::Validation(format!(
                "patient {} must be 1-{} characters",
                field, MAX_NAME_LENGTH
            )));
        }
    }

    if !is_valid_email(&cleaned.email) {
        return Err(BookingError::Validation("patient email is invalid".to_string()));
    }

    if cleaned.phone.is_empty() || cleaned.phone.len() > MAX_PHONE_LENGTH {
        return Err(BookingError::Validation(format!(
            "patient phone must be 1-{} characters",
            MAX_PHONE_LENGTH
        )));
    }

    Ok(cleaned)
}
