// libs/provider-cell/src/services/availability.rs

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use tracing::{debug, instrument};

use shared_database::{AppState, BookingStore};
use shared_models::{SlotId, SLOT_DURATION_MINUTES};

use crate::models::{AvailabilityError, AvailabilityResponse, ClinicHours, ProviderBrief, TimeSlot};

/// Longest window one availability query may span.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Candidate slots for `start_date..=end_date`.
///
/// Weekends are skipped, slots run every 30 minutes inside clinic hours minus
/// the lunch hour, and only slots strictly after `now` are returned. Nothing
/// here touches storage; `booked` decides each slot's availability flag.
pub fn project_slots(
    provider_id: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    now: DateTime<Utc>,
    hours: &ClinicHours,
    booked: &HashSet<String>,
) -> Vec<TimeSlot> {
    let mut slots = Vec::new();

    for date in start_date.iter_days().take_while(|d| *d <= end_date) {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }

        for hour in hours.open_hour..hours.close_hour {
            if hours.lunch_hour == Some(hour) {
                continue;
            }

            for minute in (0..60).step_by(SLOT_DURATION_MINUTES as usize) {
                let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                    continue;
                };
                let start = Utc.from_utc_datetime(&date.and_time(time));
                if start <= now {
                    continue;
                }

                let id = SlotId::derive(provider_id, start).to_string();
                let available = !booked.contains(&id);
                slots.push(TimeSlot {
                    id,
                    start_time: start,
                    end_time: start + Duration::minutes(SLOT_DURATION_MINUTES),
                    available,
                });
            }
        }
    }

    slots
}

pub struct AvailabilityService {
    store: Arc<dyn BookingStore>,
    hours: ClinicHours,
}

impl AvailabilityService {
    pub fn new(state: &AppState) -> Self {
        Self::with_hours(Arc::clone(&state.store), ClinicHours::default())
    }

    pub fn with_hours(store: Arc<dyn BookingStore>, hours: ClinicHours) -> Self {
        Self { store, hours }
    }

    pub async fn get_availability(
        &self,
        provider_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<AvailabilityResponse, AvailabilityError> {
        self.get_availability_at(provider_id, start_date, end_date, Utc::now()).await
    }

    #[instrument(skip(self, now))]
    pub async fn get_availability_at(
        &self,
        provider_id: &str,
        start_date: &str,
        end_date: &str,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityResponse, AvailabilityError> {
        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or(AvailabilityError::ProviderNotFound)?;

        let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
            .map_err(|_| AvailabilityError::InvalidDate)?;
        let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
            .map_err(|_| AvailabilityError::InvalidDate)?;
        if end <= start {
            return Err(AvailabilityError::InvalidRange);
        }
        if (end - start).num_days() > MAX_RANGE_DAYS {
            return Err(AvailabilityError::RangeTooLong(MAX_RANGE_DAYS));
        }

        let from = Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN));
        let to = end
            .succ_opt()
            .map(|next| Utc.from_utc_datetime(&next.and_time(NaiveTime::MIN)))
            .ok_or(AvailabilityError::InvalidDate)?;
        let booked = self.store.booked_slot_ids(&provider.id, from, to).await?;

        let slots = project_slots(&provider.id, start, end, now, &self.hours, &booked);
        debug!(
            "Projected {} slots for provider {} ({} booked)",
            slots.len(),
            provider.id,
            booked.len()
        );

        Ok(AvailabilityResponse {
            provider: ProviderBrief {
                id: provider.id,
                name: provider.name,
                specialty: provider.specialty,
            },
            slots,
        })
    }
}
