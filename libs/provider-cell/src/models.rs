use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared_database::StoreError;
use shared_models::Provider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub name: String,
    pub specialty: String,
    pub bio: Option<String>,
}

impl From<Provider> for ProviderProfile {
    fn from(provider: Provider) -> Self {
        Self {
            id: provider.id,
            name: provider.name,
            specialty: provider.specialty,
            bio: provider.bio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBrief {
    pub id: String,
    pub name: String,
    pub specialty: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub provider_id: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub provider: ProviderBrief,
    pub slots: Vec<TimeSlot>,
}

/// Clinic hours used to project bookable slots (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicHours {
    pub open_hour: u32,
    pub close_hour: u32,
    pub lunch_hour: Option<u32>,
}

impl Default for ClinicHours {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 17,
            lunch_hour: Some(12),
        }
    }
}

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Provider not found")]
    ProviderNotFound,

    #[error("Invalid date format. Use YYYY-MM-DD")]
    InvalidDate,

    #[error("end_date must be after start_date")]
    InvalidRange,

    #[error("Date range cannot exceed {0} days")]
    RangeTooLong(i64),

    #[error("Database error: {0}")]
    Store(#[from] StoreError),
}
