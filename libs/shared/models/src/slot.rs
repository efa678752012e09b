//! Deterministic slot identifiers.
//!
//! A slot id is `slot-<provider_id>-<epoch_millis_of_start>`. The availability
//! listing and the booking path both derive ids through this module, so a slot
//! projected in memory and the row created at booking time share an identity
//! without the listing ever writing to storage.

use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SLOT_DURATION_MINUTES: i64 = 30;

const SLOT_PREFIX: &str = "slot-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotIdError {
    #[error("slot id must start with 'slot-'")]
    MissingPrefix,

    #[error("slot id has no start timestamp")]
    MissingTimestamp,

    #[error("invalid slot timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("slot belongs to provider '{found}', not '{expected}'")]
    ProviderMismatch { expected: String, found: String },
}

/// Parsed form of a slot id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId {
    provider_id: String,
    start_millis: i64,
}

impl SlotId {
    /// Derive the id for the slot starting at `start`. Sub-millisecond
    /// precision is truncated.
    pub fn derive(provider_id: &str, start: DateTime<Utc>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            start_millis: start.timestamp_millis(),
        }
    }

    /// Parse a raw id. Provider ids may themselves contain `-`, so the start
    /// timestamp is taken from the last segment.
    pub fn parse(raw: &str) -> Result<Self, SlotIdError> {
        let rest = raw.strip_prefix(SLOT_PREFIX).ok_or(SlotIdError::MissingPrefix)?;
        let (provider_id, millis) = rest.rsplit_once('-').ok_or(SlotIdError::MissingTimestamp)?;

        if provider_id.is_empty() || millis.is_empty() {
            return Err(SlotIdError::MissingTimestamp);
        }

        let start_millis: i64 = millis
            .parse()
            .map_err(|_| SlotIdError::InvalidTimestamp(millis.to_string()))?;

        // Reject values chrono cannot represent up front.
        if Utc.timestamp_millis_opt(start_millis).single().is_none() {
            return Err(SlotIdError::InvalidTimestamp(millis.to_string()));
        }

        Ok(Self {
            provider_id: provider_id.to_string(),
            start_millis,
        })
    }

    /// Parse and require the slot to belong to `provider_id`.
    pub fn parse_for_provider(raw: &str, provider_id: &str) -> Result<Self, SlotIdError> {
        let slot_id = Self::parse(raw)?;
        if slot_id.provider_id != provider_id {
            return Err(SlotIdError::ProviderMismatch {
                expected: provider_id.to_string(),
                found: slot_id.provider_id,
            });
        }
        Ok(slot_id)
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.start_millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time() + Duration::minutes(SLOT_DURATION_MINUTES)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", SLOT_PREFIX, self.provider_id, self.start_millis)
    }
}
