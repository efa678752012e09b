pub mod availability;
pub mod provider;

pub use availability::{project_slots, AvailabilityService, MAX_RANGE_DAYS};
pub use provider::ProviderService;
