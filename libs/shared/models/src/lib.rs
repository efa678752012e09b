pub mod clinic;
pub mod error;
pub mod slot;

pub use clinic::*;
pub use slot::{SlotId, SlotIdError, SLOT_DURATION_MINUTES};
