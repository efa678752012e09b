// libs/appointment-cell/src/services/reservation.rs
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use shared_database::{StoreError, StoreTransaction};
use shared_models::{NewSlot, SlotRecord};

use crate::models::{ClaimOutcome, ReservationPhase, SlotClaim};

/// Claims a slot row inside the caller's transaction.
///
/// The slot row is locked if it exists and inserted already-claimed if it
/// does not. Two first-time bookings for the same slot race on that insert;
/// the loser undoes its insert and relocks exactly once, by which point the
/// winner has committed or rolled back.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReservationCoordinator;

enum Step {
    Lock { relock: bool },
    Found(SlotRecord),
    Insert,
}

impl ReservationCoordinator {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, tx, start_time, end_time))]
    pub async fn reserve(
        &self,
        tx: &mut dyn StoreTransaction,
        provider_id: &str,
        slot_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut step = Step::Lock { relock: false };

        loop {
            step = match step {
                Step::Lock { relock } => {
                    let phase = if relock { ReservationPhase::Relocking } else { ReservationPhase::Locking };
                    debug!(%phase, "Locking slot row");

                    match tx.lock_slot(slot_id).await? {
                        Some(slot) => Step::Found(slot),
                        None if !relock => {
                            debug!(phase = %ReservationPhase::NotFound, "Slot row absent, materializing it");
                            Step::Insert
                        }
                        None => {
                            warn!(phase = %ReservationPhase::Rejected, "Slot row still absent after losing insert race");
                            return Ok(ClaimOutcome::ReservationFailed);
                        }
                    }
                }
                Step::Found(slot) => {
                    debug!(phase = %ReservationPhase::Found, available = slot.available, "Slot row locked");

                    if !slot.available {
                        info!(phase = %ReservationPhase::Rejected, "Slot already booked");
                        return Ok(ClaimOutcome::AlreadyBooked);
                    }

                    tx.mark_slot_unavailable(slot_id).await?;
                    debug!(phase = %ReservationPhase::Claimed, "Claimed existing slot");
                    return Ok(ClaimOutcome::Claimed(SlotClaim::new(
                        slot_id,
                        provider_id,
                        slot.start_time,
                        slot.end_time,
                        false,
                    )));
                }
                Step::Insert => {
                    debug!(phase = %ReservationPhase::Inserting, "Inserting claimed slot row");

                    let new_slot = NewSlot {
                        id: slot_id.to_string(),
                        provider_id: provider_id.to_string(),
                        start_time,
                        end_time,
                        available: false,
                    };

                    match tx.insert_slot(&new_slot).await {
                        Ok(()) => {
                            debug!(phase = %ReservationPhase::Inserted, "Claimed new slot");
                            return Ok(ClaimOutcome::Claimed(SlotClaim::new(
                                slot_id,
                                provider_id,
                                start_time,
                                end_time,
                                true,
                            )));
                        }
                        Err(err) if err.is_unique_violation() => {
                            debug!(phase = %ReservationPhase::RaceLost, "Concurrent insert won, relocking");
                            Step::Lock { relock: true }
                        }
                        Err(err) => return Err(err),
                    }
                }
            };
        }
    }
}
