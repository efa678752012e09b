//! In-process store with the same transactional contract as Postgres.
//!
//! Row locks are per-key tokio mutexes held by the owning transaction until it
//! commits or rolls back. Writes are buffered in the transaction and applied
//! to the shared tables in one step on commit, so other transactions never
//! observe partial state. Inserting a key that another open transaction has
//! inserted blocks on that key's lock, as a unique index wait does.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use shared_models::{
    AppointmentRecord, NewAppointment, NewPatient, NewSlot, PatientRecord, Provider,
    ScheduledAppointment, SlotRecord,
};

use crate::store::{BookingStore, StoreError, StoreTransaction};

const SLOT_PKEY: &str = "time_slots_pkey";
const PATIENT_EMAIL_KEY: &str = "patients_email_key";
const REFERENCE_KEY: &str = "appointments_reference_number_key";
const ACTIVE_SLOT_KEY: &str = "appointments_active_slot_key";

#[derive(Default)]
struct Tables {
    providers: BTreeMap<String, Provider>,
    slots: HashMap<String, SlotRecord>,
    patients: HashMap<String, PatientRecord>,
    appointments: Vec<AppointmentRecord>,
}

struct Shared {
    tables: RwLock<Tables>,
    // Entries live only while some transaction holds or waits on the key.
    row_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    patient_sequence: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    fn row_locks(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the entry for `key` once nobody holds or waits on it.
    fn prune(&self, key: &str) {
        let mut locks = self.row_locks();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

#[derive(Clone)]
pub struct InMemoryBookingStore {
    shared: Arc<Shared>,
}

impl InMemoryBookingStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: StdMutex::new(HashMap::new()),
                patient_sequence: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    pub async fn with_providers(lock_timeout: Duration, providers: Vec<Provider>) -> Self {
        let store = Self::new(lock_timeout);
        for provider in providers {
            store.add_provider(provider).await;
        }
        store
    }

    pub async fn add_provider(&self, provider: Provider) {
        let mut tables = self.shared.tables.write().await;
        tables.providers.insert(provider.id.clone(), provider);
    }

    pub async fn slot(&self, slot_id: &str) -> Option<SlotRecord> {
        self.shared.tables.read().await.slots.get(slot_id).cloned()
    }

    pub async fn slot_count(&self) -> usize {
        self.shared.tables.read().await.slots.len()
    }

    pub async fn patients(&self) -> Vec<PatientRecord> {
        let tables = self.shared.tables.read().await;
        let mut patients: Vec<_> = tables.patients.values().cloned().collect();
        patients.sort_by_key(|p| p.id);
        patients
    }

    pub async fn appointments(&self) -> Vec<AppointmentRecord> {
        self.shared.tables.read().await.appointments.clone()
    }

    pub async fn appointments_for_slot(&self, slot_id: &str) -> Vec<AppointmentRecord> {
        self.shared
            .tables
            .read()
            .await
            .appointments
            .iter()
            .filter(|a| a.slot_id == slot_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            slot_writes: HashMap::new(),
            patient_writes: Vec::new(),
            appointment_writes: Vec::new(),
            finished: false,
        }))
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        Ok(self.shared.tables.read().await.providers.values().cloned().collect())
    }

    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StoreError> {
        Ok(self.shared.tables.read().await.providers.get(provider_id).cloned())
    }

    async fn booked_slot_ids(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .slots
            .values()
            .filter(|s| s.provider_id == provider_id && !s.available)
            .filter(|s| s.start_time >= from && s.start_time < to)
            .map(|s| s.id.clone())
            .collect())
    }

    async fn provider_appointments(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledAppointment>, StoreError> {
        let tables = self.shared.tables.read().await;
        let patients_by_id: HashMap<i64, &PatientRecord> =
            tables.patients.values().map(|p| (p.id, p)).collect();

        let mut rows: Vec<ScheduledAppointment> = tables
            .appointments
            .iter()
            .filter(|a| a.provider_id == provider_id)
            .filter_map(|a| {
                let slot = tables.slots.get(&a.slot_id)?;
                let patient = patients_by_id.get(&a.patient_id)?;
                (slot.start_time >= from && slot.start_time < to).then(|| ScheduledAppointment {
                    appointment_id: a.id,
                    reference_number: a.reference_number.clone(),
                    patient_first_name: patient.first_name.clone(),
                    patient_last_name: patient.last_name.clone(),
                    patient_email: patient.email.clone(),
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    reason: a.reason.clone(),
                    status: a.status,
                })
            })
            .collect();

        rows.sort_by_key(|r| r.start_time);
        Ok(rows)
    }
}

struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<String, OwnedMutexGuard<()>>,
    slot_writes: HashMap<String, SlotRecord>,
    patient_writes: Vec<PatientRecord>,
    appointment_writes: Vec<AppointmentRecord>,
    finished: bool,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }

    /// Acquire the row lock for `key`. Returns true when the lock was newly
    /// taken by this call.
    async fn acquire(&mut self, key: &str) -> Result<bool, StoreError> {
        if self.held.contains_key(key) {
            return Ok(false);
        }

        let row_lock = Arc::clone(self.shared.row_locks().entry(key.to_string()).or_default());

        let acquired = tokio::time::timeout(self.shared.lock_timeout, row_lock.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                self.held.insert(key.to_string(), guard);
                Ok(true)
            }
            Err(_) => {
                self.shared.prune(key);
                Err(StoreError::LockTimeout {
                    resource: key.to_string(),
                })
            }
        }
    }

    fn release(&mut self, key: &str) {
        if self.held.remove(key).is_some() {
            self.shared.prune(key);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.slot_writes.clear();
        self.patient_writes.clear();
        self.appointment_writes.clear();
        let keys: Vec<String> = self.held.drain().map(|(key, _guard)| key).collect();
        for key in keys {
            self.shared.prune(&key);
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}

fn slot_key(slot_id: &str) -> String {
    format!("slot:{}", slot_id)
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_slot(&mut self, slot_id: &str) -> Result<Option<SlotRecord>, StoreError> {
        self.ensure_open()?;
        if let Some(slot) = self.slot_writes.get(slot_id) {
            return Ok(Some(slot.clone()));
        }

        let key = slot_key(slot_id);
        let newly_acquired = self.acquire(&key).await?;

        let committed = self.shared.tables.read().await.slots.get(slot_id).cloned();
        if committed.is_none() && newly_acquired {
            self.release(&key);
        }
        Ok(committed)
    }

    async fn mark_slot_unavailable(&mut self, slot_id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        if !self.held.contains_key(&slot_key(slot_id)) {
            return Err(StoreError::Backend(format!("slot {} is not locked by this transaction", slot_id)));
        }

        let current = match self.slot_writes.get(slot_id) {
            Some(slot) => Some(slot.clone()),
            None => self.shared.tables.read().await.slots.get(slot_id).cloned(),
        };
        let mut slot = current.ok_or_else(|| StoreError::Backend(format!("slot {} not found", slot_id)))?;
        slot.available = false;
        self.slot_writes.insert(slot_id.to_string(), slot);
        Ok(())
    }

    async fn insert_slot(&mut self, slot: &NewSlot) -> Result<(), StoreError> {
        self.ensure_open()?;
        let unique_violation = || StoreError::UniqueViolation {
            constraint: SLOT_PKEY.to_string(),
        };

        if self.slot_writes.contains_key(&slot.id) {
            return Err(unique_violation());
        }

        let key = slot_key(&slot.id);
        let newly_acquired = self.acquire(&key).await?;

        let tables = self.shared.tables.read().await;
        if !tables.providers.contains_key(&slot.provider_id) {
            drop(tables);
            if newly_acquired {
                self.release(&key);
            }
            return Err(StoreError::IntegrityViolation {
                constraint: "time_slots_provider_id_fkey".to_string(),
            });
        }
        if tables.slots.contains_key(&slot.id) {
            drop(tables);
            if newly_acquired {
                self.release(&key);
            }
            return Err(unique_violation());
        }
        drop(tables);

        debug!("Buffered insert of slot {}", slot.id);
        self.slot_writes.insert(
            slot.id.clone(),
            SlotRecord {
                id: slot.id.clone(),
                provider_id: slot.provider_id.clone(),
                start_time: slot.start_time,
                end_time: slot.end_time,
                available: slot.available,
            },
        );
        Ok(())
    }

    async fn find_patient_by_email(&mut self, email: &str) -> Result<Option<PatientRecord>, StoreError> {
        self.ensure_open()?;
        if let Some(patient) = self.patient_writes.iter().find(|p| p.email == email) {
            return Ok(Some(patient.clone()));
        }
        Ok(self.shared.tables.read().await.patients.get(email).cloned())
    }

    async fn insert_patient(&mut self, patient: &NewPatient) -> Result<PatientRecord, StoreError> {
        self.ensure_open()?;
        let unique_violation = || StoreError::UniqueViolation {
            constraint: PATIENT_EMAIL_KEY.to_string(),
        };

        if self.patient_writes.iter().any(|p| p.email == patient.email) {
            return Err(unique_violation());
        }

        let key = format!("patient:{}", patient.email);
        let newly_acquired = self.acquire(&key).await?;

        let exists = self.shared.tables.read().await.patients.contains_key(&patient.email);
        if exists {
            if newly_acquired {
                self.release(&key);
            }
            return Err(unique_violation());
        }

        let record = PatientRecord {
            id: self.shared.patient_sequence.fetch_add(1, Ordering::SeqCst),
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            email: patient.email.clone(),
            phone: patient.phone.clone(),
        };
        self.patient_writes.push(record.clone());
        Ok(record)
    }

    async fn insert_appointment(
        &mut self,
        appointment: &NewAppointment,
    ) -> Result<AppointmentRecord, StoreError> {
        self.ensure_open()?;

        let key = format!("reference:{}", appointment.reference_number);
        let newly_acquired = self.acquire(&key).await?;

        let violation = {
            let tables = self.shared.tables.read().await;

            let reference_taken = self
                .appointment_writes
                .iter()
                .chain(tables.appointments.iter())
                .any(|a| a.reference_number == appointment.reference_number);

            let slot_taken = appointment.status.holds_slot()
                && self
                    .appointment_writes
                    .iter()
                    .chain(tables.appointments.iter())
                    .any(|a| a.slot_id == appointment.slot_id && a.status.holds_slot());

            let slot_exists = self.slot_writes.contains_key(&appointment.slot_id)
                || tables.slots.contains_key(&appointment.slot_id);
            let patient_exists = self.patient_writes.iter().any(|p| p.id == appointment.patient_id)
                || tables.patients.values().any(|p| p.id == appointment.patient_id);
            let provider_exists = tables.providers.contains_key(&appointment.provider_id);

            if reference_taken {
                Some(StoreError::UniqueViolation {
                    constraint: REFERENCE_KEY.to_string(),
                })
            } else if slot_taken {
                Some(StoreError::UniqueViolation {
                    constraint: ACTIVE_SLOT_KEY.to_string(),
                })
            } else if !slot_exists || !patient_exists || !provider_exists {
                Some(StoreError::IntegrityViolation {
                    constraint: "appointments_foreign_keys".to_string(),
                })
            } else {
                None
            }
        };

        if let Some(err) = violation {
            if newly_acquired {
                self.release(&key);
            }
            return Err(err);
        }

        let record = AppointmentRecord::from(appointment.clone());
        self.appointment_writes.push(record.clone());
        Ok(record)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        {
            let mut tables = self.shared.tables.write().await;
            for (id, slot) in self.slot_writes.drain() {
                tables.slots.insert(id, slot);
            }
            for patient in self.patient_writes.drain(..) {
                tables.patients.insert(patient.email.clone(), patient);
            }
            tables.appointments.append(&mut self.appointment_writes);
        }
        self.finish();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.finish();
        Ok(())
    }
}
