use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{
    AppointmentRecord, AppointmentStatus, NewAppointment, NewPatient, NewSlot, PatientRecord,
    Provider, ScheduledAppointment, SlotRecord,
};

use crate::store::{BookingStore, StoreError, StoreTransaction};

pub struct PgBookingStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgBookingStore {
    pub async fn connect(config: &AppConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
            .map_err(map_sqlx_error)?;

        info!("Connected to Postgres (max {} connections)", config.database_max_connections);
        Ok(Self::from_pool(pool, config.lock_timeout()))
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct ProviderRow {
    id: String,
    name: String,
    specialty: String,
    bio: Option<String>,
}

impl From<ProviderRow> for Provider {
    fn from(row: ProviderRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            specialty: row.specialty,
            bio: row.bio,
        }
    }
}

#[derive(FromRow)]
struct SlotRow {
    id: String,
    provider_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    available: bool,
}

impl From<SlotRow> for SlotRecord {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id,
            provider_id: row.provider_id,
            start_time: row.start_time,
            end_time: row.end_time,
            available: row.available,
        }
    }
}

#[derive(FromRow)]
struct PatientRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
}

impl From<PatientRow> for PatientRecord {
    fn from(row: PatientRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
        }
    }
}

#[derive(FromRow)]
struct AppointmentRow {
    id: Uuid,
    reference_number: String,
    slot_id: String,
    provider_id: String,
    patient_id: i64,
    reason: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for AppointmentRecord {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            reference_number: row.reference_number,
            slot_id: row.slot_id,
            provider_id: row.provider_id,
            patient_id: row.patient_id,
            reason: row.reason,
            status: parse_status(&row.status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    id: Uuid,
    reference_number: String,
    first_name: String,
    last_name: String,
    email: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    reason: String,
    status: String,
}

fn parse_status(value: &str) -> Result<AppointmentStatus, StoreError> {
    AppointmentStatus::from_db(value)
        .ok_or_else(|| StoreError::Backend(format!("unknown appointment status '{}'", value)))
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let constraint = db_err.constraint().unwrap_or("unknown").to_string();
        match db_err.code().as_deref() {
            Some("23505") => return StoreError::UniqueViolation { constraint },
            Some(code) if code.starts_with("23") => return StoreError::IntegrityViolation { constraint },
            Some("55P03") => {
                return StoreError::LockTimeout {
                    resource: db_err.table().unwrap_or("row").to_string(),
                }
            }
            _ => {}
        }
    }
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // SET cannot take bind parameters; the value is an integer we own.
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, StoreError> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, specialty, bio FROM providers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Provider::from).collect())
    }

    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StoreError> {
        let row = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, specialty, bio FROM providers WHERE id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Provider::from))
    }

    async fn booked_slot_ids(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id
            FROM time_slots
            WHERE provider_id = $1
              AND available = FALSE
              AND start_time >= $2
              AND start_time < $3
            "#,
        )
        .bind(provider_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ids.into_iter().collect())
    }

    async fn provider_appointments(
        &self,
        provider_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledAppointment>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT a.id, a.reference_number, p.first_name, p.last_name, p.email,
                   s.start_time, s.end_time, a.reason, a.status
            FROM appointments a
            JOIN time_slots s ON s.id = a.slot_id
            JOIN patients p ON p.id = a.patient_id
            WHERE a.provider_id = $1
              AND s.start_time >= $2
              AND s.start_time < $3
            ORDER BY s.start_time
            "#,
        )
        .bind(provider_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(ScheduledAppointment {
                    appointment_id: row.id,
                    reference_number: row.reference_number,
                    patient_first_name: row.first_name,
                    patient_last_name: row.last_name,
                    patient_email: row.email,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    reason: row.reason,
                    status: parse_status(&row.status)?,
                })
            })
            .collect()
    }
}

struct PgTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }
}

async fn savepoint(conn: &mut PgConnection, name: &str) -> Result<(), StoreError> {
    let sql = format!("SAVEPOINT {}", name);
    sqlx::query(&sql).execute(&mut *conn).await.map_err(map_sqlx_error)?;
    Ok(())
}

/// Release the savepoint on success; on failure undo only the statement
/// run since it so the surrounding transaction stays usable.
async fn finish_savepoint<T>(
    conn: &mut PgConnection,
    name: &str,
    result: Result<T, sqlx::Error>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            let sql = format!("RELEASE SAVEPOINT {}", name);
            sqlx::query(&sql).execute(&mut *conn).await.map_err(map_sqlx_error)?;
            Ok(value)
        }
        Err(err) => {
            let sql = format!("ROLLBACK TO SAVEPOINT {}", name);
            sqlx::query(&sql).execute(&mut *conn).await.map_err(map_sqlx_error)?;
            Err(map_sqlx_error(err))
        }
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_slot(&mut self, slot_id: &str) -> Result<Option<SlotRecord>, StoreError> {
        let conn = self.conn()?;
        let row = sqlx::query_as::<_, SlotRow>(
            r#"
            SELECT id, provider_id, start_time, end_time, available
            FROM time_slots
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(slot_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(SlotRecord::from))
    }

    async fn mark_slot_unavailable(&mut self, slot_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let result = sqlx::query(
            "UPDATE time_slots SET available = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(slot_id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("slot {} not found", slot_id)));
        }
        Ok(())
    }

    async fn insert_slot(&mut self, slot: &NewSlot) -> Result<(), StoreError> {
        let conn = self.conn()?;
        savepoint(conn, "slot_insert").await?;

        let result = sqlx::query(
            r#"
            INSERT INTO time_slots (id, provider_id, start_time, end_time, available)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&slot.id)
        .bind(&slot.provider_id)
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.available)
        .execute(&mut *conn)
        .await;

        let outcome = finish_savepoint(conn, "slot_insert", result).await.map(|_| ());
        if let Err(err) = &outcome {
            debug!("Insert of slot {} failed: {}", slot.id, err);
        }
        outcome
    }

    async fn find_patient_by_email(&mut self, email: &str) -> Result<Option<PatientRecord>, StoreError> {
        let conn = self.conn()?;
        let row = sqlx::query_as::<_, PatientRow>(
            "SELECT id, first_name, last_name, email, phone FROM patients WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PatientRecord::from))
    }

    async fn insert_patient(&mut self, patient: &NewPatient) -> Result<PatientRecord, StoreError> {
        let conn = self.conn()?;
        savepoint(conn, "patient_insert").await?;

        let result = sqlx::query_as::<_, PatientRow>(
            r#"
            INSERT INTO patients (first_name, last_name, email, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING id, first_name, last_name, email, phone
            "#,
        )
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(&patient.email)
        .bind(&patient.phone)
        .fetch_one(&mut *conn)
        .await;

        finish_savepoint(conn, "patient_insert", result)
            .await
            .map(PatientRecord::from)
    }

    async fn insert_appointment(
        &mut self,
        appointment: &NewAppointment,
    ) -> Result<AppointmentRecord, StoreError> {
        let conn = self.conn()?;
        savepoint(conn, "appointment_insert").await?;

        let result = sqlx::query_as::<_, AppointmentRow>(
            r#"
            INSERT INTO appointments
                (id, reference_number, slot_id, provider_id, patient_id, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, reference_number, slot_id, provider_id, patient_id, reason, status, created_at
            "#,
        )
        .bind(appointment.id)
        .bind(&appointment.reference_number)
        .bind(&appointment.slot_id)
        .bind(&appointment.provider_id)
        .bind(appointment.patient_id)
        .bind(&appointment.reason)
        .bind(appointment.status.as_str())
        .bind(appointment.created_at)
        .fetch_one(&mut *conn)
        .await;

        finish_savepoint(conn, "appointment_insert", result)
            .await
            .and_then(AppointmentRecord::try_from)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await.map_err(|e| {
            warn!("Rollback failed: {}", e);
            map_sqlx_error(e)
        })
    }
}
