use sqlx::PgPool;
use tracing::info;

use shared_models::Provider;

use crate::store::StoreError;

/// Idempotent DDL for the booking tables.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS providers (
        id VARCHAR(255) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        specialty VARCHAR(255) NOT NULL,
        bio TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS time_slots (
        id VARCHAR(255) PRIMARY KEY,
        provider_id VARCHAR(255) NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ NOT NULL,
        available BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS patients (
        id BIGSERIAL PRIMARY KEY,
        first_name VARCHAR(100) NOT NULL,
        last_name VARCHAR(100) NOT NULL,
        email VARCHAR(255) NOT NULL,
        phone VARCHAR(50) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT patients_email_key UNIQUE (email)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS appointments (
        id UUID PRIMARY KEY,
        reference_number VARCHAR(50) NOT NULL,
        slot_id VARCHAR(255) NOT NULL REFERENCES time_slots(id) ON DELETE RESTRICT,
        provider_id VARCHAR(255) NOT NULL REFERENCES providers(id) ON DELETE RESTRICT,
        patient_id BIGINT NOT NULL REFERENCES patients(id) ON DELETE RESTRICT,
        reason TEXT NOT NULL,
        status VARCHAR(50) NOT NULL DEFAULT 'scheduled',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT appointments_reference_number_key UNIQUE (reference_number)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS appointments_active_slot_key
        ON appointments (slot_id)
        WHERE status <> 'cancelled'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS time_slots_provider_start_idx
        ON time_slots (provider_id, start_time)
    "#,
];

pub async fn apply_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Backend(format!("schema setup failed: {}", e)))?;
    }
    info!("Booking schema is up to date");
    Ok(())
}

/// Insert providers that are not present yet. Existing rows are left as they are.
pub async fn seed_providers(pool: &PgPool, providers: &[Provider]) -> Result<(), StoreError> {
    for provider in providers {
        sqlx::query(
            "INSERT INTO providers (id, name, specialty, bio) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&provider.id)
        .bind(&provider.name)
        .bind(&provider.specialty)
        .bind(&provider.bio)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("provider seed failed: {}", e)))?;
    }
    Ok(())
}
