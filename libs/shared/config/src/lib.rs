use std::env;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CORS_ORIGINS: [&str; 3] = [
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "https://decoda-booking.vercel.app",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub lock_timeout_ms: u64,
    pub reference_attempts: u32,
    pub server_port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            database_max_connections: 15,
            lock_timeout_ms: 5_000,
            reference_attempts: 5,
            server_port: 8000,
            cors_allowed_origins: DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_URL not set, falling back to the in-memory store");
                    String::new()
                }),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections),
            lock_timeout_ms: parse_var("BOOKING_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            reference_attempts: parse_var("BOOKING_REFERENCE_ATTEMPTS", defaults.reference_attempts).max(1),
            server_port: parse_var("PORT", defaults.server_port),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.cors_allowed_origins),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - bookings will not survive a restart");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_url.is_empty()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
