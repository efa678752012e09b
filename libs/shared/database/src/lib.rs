pub mod memory;
pub mod postgres;
pub mod schema;
pub mod store;

use std::sync::Arc;

use shared_config::AppConfig;

pub use memory::InMemoryBookingStore;
pub use postgres::PgBookingStore;
pub use store::{BookingStore, StoreError, StoreTransaction};

/// Router state shared by every cell.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn BookingStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn BookingStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}
