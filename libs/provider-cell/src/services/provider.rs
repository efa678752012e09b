use std::sync::Arc;

use tracing::debug;

use shared_database::{AppState, BookingStore, StoreError};

use crate::models::ProviderProfile;

pub struct ProviderService {
    store: Arc<dyn BookingStore>,
}

impl ProviderService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
        }
    }

    pub async fn list_providers(&self) -> Result<Vec<ProviderProfile>, StoreError> {
        let providers = self.store.list_providers().await?;
        debug!("Loaded {} providers", providers.len());
        Ok(providers.into_iter().map(ProviderProfile::from).collect())
    }

    pub async fn get_provider(&self, provider_id: &str) -> Result<Option<ProviderProfile>, StoreError> {
        Ok(self.store.get_provider(provider_id).await?.map(ProviderProfile::from))
    }
}
