use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use http::HeaderValue;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use shared_config::AppConfig;
use shared_database::schema::{apply_schema, seed_providers};
use shared_database::{AppState, BookingStore, InMemoryBookingStore, PgBookingStore};
use shared_models::Provider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic booking API server");

    let config = AppConfig::from_env();
    let store = build_store(&config).await?;

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods(Any)
        .allow_headers(Any);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let state = AppState::new(config, store);

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn BookingStore>> {
    if !config.is_configured() {
        info!("Using in-memory booking store with {} demo providers", demo_providers().len());
        let store = InMemoryBookingStore::with_providers(config.lock_timeout(), demo_providers()).await;
        return Ok(Arc::new(store));
    }

    let store = PgBookingStore::connect(config)
        .await
        .context("failed to connect to Postgres")?;
    apply_schema(store.pool()).await.context("failed to apply schema")?;
    seed_providers(store.pool(), &demo_providers())
        .await
        .context("failed to seed providers")?;

    Ok(Arc::new(store))
}

fn demo_providers() -> Vec<Provider> {
    [
        ("dr-chen", "Dr. Sarah Chen", "Family Medicine", "Primary care for all ages."),
        ("dr-okafor", "Dr. James Okafor", "Pediatrics", "Well-child visits and vaccinations."),
        ("dr-rivera", "Dr. Maria Rivera", "Dermatology", "Skin checks and chronic skin conditions."),
    ]
    .into_iter()
    .map(|(id, name, specialty, bio)| Provider {
        id: id.to_string(),
        name: name.to_string(),
        specialty: specialty.to_string(),
        bio: Some(bio.to_string()),
    })
    .collect()
}
