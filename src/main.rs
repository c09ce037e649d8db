mod admin;
mod api;
mod catalog;
mod errors;
mod identity;
mod repository;
mod settings;
mod system;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use secrecy::ExposeSecret;
use std::error::Error;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::api::v1::events::HeroSessions;
use crate::catalog::{CatalogCache, CatalogHandle};
use crate::identity::{JwtIdentity, SharedIdentity};
use crate::repository::{
    FirebaseRepository, InMemoryRepository, SharedRepository, SubscriptionQuery,
};
use crate::settings::Settings;

#[derive(Clone)]
pub struct InnerState {
    pub repository: SharedRepository,
    pub identity: SharedIdentity,
    /// Full collection.
    pub catalog: CatalogHandle,
    /// Most recent entries by `createdAt`, used by search.
    pub latest: CatalogHandle,
    pub hero_sessions: HeroSessions,
    pub settings: Arc<Settings>,
}

/// Takes the database credential out of `settings`; nothing else needs it.
fn build_repository(settings: &mut Settings) -> anyhow::Result<SharedRepository> {
    match settings.firebase_database_url.clone() {
        Some(url) => {
            let repository = FirebaseRepository::new(
                &url,
                settings.firebase_auth.take(),
                settings.firebase_timeout,
            )?;
            Ok(Arc::new(repository))
        }
        None => {
            tracing::warn!("FIREBASE_DATABASE_URL not set, using the in-memory repository");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mojiflix_api=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = Settings::from_env()?;
    let repository = build_repository(&mut settings)?;
    let settings = Arc::new(settings);

    let catalog = CatalogCache::new(
        repository.clone(),
        settings.videos_path.clone(),
        SubscriptionQuery::All,
    );
    let latest = CatalogCache::new(
        repository.clone(),
        settings.videos_path.clone(),
        SubscriptionQuery::ordered("createdAt", settings.search_window),
    );

    let identity: SharedIdentity = Arc::new(JwtIdentity::new(
        settings.secret_token.expose_secret().as_bytes(),
        repository.clone(),
    ));

    let app_state = InnerState {
        repository,
        identity,
        catalog: catalog.subscribe(),
        latest: latest.subscribe(),
        hero_sessions: HeroSessions::default(),
        settings: settings.clone(),
    };

    let mut first_load = app_state.catalog.clone();
    match tokio::time::timeout(settings.firebase_timeout, first_load.wait_for_version(1)).await {
        Ok(cached) => tracing::info!(records = cached.snapshot.len(), "Catalog loaded"),
        Err(_) => tracing::warn!("Catalog not loaded yet, serving an empty one until it arrives"),
    }
    drop(first_load);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = api::create_api_router(app_state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = tokio::net::TcpListener::bind(settings.bind_address()).await?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
