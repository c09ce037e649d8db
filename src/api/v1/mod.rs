//! API Version 1 endpoints
//!
//! Browsing views are public. Everything under `/api/v1/admin` requires a
//! signed-in user with the admin role.

pub mod browse;
pub mod events;
pub mod users;
pub mod videos;

use axum::routing::{get, patch, post};
use axum::{middleware, Router};
use serde::Deserialize;

use crate::api::common::middleware::require_admin;
use crate::catalog::views::CatalogFilters;
use crate::errors::AppError;
use crate::InnerState;

/// Raw `q`/`type`/`language` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub language: Option<String>,
}

impl FilterParams {
    pub fn to_filters(&self) -> Result<CatalogFilters, AppError> {
        Ok(CatalogFilters::parse(
            self.q.as_deref(),
            self.kind.as_deref(),
            self.language.as_deref(),
        )?)
    }
}

/// Creates the V1 API router
#[tracing::instrument(name = "create_v1_router", skip(state))]
pub fn create_v1_router(state: InnerState) -> Router<InnerState> {
    tracing::info!("Creating V1 API router");

    let admin = Router::new()
        .route(
            "/api/v1/admin/videos",
            get(videos::list_videos).post(videos::create_video),
        )
        .route(
            "/api/v1/admin/videos/:key",
            patch(videos::update_video).delete(videos::delete_video),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/v1/dashboard", get(browse::dashboard))
        .route("/api/v1/search", get(browse::search))
        .route("/api/v1/series/:name", get(browse::series))
        .route("/api/v1/watch/:key", get(browse::watch))
        .route("/api/v1/me", get(users::me))
        .route("/api/v1/events/catalog", get(events::catalog_events))
        .route("/api/v1/events/hero", get(events::hero_events))
        .route(
            "/api/v1/events/hero/:session/select",
            post(events::select_hero),
        )
        .merge(admin)
        .with_state(state)
}
