//! Consumer facing catalog views.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::common::ApiResponse;
use crate::catalog::model::VideoKey;
use crate::catalog::views::{
    self, DashboardView, PlaybackSignal, SearchView, SeriesView, WatchView,
};
use crate::errors::AppError;
use crate::InnerState;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    pub hero: Option<usize>,
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesParams {
    pub episode: Option<usize>,
    pub signal: Option<PlaybackSignal>,
}

#[tracing::instrument(name = "Dashboard", skip(state))]
pub async fn dashboard(
    State(state): State<InnerState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<ApiResponse<DashboardView>>, AppError> {
    let filters = views::CatalogFilters::parse(
        params.q.as_deref(),
        params.kind.as_deref(),
        params.language.as_deref(),
    )?;
    let snapshot = state.catalog.current();
    let view = views::dashboard(
        &snapshot.records,
        &filters,
        params.hero.unwrap_or_default(),
        state.settings.hero_rotation.as_millis() as u64,
    );
    Ok(Json(ApiResponse::success(view)))
}

#[tracing::instrument(name = "Search", skip(state))]
pub async fn search(
    State(state): State<InnerState>,
    Query(params): Query<SearchParams>,
) -> Json<ApiResponse<SearchView>> {
    let window = state.latest.current();
    Json(ApiResponse::success(views::search(
        &window.records,
        params.prefix.as_deref().unwrap_or_default(),
    )))
}

#[tracing::instrument(name = "Series", skip(state))]
pub async fn series(
    State(state): State<InnerState>,
    Path(name): Path<String>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<ApiResponse<SeriesView>>, AppError> {
    let snapshot = state.catalog.current();
    let view = views::series(
        &snapshot.records,
        &name,
        params.episode.unwrap_or_default(),
        params.signal,
    )
    .ok_or_else(|| AppError::NotFound(format!("Series '{}' not found", name)))?;
    Ok(Json(ApiResponse::success(view)))
}

#[tracing::instrument(name = "Watch", skip(state))]
pub async fn watch(
    State(state): State<InnerState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<WatchView>>, AppError> {
    let snapshot = state.catalog.current();
    let view = views::watch(&snapshot.records, &VideoKey::from(key.as_str()))
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", key)))?;
    Ok(Json(ApiResponse::success(view)))
}
