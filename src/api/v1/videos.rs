use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use super::FilterParams;
use crate::admin::{self, VideoForm, VideoUpdateForm};
use crate::api::common::ApiResponse;
use crate::catalog::model::{VideoKey, VideoRecord};
use crate::catalog::views::{self, AdminListView};
use crate::errors::AppError;
use crate::InnerState;

#[tracing::instrument(name = "List videos", skip(state))]
pub async fn list_videos(
    State(state): State<InnerState>,
    Query(params): Query<FilterParams>,
) -> Result<Json<ApiResponse<AdminListView>>, AppError> {
    let filters = params.to_filters()?;
    let snapshot = state.catalog.current();
    let view = views::admin_list(&snapshot.records, &filters);
    tracing::debug!(matched = view.videos.len(), total = view.total, "Admin list built");
    Ok(Json(ApiResponse::success(view)))
}

#[tracing::instrument(name = "Create video", skip(state, form))]
pub async fn create_video(
    State(state): State<InnerState>,
    Json(form): Json<VideoForm>,
) -> Result<(StatusCode, Json<ApiResponse<VideoRecord>>), AppError> {
    let record = admin::create_video(
        state.repository.as_ref(),
        &state.settings.videos_path,
        &form,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(record).with_message("Video uploaded")),
    ))
}

#[tracing::instrument(name = "Update video", skip(state, form))]
pub async fn update_video(
    State(state): State<InnerState>,
    Path(key): Path<String>,
    Json(form): Json<VideoUpdateForm>,
) -> Result<Json<ApiResponse<VideoRecord>>, AppError> {
    let record = admin::update_video(
        state.repository.as_ref(),
        &state.settings.videos_path,
        &VideoKey::from(key),
        &form,
    )
    .await?;
    Ok(Json(ApiResponse::success(record).with_message("Video updated")))
}

#[tracing::instrument(name = "Delete video", skip(state))]
pub async fn delete_video(
    State(state): State<InnerState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    admin::delete_video(
        state.repository.as_ref(),
        &state.settings.videos_path,
        &VideoKey::from(key),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
