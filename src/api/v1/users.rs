use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::api::common::middleware::optional_user;
use crate::api::common::ApiResponse;
use crate::errors::AppError;
use crate::identity::{Role, User};
use crate::InnerState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub user: Option<User>,
    pub is_admin: bool,
}

/// Who is signed in, and whether the admin entry point should be offered.
#[tracing::instrument(name = "Current user", skip(state, headers))]
pub async fn me(
    State(state): State<InnerState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<CurrentUser>>, AppError> {
    let Some(user) = optional_user(&state, &headers).await else {
        return Ok(Json(ApiResponse::success(CurrentUser {
            user: None,
            is_admin: false,
        })));
    };

    let is_admin = state.identity.get_role(&user.id).await? == Some(Role::Admin);
    Ok(Json(ApiResponse::success(CurrentUser {
        user: Some(user),
        is_admin,
    })))
}
