use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error as StdError;

use crate::catalog::model::UnknownVariant;
use crate::repository::RepositoryError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("An unexpected error occurred: {0}")]
    Unexpected(#[from] anyhow::Error),

    #[error("Validation errors")]
    ValidationErrors(HashMap<String, Vec<String>>),
}

impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::Repository(_) => StatusCode::BAD_GATEWAY,
            AppError::Validation(_) | AppError::ValidationErrors(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, errors) = match &self {
            AppError::Authentication(msg) => (msg.clone(), None),
            AppError::Permission(msg) => (msg.clone(), None),
            AppError::Repository(e) => (format!("The video catalog is unavailable: {}", e), None),
            AppError::Validation(msg) => (msg.clone(), None),
            AppError::NotFound(msg) => (msg.clone(), None),
            AppError::Timeout(e) => (format!("Operation timed out: {}", e), None),
            AppError::Unexpected(e) => (format!("An unexpected error occurred: {}", e), None),
            AppError::ValidationErrors(validation_errors) => (
                "Validation failed".to_string(),
                Some(validation_errors.clone()),
            ),
        };

        tracing::error!(
            error_type = %self,
            error_message = %error_message,
            status_code = %status,
            "Request error"
        );

        if let AppError::Unexpected(e) = &self {
            let mut source_chain = String::new();
            let mut current_err: Option<&(dyn StdError + 'static)> = Some(e.as_ref());
            while let Some(err) = current_err {
                source_chain.push_str(&format!("\n  Caused by: {}", err));
                current_err = err.source();
            }
            if !source_chain.is_empty() {
                tracing::error!("Unexpected error source chain:{}", source_chain);
            }
        }

        let body = match errors {
            Some(validation_errors) => Json(json!({
                "message": error_message,
                "status": status.as_u16(),
                "errors": validation_errors
            })),
            None => Json(json!({
                "message": error_message,
                "status": status.as_u16()
            })),
        };
        (status, body).into_response()
    }
}
