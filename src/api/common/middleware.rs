use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use cookie::Cookie;

use crate::errors::AppError;
use crate::identity::{Role, User};
use crate::InnerState;

pub const AUTH_COOKIE: &str = "auth-token";

/// Lets the request through only for users holding the admin role. The
/// resolved [`User`] is stored in the request extensions.
pub async fn require_admin(
    State(state): State<InnerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| AppError::Authentication("Missing authentication token".to_string()))?;

    let user = state
        .identity
        .current_user(&token)
        .await
        .ok_or_else(|| AppError::Authentication("Invalid or expired token".to_string()))?;

    match state.identity.get_role(&user.id).await? {
        Some(Role::Admin) => {}
        None => {
            tracing::warn!(user_id = %user.id, "Non-admin user tried to reach an admin route");
            return Err(AppError::Permission("Admin access is required".to_string()));
        }
    }

    tracing::debug!(user_id = %user.id, "Admin access granted");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// The signed-in user, if the request carries a valid token.
pub async fn optional_user(state: &InnerState, headers: &HeaderMap) -> Option<User> {
    let token = extract_token(headers)?;
    state.identity.current_user(&token).await
}

/// Extracts the JWT from either the `Authorization` header or the
/// `auth-token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    for cookie_header in headers.get_all(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Ok(parsed) = Cookie::parse(cookie.trim()) {
                    if parsed.name() == AUTH_COOKIE {
                        return Some(parsed.value().to_string());
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("auth-token=def"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn falls_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth-token=def; lang=te"),
        );
        assert_eq!(extract_token(&headers).as_deref(), Some("def"));
    }

    #[test]
    fn no_token_without_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(extract_token(&headers).is_none());
    }
}
