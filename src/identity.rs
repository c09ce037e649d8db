//! Identity and role lookup.
//!
//! Users authenticate with the external identity provider, which issues HS256
//! tokens signed with the shared `SECRET_TOKEN`. Roles are kept in the catalog
//! database under `roles/{user_id}`.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::catalog::model::is_valid_segment;
use crate::repository::{RepositoryError, SharedRepository};

pub const ROLES_PATH: &str = "roles";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    pub exp: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user behind `token`, or `None` when the token is missing its
    /// signature, expired or malformed.
    async fn current_user(&self, token: &str) -> Option<User>;

    async fn get_role(&self, user_id: &str) -> Result<Option<Role>, RepositoryError>;
}

pub type SharedIdentity = Arc<dyn IdentityProvider>;

pub struct JwtIdentity {
    decoding_key: DecodingKey,
    repository: SharedRepository,
    roles_path: String,
}

impl JwtIdentity {
    pub fn new(secret: &[u8], repository: SharedRepository) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            repository,
            roles_path: ROLES_PATH.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentity {
    async fn current_user(&self, token: &str) -> Option<User> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => Some(User {
                id: token_data.claims.user_id,
                email: token_data.claims.sub,
            }),
            Err(e) => {
                tracing::debug!("JWT validation failed: {:?}", e);
                None
            }
        }
    }

    #[tracing::instrument(name = "get_role", skip(self))]
    async fn get_role(&self, user_id: &str) -> Result<Option<Role>, RepositoryError> {
        if !is_valid_segment(user_id) {
            tracing::warn!("Refusing role lookup for malformed user id");
            return Ok(None);
        }

        let value = self
            .repository
            .read_value(&format!("{}/{}", self.roles_path, user_id))
            .await?;

        Ok(match value {
            Some(Value::String(role)) if role == "admin" => Some(Role::Admin),
            _ => None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub(crate) const SECRET: &str = "test-secret";

    pub(crate) fn token_for(user_id: &str, email: &str, secret: &str) -> String {
        let claims = Claims {
            sub: email.to_string(),
            user_id: user_id.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn identity() -> JwtIdentity {
        let repository = InMemoryRepository::with_value(json!({
            "roles": { "boss": "admin", "viewer": "editor" }
        }));
        JwtIdentity::new(SECRET.as_bytes(), Arc::new(repository))
    }

    #[tokio::test]
    async fn decodes_valid_tokens_only() {
        let identity = identity().await;
        let user = identity
            .current_user(&token_for("boss", "boss@mojiflix.dev", SECRET))
            .await
            .unwrap();
        assert_eq!(user.id, "boss");
        assert_eq!(user.email, "boss@mojiflix.dev");

        assert!(identity
            .current_user(&token_for("boss", "boss@mojiflix.dev", "other-secret"))
            .await
            .is_none());
        assert!(identity.current_user("garbage").await.is_none());
    }

    #[tokio::test]
    async fn only_admin_value_grants_the_role() {
        let identity = identity().await;
        assert_eq!(identity.get_role("boss").await.unwrap(), Some(Role::Admin));
        assert_eq!(identity.get_role("viewer").await.unwrap(), None);
        assert_eq!(identity.get_role("stranger").await.unwrap(), None);
        assert_eq!(identity.get_role("../boss").await.unwrap(), None);
    }
}
