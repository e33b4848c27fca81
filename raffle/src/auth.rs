//! Admin authorization.
//!
//! Admin routes carry `Authorization: Bearer <token>`. An
//! [`AdminAuthorizer`] resolves the token to a user and checks the admin
//! role flag, answering either an [`AdminIdentity`] or an [`AuthFailure`].

use crate::config::AuthConfig;
use crate::store::DataStore;
use crate::types::AdminId;
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use raffle_web::{AppError, BearerToken};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// An authenticated user holding the admin flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminIdentity {
    /// Admin user id
    pub admin_id: AdminId,
    /// Email, when the identity provider reports one
    pub email: Option<String>,
}

/// Why an admin request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// No bearer token was sent.
    #[error("missing credential")]
    MissingCredential,

    /// The token is unknown or expired.
    #[error("invalid credential")]
    InvalidCredential,

    /// Valid identity without the admin flag.
    #[error("not authorized")]
    NotAdmin,

    /// The role lookup itself failed.
    #[error("role check failed: {0}")]
    RoleCheck(String),
}

impl From<AuthFailure> for AppError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::MissingCredential | AuthFailure::InvalidCredential => {
                Self::unauthorized(failure.to_string())
            }
            AuthFailure::NotAdmin => Self::forbidden(failure.to_string()),
            AuthFailure::RoleCheck(_) => {
                Self::internal("Role check failed").with_source(anyhow::Error::new(failure))
            }
        }
    }
}

/// Resolves bearer tokens to admin identities.
#[async_trait]
pub trait AdminAuthorizer: Send + Sync {
    /// Check a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure`] describing why the caller is not an admin.
    async fn authorize(&self, token: &str) -> Result<AdminIdentity, AuthFailure>;
}

/// Fixed token table, for development and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuthorizer {
    tokens: HashMap<String, AdminId>,
}

impl StaticTokenAuthorizer {
    /// Authorizer from `token → admin` pairs.
    #[must_use]
    pub fn new(tokens: impl IntoIterator<Item = (String, Uuid)>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, id)| (token, AdminId::from_uuid(id)))
                .collect(),
        }
    }
}

#[async_trait]
impl AdminAuthorizer for StaticTokenAuthorizer {
    async fn authorize(&self, token: &str) -> Result<AdminIdentity, AuthFailure> {
        if token.trim().is_empty() {
            return Err(AuthFailure::MissingCredential);
        }
        self.tokens
            .get(token)
            .map(|admin_id| AdminIdentity {
                admin_id: *admin_id,
                email: None,
            })
            .ok_or(AuthFailure::InvalidCredential)
    }
}

/// Resolves tokens at the hosted auth service (`GET {auth_url}/user`) and
/// reads the admin flag from the data store.
#[derive(Clone)]
pub struct HttpAdminAuthorizer {
    http_client: reqwest::Client,
    user_url: String,
    api_key: Option<String>,
    timeout: Duration,
    store: Arc<dyn DataStore>,
}

#[derive(Deserialize)]
struct AuthUser {
    id: Uuid,
    email: Option<String>,
}

impl HttpAdminAuthorizer {
    /// Authorizer against `auth_url`.
    #[must_use]
    pub fn new(auth_url: &str, config: &AuthConfig, store: Arc<dyn DataStore>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            user_url: format!("{}/user", auth_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            store,
        }
    }

    async fn resolve_user(&self, token: &str) -> Result<AuthUser, AuthFailure> {
        let mut request = self
            .http_client
            .get(&self.user_url)
            .bearer_auth(token)
            .timeout(self.timeout);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthFailure::RoleCheck(format!("auth service unreachable: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthFailure::InvalidCredential);
        }
        if !status.is_success() {
            return Err(AuthFailure::RoleCheck(format!("auth service answered {status}")));
        }

        response
            .json::<AuthUser>()
            .await
            .map_err(|_| AuthFailure::InvalidCredential)
    }
}

#[async_trait]
impl AdminAuthorizer for HttpAdminAuthorizer {
    async fn authorize(&self, token: &str) -> Result<AdminIdentity, AuthFailure> {
        if token.trim().is_empty() {
            return Err(AuthFailure::MissingCredential);
        }

        let user = self.resolve_user(token).await?;

        let is_admin = self
            .store
            .is_admin(user.id)
            .await
            .map_err(|e| AuthFailure::RoleCheck(e.to_string()))?;
        if !is_admin {
            tracing::warn!(user_id = %user.id, "Admin route called by non-admin user");
            return Err(AuthFailure::NotAdmin);
        }

        Ok(AdminIdentity {
            admin_id: AdminId::from_uuid(user.id),
            email: user.email,
        })
    }
}

/// Extractor for admin-only handlers.
///
/// Reads the bearer token and runs it through the state's
/// [`AdminAuthorizer`]; rejects with 401/403 before the handler runs.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub AdminIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    Arc<dyn AdminAuthorizer>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let authorizer = Arc::<dyn AdminAuthorizer>::from_ref(state);

        let identity = authorizer.authorize(&token).await?;
        tracing::debug!(admin_id = %identity.admin_id, "Admin authorized");
        Ok(Self(identity))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_static_authorizer() {
        let id = Uuid::new_v4();
        let auth = StaticTokenAuthorizer::new([("secret".to_string(), id)]);

        let identity = auth.authorize("secret").await.unwrap();
        assert_eq!(identity.admin_id, AdminId::from_uuid(id));
        assert_eq!(auth.authorize("nope").await.unwrap_err(), AuthFailure::InvalidCredential);
        assert_eq!(auth.authorize("").await.unwrap_err(), AuthFailure::MissingCredential);
    }

    #[test]
    fn test_failure_status_codes() {
        assert_eq!(AppError::from(AuthFailure::MissingCredential).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(AuthFailure::InvalidCredential).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::from(AuthFailure::NotAdmin).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(AuthFailure::RoleCheck("db down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
