//! Custom Axum extractors shared by the order handlers.
//!
//! - `CorrelationId`: request correlation id (header or freshly generated)
//! - `BearerToken`: credential from `Authorization: Bearer <token>`
//! - `Locale`: language for buyer-facing messages, from `Accept-Language`

use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Reads the id stored by the correlation-id middleware, falls back to the
/// `X-Correlation-ID` header, and generates a new UUID v4 otherwise.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(crate::CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Bearer credential extracted from the `Authorization` header.
///
/// Rejects with 401 when the header is missing, not a bearer credential, or
/// empty. Validating the credential is the authorizer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

impl BearerToken {
    /// Parse a raw `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns a 401 [`AppError`] when the value is not `Bearer <token>`.
    pub fn parse(header_value: &str) -> Result<Self, AppError> {
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
            })?
            .trim();

        if token.is_empty() {
            return Err(AppError::unauthorized("Empty bearer token"));
        }

        Ok(Self(token.to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

        Self::parse(auth_header)
    }
}

/// Language used for buyer-facing messages.
///
/// The storefront is Spanish-first; English is chosen only when the first
/// language range of `Accept-Language` is English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    /// Spanish (default)
    #[default]
    Es,
    /// English
    En,
}

impl Locale {
    /// Pick a locale from an `Accept-Language` header value.
    #[must_use]
    pub fn from_accept_language(value: &str) -> Self {
        let first = value
            .split(',')
            .next()
            .and_then(|range| range.split(';').next())
            .map(|tag| tag.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if first == "en" || first.starts_with("en-") {
            Self::En
        } else {
            Self::Es
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Locale
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .map(Self::from_accept_language)
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let mut parts = parts(Request::builder().header("X-Correlation-ID", uuid.to_string()));
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let uuid = Uuid::new_v4();
        let mut parts = parts(Request::builder().header("X-Correlation-ID", Uuid::new_v4().to_string()));
        parts.extensions.insert(uuid);
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_bearer_token_extracted() {
        let mut parts = parts(Request::builder().header("Authorization", "Bearer abc.def"));
        let token = BearerToken::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(token, BearerToken("abc.def".to_string()));
    }

    #[tokio::test]
    async fn test_bearer_token_missing_is_unauthorized() {
        let mut parts = parts(Request::builder());
        let err = BearerToken::from_request_parts(&mut parts, &())
            .await
            .expect_err("Should reject");

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bearer_token_rejects_other_schemes() {
        assert!(BearerToken::parse("Basic dXNlcjpwYXNz").is_err());
        assert!(BearerToken::parse("Bearer    ").is_err());
    }

    #[test]
    fn test_locale_from_accept_language() {
        assert_eq!(Locale::from_accept_language("en-US,en;q=0.9"), Locale::En);
        assert_eq!(Locale::from_accept_language("es-EC,es;q=0.9,en;q=0.8"), Locale::Es);
        assert_eq!(Locale::from_accept_language(""), Locale::Es);
        assert_eq!(Locale::from_accept_language("EN"), Locale::En);
    }
}
