use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};

use crate::api_keys::looks_like_api_key;
use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};
use crate::tokens::JwtVerifier;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Verified user credential extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    pub fn has_role(&self, minimum: crate::roles::Role) -> bool {
        self.claims.has_role(minimum)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);

        let header_value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthorization)?;

        let token = parse_bearer(header_value)?;
        let claims = verifier.verify(&token)?;

        Ok(Self { claims, token })
    }
}

/// Raw `X-API-Key` value in the expected `bgs_` shape. The handler resolves
/// it to a project; this extractor only rejects requests that cannot match.
#[derive(Debug, Clone)]
pub struct ApiKeyHeader(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ApiKeyHeader
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(API_KEY_HEADER)
            .ok_or(AuthError::MissingApiKey)?
            .to_str()
            .map_err(|_| AuthError::InvalidApiKey)?
            .trim();

        if !looks_like_api_key(raw) {
            return Err(AuthError::InvalidApiKey);
        }

        Ok(Self(raw.to_owned()))
    }
}

fn parse_bearer(value: &axum::http::HeaderValue) -> AuthResult<String> {
    let raw = value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorization)?
        .trim();

    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthorization)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::InvalidAuthorization);
    }

    Ok(token.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parse_bearer_strips_scheme() {
        let value = HeaderValue::from_static("Bearer abc.def.ghi");
        assert_eq!(parse_bearer(&value).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn parse_bearer_rejects_basic() {
        let value = HeaderValue::from_static("Basic dXNlcjpwYXNz");
        assert!(matches!(
            parse_bearer(&value),
            Err(AuthError::InvalidAuthorization)
        ));
    }

    #[test]
    fn parse_bearer_rejects_empty_token() {
        let value = HeaderValue::from_static("Bearer ");
        assert!(parse_bearer(&value).is_err());
    }
}
