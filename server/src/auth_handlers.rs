use axum::extract::State;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use common_auth::{hash_refresh_token, new_refresh_token, verify_password, Role};
use common_http_errors::{ok, ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{refresh_tokens, users};
use crate::errors::internal_error;

pub const REFRESH_COOKIE: &str = "bugspotter_refresh";
const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: SessionUser,
}

#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// `POST /api/v1/auth/login` — password credential only; OAuth users come
/// in through their provider flow. A refresh token goes out as an
/// HTTP-only cookie, never in the body.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Response> {
    let user = users::find_by_email(&state.db, &request.email)
        .await?
        .filter(|user| user.is_active);

    let Some(user) = user else {
        warn!(email = %request.email, "login rejected: unknown or inactive account");
        return Err(invalid_credentials());
    };
    let Some(stored_hash) = user.password_hash.as_deref() else {
        return Err(invalid_credentials());
    };
    if !verify_password(&request.password, stored_hash) {
        warn!(user_id = %user.id, "login rejected: bad password");
        return Err(invalid_credentials());
    }

    let response = issue_session(&state, &user).await?;
    info!(user_id = %user.id, "login succeeded");
    Ok(response)
}

/// `POST /api/v1/auth/refresh` — reads the cookie, validates it against
/// the server-side allowlist, and rotates: the presented token is revoked
/// in the same transaction that admits it, and a fresh one is issued.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let Some(token) = cookie_value(&headers, REFRESH_COOKIE) else {
        return Err(ApiError::Unauthorized {
            code: "refresh_token",
            message: "No refresh token".into(),
        });
    };

    let hash = hash_refresh_token(&token);
    let account = refresh_tokens::consume(&state.db, &hash).await?;
    let Some(account) = account else {
        return Err(ApiError::Unauthorized {
            code: "refresh_token",
            message: "Refresh token is invalid or expired".into(),
        });
    };

    let user = users::find_by_id(&state.db, account.user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| ApiError::Unauthorized {
            code: "refresh_token",
            message: "Account is no longer active".into(),
        })?;

    issue_session(&state, &user).await
}

/// `POST /api/v1/auth/logout` — clears the cookie and removes the token
/// from the allowlist so the cookie value is dead even if replayed.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = cookie_value(&headers, REFRESH_COOKIE) {
        let hash = hash_refresh_token(&token);
        let _ = refresh_tokens::delete_by_hash(&state.db, &hash).await?;
    }

    let mut response = ok(json!({ "logged_out": true })).into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, clear_cookie_header());
    Ok(response)
}

async fn issue_session(state: &AppState, user: &users::User) -> ApiResult<Response> {
    let role: Role = user.role();
    let issued = state
        .jwt_signer
        .issue_access_token(user.id, role)
        .map_err(|err| internal_error("issue access token", err))?;

    let refresh_token = new_refresh_token();
    let refresh_hash = hash_refresh_token(&refresh_token);
    let now = Utc::now();
    let refresh_ttl = state.jwt_config.refresh_ttl_seconds;
    refresh_tokens::insert(
        &state.db,
        Uuid::new_v4(),
        user.id,
        &refresh_hash,
        now,
        now + Duration::seconds(refresh_ttl),
    )
    .await?;

    // Opportunistic cleanup keeps the allowlist from accreting forever.
    let _ = refresh_tokens::delete_expired(&state.db).await;

    let body = TokenResponse {
        access_token: issued.token,
        token_type: "Bearer",
        expires_in: issued.expires_in,
        user: SessionUser {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
        },
    };

    let mut response = ok(body).into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, refresh_cookie_header(&refresh_token, refresh_ttl));
    Ok(response)
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized {
        code: "invalid_credentials",
        message: "Invalid credentials. Please try again.".into(),
    }
}

fn refresh_cookie_header(token: &str, max_age_secs: i64) -> HeaderValue {
    let cookie = format!(
        "{REFRESH_COOKIE}={token}; Path={REFRESH_COOKIE_PATH}; Max-Age={max_age_secs}; HttpOnly; Secure; SameSite=Lax"
    );
    HeaderValue::from_str(&cookie).expect("cookie header is ascii")
}

fn clear_cookie_header() -> HeaderValue {
    let cookie = format!(
        "{REFRESH_COOKIE}=; Path={REFRESH_COOKIE_PATH}; Max-Age=0; HttpOnly; Secure; SameSite=Lax"
    );
    HeaderValue::from_str(&cookie).expect("cookie header is ascii")
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| {
            raw.split(';').find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key == name).then(|| value.to_string())
            })
        })
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parser_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("a=1; bugspotter_refresh=tok.value; b=2"),
        );
        assert_eq!(
            cookie_value(&headers, REFRESH_COOKIE).as_deref(),
            Some("tok.value")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn refresh_cookie_is_http_only_lax() {
        let header = refresh_cookie_header("tok", 3_600);
        let value = header.to_str().unwrap();
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Secure"));
        assert!(value.contains("Max-Age=3600"));
    }
}
