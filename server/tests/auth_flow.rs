mod support;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header::SET_COOKIE, Request, StatusCode};
use bugspotter_server::app::build_router;
use common_auth::Role;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use support::TestApp;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn refresh_cookie(response: &axum::response::Response) -> Option<String> {
    response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(';').next())
        .map(|pair| pair.to_string())
        .filter(|pair| pair.starts_with("bugspotter_refresh=") && !pair.ends_with('='))
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn login_refresh_logout_rotation() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let (user_id, email, password) = app.seed_user(Role::User).await?;
    let router = build_router(app.state.clone());

    // Login issues an access token and a refresh cookie.
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "email": email, "password": password }).to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie1 = refresh_cookie(&response).expect("refresh cookie set");
    let json = body_json(response).await;
    let access1 = json["data"]["access_token"].as_str().unwrap().to_string();
    assert_eq!(json["data"]["user"]["id"], user_id.to_string());

    // The access token opens a protected endpoint.
    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/reports")
                .header("authorization", format!("Bearer {access1}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Refresh rotates: new access token, new cookie, old cookie dead.
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/auth/refresh")
                .header("cookie", &cookie1)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie2 = refresh_cookie(&response).expect("rotated cookie set");
    assert_ne!(cookie1, cookie2);

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/auth/refresh")
                .header("cookie", &cookie1)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Logout revokes the current cookie server-side.
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/auth/logout")
                .header("cookie", &cookie2)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::post("/api/v1/auth/refresh")
                .header("cookie", &cookie2)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn viewer_cannot_mutate_and_admin_endpoints_are_guarded() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let (viewer_id, _, _) = app.seed_user(Role::Viewer).await?;
    let token = app.access_token(viewer_id, Role::Viewer);
    let router = build_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/projects")
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({ "name": "nope" }).to_string()))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router
        .oneshot(
            Request::get("/api/v1/audit-logs")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}
