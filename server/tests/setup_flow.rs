mod support;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bugspotter_server::app::build_router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use support::TestApp;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn setup_initializes_once_then_conflicts() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };

    // Start from a pristine instance regardless of prior test runs.
    sqlx::query("UPDATE instance_settings SET initialized = FALSE WHERE id = TRUE")
        .execute(app.db.pool())
        .await?;

    let router = build_router(app.state.clone());
    let body = json!({
        "admin_email": format!("root-{}@test.example", uuid::Uuid::new_v4()),
        "admin_name": "First Admin",
        "admin_password": "initial-admin-pass",
        "instance_name": "BugSpotter Test"
    });

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/setup/status").body(Body::empty())?,
        )
        .await?;
    let json = body_json(response).await;
    assert_eq!(json["data"]["initialized"], Value::Bool(false));

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/setup/initialize")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .oneshot(
            Request::post("/api/v1/setup/initialize")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "already_initialized");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn health_and_ready_respond() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let router = build_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::get("/ready").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["database"]["status"], "up");
    assert_eq!(json["storage"]["status"], "up");
    assert_eq!(json["queue"]["status"], "up");
    Ok(())
}
