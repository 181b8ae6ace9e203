mod support;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
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

fn ingest_body() -> Value {
    json!({
        "title": "Btn broken",
        "description": "no click",
        "report": {
            "consoleLogs": [],
            "networkRequests": [],
            "browserMetadata": {
                "userAgent": "UA",
                "viewport": {"width": 1024, "height": 768},
                "browser": "X",
                "os": "Y",
                "url": "http://e",
                "timestamp": 0
            }
        }
    })
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn ingestion_happy_path_returns_201_with_id() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let project = app.seed_project(None).await?;
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/reports")
                .header("X-API-Key", &project.api_key)
                .header("content-type", "application/json")
                .body(Body::from(ingest_body().to_string()))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["success"], Value::Bool(true));
    let id = json["data"]["id"].as_str().expect("report id");
    uuid::Uuid::parse_str(id)?;

    let row = bugspotter_server::db::bug_reports::find_by_id(
        &app.db,
        uuid::Uuid::parse_str(id)?,
    )
    .await?
    .expect("row persisted");
    assert_eq!(row.status, "open");
    assert_eq!(row.priority, "medium");
    assert_eq!(row.project_id, project.id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn ingestion_rejects_unknown_api_key() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/reports")
                .header("X-API-Key", "bgs_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
                .header("content-type", "application/json")
                .body(Body::from(ingest_body().to_string()))?,
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
async fn hostile_sort_key_is_rejected_before_sql() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let (admin_id, _, _) = app.seed_user(Role::Admin).await?;
    let token = app.access_token(admin_id, Role::Admin);
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(
            Request::get(
                "/api/v1/reports?sort_by=created_at%3B%20DROP%20TABLE%20bug_reports--",
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_identifier");

    // The table is still there.
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bug_reports")
        .fetch_one(app.db.pool())
        .await?;
    assert!(count.0 >= 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn pagination_limit_cap_is_enforced() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let (admin_id, _, _) = app.seed_user(Role::Admin).await?;
    let token = app.access_token(admin_id, Role::Admin);

    let router = build_router(app.state.clone());
    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/reports?limit=1000")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::get("/api/v1/reports?limit=1001")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "invalid_pagination");
    Ok(())
}
