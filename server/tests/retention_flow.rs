mod support;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bugspotter_server::app::build_router;
use bugspotter_server::retention::ApplyOptions;
use common_auth::Role;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use support::TestApp;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

async fn backdate_report(app: &TestApp, report_id: Uuid, days: i64) -> Result<()> {
    sqlx::query("UPDATE bug_reports SET created_at = NOW() - make_interval(days => $2) WHERE id = $1")
        .bind(report_id)
        .bind(days as i32)
        .execute(app.db.pool())
        .await?;
    Ok(())
}

fn policy_body(days: i64, region: &str, classification: &str, tier: &str) -> Value {
    json!({
        "bug_report_retention_days": days,
        "screenshot_retention_days": days,
        "replay_retention_days": days,
        "attachment_retention_days": days,
        "archived_retention_days": days,
        "archive_before_delete": false,
        "data_classification": classification,
        "compliance_region": region,
        "tier": tier
    })
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn eu_financial_floor_rejects_short_retention() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let (admin_id, _, _) = app.seed_user(Role::Admin).await?;
    let project = app.seed_project(Some(admin_id)).await?;
    let token = app.access_token(admin_id, Role::Admin);
    let router = build_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(
            Request::put(format!("/api/v1/projects/{}/retention-policy", project.id))
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    policy_body(30, "eu", "financial", "professional").to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "compliance_violation");

    // At the 365-day floor the same request is accepted.
    let response = router
        .oneshot(
            Request::put(format!("/api/v1/projects/{}/retention-policy", project.id))
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(
                    policy_body(365, "eu", "financial", "professional").to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn legal_hold_blocks_retention_until_cleared() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let (admin_id, _, _) = app.seed_user(Role::Admin).await?;
    let project = app.seed_project(Some(admin_id)).await?;

    // 90-day policy, report aged 200 days.
    bugspotter_server::db::retention_policies::upsert(
        &app.db,
        bugspotter_server::db::retention_policies::UpsertRetentionPolicy {
            project_id: project.id,
            bug_report_retention_days: 90,
            screenshot_retention_days: 90,
            replay_retention_days: 90,
            attachment_retention_days: 90,
            archived_retention_days: 90,
            archive_before_delete: false,
            data_classification: "general".to_string(),
            compliance_region: "none".to_string(),
            tier: "professional".to_string(),
        },
    )
    .await?;

    let report = bugspotter_server::db::bug_reports::create(
        &app.db,
        bugspotter_server::db::bug_reports::NewBugReport {
            project_id: project.id,
            title: "old report".to_string(),
            description: None,
            status: None,
            priority: None,
            metadata: None,
            retention_class: None,
        },
    )
    .await?;
    backdate_report(&app, report.id, 200).await?;

    app.state
        .retention
        .apply_legal_hold(Some(admin_id), &[report.id], true)
        .await?;

    let stats = app
        .state
        .retention
        .apply(ApplyOptions { dry_run: false, confirm: true, ..Default::default() })
        .await?;
    assert!(
        bugspotter_server::db::bug_reports::find_by_id(&app.db, report.id)
            .await?
            .is_some(),
        "held report must survive"
    );

    // Clearing the hold makes the next cycle remove it.
    app.state
        .retention
        .apply_legal_hold(Some(admin_id), &[report.id], false)
        .await?;
    let stats2 = app
        .state
        .retention
        .apply(ApplyOptions { dry_run: false, confirm: true, ..Default::default() })
        .await?;
    assert!(stats2.total_deleted >= 1, "stats: {stats:?} then {stats2:?}");
    assert!(
        bugspotter_server::db::bug_reports::find_by_id(&app.db, report.id)
            .await?
            .is_none(),
        "released report must be removed"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres + Redis)"
)]
async fn apply_without_confirm_is_refused() -> Result<()> {
    let Some(app) = TestApp::bootstrap().await? else { return Ok(()) };
    let err = app
        .state
        .retention
        .apply(ApplyOptions { dry_run: false, confirm: false, ..Default::default() })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("confirm"));

    // Dry run needs no confirmation and must not mutate.
    let (admin_id, _, _) = app.seed_user(Role::Admin).await?;
    let project = app.seed_project(Some(admin_id)).await?;
    let report = bugspotter_server::db::bug_reports::create(
        &app.db,
        bugspotter_server::db::bug_reports::NewBugReport {
            project_id: project.id,
            title: "fresh".to_string(),
            description: None,
            status: None,
            priority: None,
            metadata: None,
            retention_class: None,
        },
    )
    .await?;
    let _ = app
        .state
        .retention
        .apply(ApplyOptions { dry_run: true, confirm: false, ..Default::default() })
        .await?;
    assert!(
        bugspotter_server::db::bug_reports::find_by_id(&app.db, report.id)
            .await?
            .is_some()
    );
    Ok(())
}
