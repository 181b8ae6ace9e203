use axum::http::StatusCode;
use axum::response::IntoResponse;
use common_http_errors::ApiError;
use http_body_util::BodyExt;
use serde_json::Value;

async fn body_json(err: ApiError) -> (StatusCode, Option<String>, Value) {
    let resp = err.into_response();
    let status = resp.status();
    let header = resp
        .headers()
        .get("X-Error-Code")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    (status, header, json)
}

#[tokio::test]
async fn validation_maps_to_400_with_envelope() {
    let (status, header, json) =
        body_json(ApiError::validation("invalid_identifier", "bad sort key")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(header.as_deref(), Some("invalid_identifier"));
    assert_eq!(json["success"], Value::Bool(false));
    assert_eq!(json["code"], "invalid_identifier");
    assert_eq!(json["error"], "bad sort key");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn compliance_violation_maps_to_422() {
    let (status, _, json) = body_json(ApiError::compliance("floor is 365 days")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "compliance_violation");
}

#[tokio::test]
async fn missing_role_carries_role_field() {
    let (status, _, json) = body_json(ApiError::ForbiddenMissingRole { role: "admin" }).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["missing_role"], "admin");
}

#[tokio::test]
async fn busy_and_unavailable_map_to_503() {
    let (status, _, _) = body_json(ApiError::busy("pool_exhausted", "try again")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _, _) = body_json(ApiError::unavailable("queue_unavailable", "redis down")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn upstream_storage_maps_to_502() {
    let err = ApiError::Storage {
        code: "storage_connection",
        message: "endpoint unreachable".into(),
        upstream: true,
    };
    let (status, _, _) = body_json(err).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn internal_hides_detail_but_exposes_error_id() {
    let (err, id) = ApiError::internal();
    let (status, _, json) = body_json(err).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error_id"], id.to_string());
    assert!(!json["error"].as_str().unwrap().contains("panic"));
}
