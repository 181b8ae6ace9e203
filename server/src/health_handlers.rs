use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common_auth::{ensure_min_role, AuthContext, Role};
use common_http_errors::{ok, ApiResult};
use serde::Serialize;
use serde_json::json;
use sysinfo::Disks;

use crate::app::AppState;
use crate::queue::{QueueMetrics, QueueName};

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: ComponentHealth,
    pub storage: ComponentHealth,
    pub queue: ComponentHealth,
}

/// `GET /ready` — readiness gate for load balancers: DB `SELECT 1`,
/// storage probe, queue ping, each timed individually.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let database = {
        let start = Instant::now();
        match state.db.ping().await {
            Ok(()) => up(start),
            Err(err) => down(start, err.to_string()),
        }
    };
    let storage = {
        let start = Instant::now();
        match state.storage.health_check().await {
            Ok(()) => up(start),
            Err(err) => down(start, err.to_string()),
        }
    };
    let queue = {
        let start = Instant::now();
        if state.queue.health_check().await {
            up(start)
        } else {
            down(start, "ping failed".to_string())
        }
    };

    let all_up = [&database, &storage, &queue]
        .iter()
        .all(|component| component.status == "up");
    let response = ReadyResponse {
        status: if all_up { "ready" } else { "degraded" },
        database,
        storage,
        queue,
    };
    let status = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(response))
}

/// `GET /api/v1/admin/health` — readiness plus system detail: disk space,
/// queue depths, uptime.
pub async fn admin_health(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;

    let mut queues = serde_json::Map::new();
    for queue in QueueName::ALL {
        let metrics: QueueMetrics = state.queue.get_queue_metrics(queue).await?;
        queues.insert(queue.as_str().to_string(), serde_json::to_value(metrics).unwrap_or_default());
    }

    let disks = Disks::new_with_refreshed_list();
    let disk_info: Vec<_> = disks
        .iter()
        .map(|disk| {
            json!({
                "mount_point": disk.mount_point().to_string_lossy(),
                "available_bytes": disk.available_space(),
                "total_bytes": disk.total_space(),
            })
        })
        .collect();

    Ok(ok(json!({
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "queues": queues,
        "disks": disk_info,
        "audit_entries_dropped": state.audit.dropped_entries(),
        "storage_backend": state.storage.backend_name(),
    })))
}

pub async fn pause_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue): Path<String>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let queue: QueueName = queue.parse().map_err(common_http_errors::ApiError::from)?;
    state.queue.pause(queue).await?;
    Ok(ok(json!({ "queue": queue.as_str(), "paused": true })))
}

pub async fn resume_queue(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(queue): Path<String>,
) -> ApiResult<impl IntoResponse> {
    ensure_min_role(&auth, Role::Admin)?;
    let queue: QueueName = queue.parse().map_err(common_http_errors::ApiError::from)?;
    state.queue.resume(queue).await?;
    Ok(ok(json!({ "queue": queue.as_str(), "paused": false })))
}

fn up(start: Instant) -> ComponentHealth {
    ComponentHealth {
        status: "up",
        response_time_ms: start.elapsed().as_millis() as u64,
        detail: None,
    }
}

fn down(start: Instant, detail: String) -> ComponentHealth {
    ComponentHealth {
        status: "down",
        response_time_ms: start.elapsed().as_millis() as u64,
        detail: Some(detail),
    }
}
