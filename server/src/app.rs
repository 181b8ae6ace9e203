use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{FromRef, Request, State};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use common_audit::AuditRecorder;
use common_auth::{JwtConfig, JwtSigner, JwtVerifier};
use common_http_errors::ApiError;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::AppConfig;
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiterEngine;
use crate::retention::RetentionEngine;
use crate::storage::ObjectStorage;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: Arc<dyn ObjectStorage>,
    pub queue: JobQueue,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub jwt_signer: Arc<JwtSigner>,
    pub jwt_config: Arc<JwtConfig>,
    pub rate_limiter: Arc<dyn RateLimiterEngine>,
    pub audit: AuditRecorder,
    pub retention: Arc<RetentionEngine>,
    pub metrics: Arc<ServerMetrics>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_verifier.clone()
    }
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    state
        .metrics
        .audit_entries_dropped
        .set(state.audit.dropped_entries() as i64);
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            warn!(?err, "Failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .body(axum::body::Body::from("metrics unavailable"))
                .expect("failed to build metrics response")
        }
    }
}

/// Hard request deadline; exceeding it returns 504.
async fn request_timeout_layer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let limit = Duration::from_secs(state.config.request_timeout_secs);
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_elapsed) => {
            warn!("request exceeded the {}s deadline", limit.as_secs());
            (
                StatusCode::GATEWAY_TIMEOUT,
                ApiError::unavailable("request_timeout", "The request timed out").into_response(),
            )
                .into_response()
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let api = Router::new()
        // Setup and auth are reachable before any credential exists.
        .route("/setup/status", get(crate::setup_handlers::setup_status))
        .route("/setup/initialize", post(crate::setup_handlers::initialize))
        .route("/auth/login", post(crate::auth_handlers::login))
        .route("/auth/refresh", post(crate::auth_handlers::refresh))
        .route("/auth/logout", post(crate::auth_handlers::logout))
        // Ingestion authenticates with the project API key.
        .route(
            "/reports",
            post(crate::report_handlers::ingest_report).get(crate::report_handlers::list_reports),
        )
        .route(
            "/reports/restore",
            post(crate::report_handlers::restore_reports),
        )
        .route(
            "/reports/:report_id",
            get(crate::report_handlers::get_report)
                .put(crate::report_handlers::update_report)
                .delete(crate::report_handlers::delete_report),
        )
        .route(
            "/reports/:report_id/screenshot-url",
            get(crate::report_handlers::screenshot_url),
        )
        .route(
            "/reports/:report_id/sessions",
            get(crate::session_handlers::list_sessions),
        )
        .route(
            "/reports/:report_id/tickets",
            post(crate::ticket_handlers::create_ticket).get(crate::ticket_handlers::list_tickets),
        )
        .route(
            "/sessions/:session_id",
            get(crate::session_handlers::get_session)
                .delete(crate::session_handlers::delete_session),
        )
        .route(
            "/tickets/:ticket_id",
            axum::routing::delete(crate::ticket_handlers::delete_ticket),
        )
        .route(
            "/projects",
            post(crate::project_handlers::create_project).get(crate::project_handlers::list_projects),
        )
        .route(
            "/projects/:project_id",
            get(crate::project_handlers::get_project)
                .put(crate::project_handlers::update_project)
                .delete(crate::project_handlers::delete_project),
        )
        .route(
            "/projects/:project_id/regenerate-key",
            post(crate::project_handlers::regenerate_api_key),
        )
        .route(
            "/projects/:project_id/retention-policy",
            get(crate::retention_handlers::get_policy).put(crate::retention_handlers::put_policy),
        )
        .route(
            "/users",
            post(crate::user_handlers::create_user).get(crate::user_handlers::list_users),
        )
        .route(
            "/users/:user_id",
            get(crate::user_handlers::get_user)
                .put(crate::user_handlers::update_user)
                .delete(crate::user_handlers::deactivate_user),
        )
        .route(
            "/settings",
            get(crate::settings_handlers::get_settings).put(crate::settings_handlers::update_settings),
        )
        .route("/audit-logs", get(crate::audit_handlers::list_audit_logs))
        .route("/audit-logs/stats", get(crate::audit_handlers::audit_stats))
        .route("/retention/preview", post(crate::retention_handlers::preview))
        .route("/retention/apply", post(crate::retention_handlers::apply))
        .route(
            "/retention/legal-hold",
            post(crate::retention_handlers::legal_hold),
        )
        .route("/admin/health", get(crate::health_handlers::admin_health))
        .route(
            "/admin/queues/:queue/pause",
            post(crate::health_handlers::pause_queue),
        )
        .route(
            "/admin/queues/:queue/resume",
            post(crate::health_handlers::resume_queue),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::audit_capture::audit_layer,
        ));

    Router::new()
        .route("/health", get(crate::health_handlers::health))
        .route("/ready", get(crate::health_handlers::ready))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            request_timeout_layer,
        ))
        .with_state(state)
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true);

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(AllowOrigin::list([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5173"),
        ]))
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}
