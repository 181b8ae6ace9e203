use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use common_audit::{client_meta_from_headers, AuditEntry};

use crate::app::AppState;

/// Post-response hook: every API request becomes an audit entry without
/// blocking the response path. The entry carries the verified user when a
/// bearer token is present and valid; API-key and anonymous traffic is
/// recorded without one.
pub async fn audit_layer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let meta = client_meta_from_headers(req.headers());

    let user_id = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .and_then(|token| state.jwt_verifier.verify(token.trim()).ok())
        .map(|claims| claims.subject);

    let response = next.run(req).await;

    let status = response.status();
    if status.as_u16() >= 400 {
        let code = response
            .headers()
            .get("X-Error-Code")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown");
        state
            .metrics
            .http_errors_total
            .with_label_values(&[code, status.as_str()])
            .inc();
    }

    let mut entry = AuditEntry::new(method.to_string(), path, status.as_u16() < 400)
        .client(meta)
        .details(serde_json::json!({ "status": status.as_u16() }));
    if let Some(user_id) = user_id {
        entry = entry.user(user_id);
    }
    if status.as_u16() >= 400 {
        entry.error_message = Some(format!("HTTP {status}"));
    }
    state.audit.record(entry);

    response
}
