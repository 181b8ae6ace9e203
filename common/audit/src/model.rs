use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One append-only audit row. `user_id` is absent for anonymous and
/// API-key actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, resource: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: None,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            ip_address: None,
            user_agent: None,
            success,
            error_message: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn client(mut self, meta: ClientMeta) -> Self {
        self.ip_address = meta.ip_address;
        self.user_agent = meta.user_agent;
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Pull caller network metadata out of request headers. The first entry of
/// `X-Forwarded-For` wins over the socket address a reverse proxy rewrote.
pub fn client_meta_from_headers(headers: &HeaderMap) -> ClientMeta {
    fn header_str(map: &HeaderMap, name: &str) -> Option<String> {
        map.get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    let ip_address = header_str(headers, "X-Forwarded-For")
        .map(|chain| chain.split(',').next().unwrap_or("").trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, "X-Real-IP"));

    ClientMeta {
        ip_address,
        user_agent: header_str(headers, "User-Agent"),
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink write failed: {0}")]
    Sink(String),
    #[error("audit pipeline closed")]
    Closed,
}

pub type AuditResult<T> = Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("User-Agent", "sdk/1.2".parse().unwrap());
        let meta = client_meta_from_headers(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("sdk/1.2"));
    }

    #[test]
    fn falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "198.51.100.2".parse().unwrap());
        let meta = client_meta_from_headers(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("198.51.100.2"));
        assert!(meta.user_agent.is_none());
    }
}
