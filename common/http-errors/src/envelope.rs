use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Success envelope shared by every endpoint: `{success, data, timestamp}`
/// plus `pagination` on list responses.
#[derive(Serialize, Debug)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(limit as u64)
        };
        Self { page, limit, total, total_pages }
    }
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data, timestamp: Utc::now(), pagination: None })
}

pub fn ok_paginated<T: Serialize>(data: T, pagination: Pagination) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        timestamp: Utc::now(),
        pagination: Some(pagination),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_up() {
        let p = Pagination::new(1, 100, 101);
        assert_eq!(p.total_pages, 2);
        let p = Pagination::new(1, 100, 0);
        assert_eq!(p.total_pages, 0);
        let p = Pagination::new(2, 50, 100);
        assert_eq!(p.total_pages, 2);
    }
}
