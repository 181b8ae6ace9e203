use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub current: i64,
}

/// Fixed-window counter keyed per project. Redis in production so every
/// replica shares the window; in-memory for tests and single-node dev.
#[async_trait]
pub trait RateLimiterEngine: Send + Sync {
    async fn check(&self, key: &str, limit: u32) -> Result<RateDecision>;
}

#[derive(Clone)]
pub struct RedisRateLimiter {
    manager: ConnectionManager,
    window_secs: u64,
    prefix: String,
}

impl RedisRateLimiter {
    pub async fn new(redis_url: &str, window_secs: u64, prefix: String) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self { manager, window_secs, prefix })
    }
}

#[async_trait]
impl RateLimiterEngine for RedisRateLimiter {
    async fn check(&self, key: &str, limit: u32) -> Result<RateDecision> {
        let redis_key = format!("{}:{}", self.prefix, key);
        let mut conn = self.manager.clone();
        let current: i64 = conn.incr(&redis_key, 1).await?;
        if current == 1 {
            let _: () = conn.expire(&redis_key, self.window_secs as i64).await?;
        }
        let allowed = current <= limit as i64;
        Ok(RateDecision { allowed, current })
    }
}

#[derive(Clone)]
pub struct InMemoryRateLimiter {
    inner: Arc<Mutex<HashMap<String, (i64, std::time::Instant)>>>,
    window_secs: u64,
}

impl InMemoryRateLimiter {
    pub fn new(window_secs: u64) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), window_secs }
    }
}

#[async_trait]
impl RateLimiterEngine for InMemoryRateLimiter {
    async fn check(&self, key: &str, limit: u32) -> Result<RateDecision> {
        let mut guard = self.inner.lock().await;
        let now = std::time::Instant::now();
        let window = std::time::Duration::from_secs(self.window_secs);
        let entry = guard.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= window {
            *entry = (0, now);
        }
        entry.0 += 1;
        let current = entry.0;
        let allowed = current <= limit as i64;
        Ok(RateDecision { allowed, current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_limiter_enforces_window() {
        let limiter = InMemoryRateLimiter::new(60);
        for _ in 0..3 {
            assert!(limiter.check("project-a", 3).await.unwrap().allowed);
        }
        let decision = limiter.check("project-a", 3).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.current, 4);

        // Another key has its own window.
        assert!(limiter.check("project-b", 3).await.unwrap().allowed);
    }
}
