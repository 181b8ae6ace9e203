use std::env;

use anyhow::{anyhow, Context, Result};

/// Storage backend selection plus its credentials envelope.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        base_dir: String,
        base_url: String,
    },
    S3 {
        endpoint: Option<String>,
        region: String,
        bucket: String,
        access_key_id: String,
        secret_access_key: String,
        force_path_style: bool,
        sse: Option<String>,
        sse_kms_key_id: Option<String>,
        storage_class: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Waiting jobs per ingestion queue before 503 QueueBackpressure.
    pub backpressure_limit: u64,
    pub job_timeout_secs: u64,
    pub default_max_attempts: u32,
    pub replay_chunk_events: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RetentionScheduleConfig {
    /// Local wall-clock hour/minute of the daily run.
    pub hour: u32,
    pub minute: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DbConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub jwt_secret: String,
    pub jwt_access_ttl_secs: Option<i64>,
    pub jwt_refresh_ttl_secs: Option<i64>,
    pub rate_limit: RateLimitConfig,
    pub cors_origins: Vec<String>,
    pub retention_schedule: RetentionScheduleConfig,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub notification_webhook_url: Option<String>,
    pub notification_webhook_bearer: Option<String>,
}

pub fn load_app_config() -> Result<AppConfig> {
    let database = DbConfig {
        url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
        pool_min: parse_env("DB_POOL_MIN")?.unwrap_or(2),
        pool_max: parse_env("DB_POOL_MAX")?.unwrap_or(10),
        connect_timeout_ms: parse_env("DB_CONNECTION_TIMEOUT_MS")?.unwrap_or(5_000),
        idle_timeout_ms: parse_env("DB_IDLE_TIMEOUT_MS")?.unwrap_or(60_000),
        query_timeout_ms: parse_env("DB_QUERY_TIMEOUT_MS")?.unwrap_or(10_000),
    };

    let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    if jwt_secret.len() < 32 {
        return Err(anyhow!("JWT_SECRET must be at least 32 bytes"));
    }

    let storage = load_storage_config()?;

    let queue = QueueConfig {
        redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        backpressure_limit: parse_env("QUEUE_BACKPRESSURE_LIMIT")?.unwrap_or(1_000),
        job_timeout_secs: parse_env("QUEUE_JOB_TIMEOUT_SECONDS")?.unwrap_or(300),
        default_max_attempts: parse_env("QUEUE_MAX_ATTEMPTS")?.unwrap_or(3),
        replay_chunk_events: parse_env("REPLAY_CHUNK_EVENTS")?.unwrap_or(500),
    };

    let rate_limit = RateLimitConfig {
        max: parse_env("RATE_LIMIT_MAX")?.unwrap_or(100),
        window_secs: parse_env("RATE_LIMIT_TIME_WINDOW")?.unwrap_or(60),
    };

    let retention_schedule = RetentionScheduleConfig {
        hour: parse_env("RETENTION_SCHEDULE_HOUR")?.unwrap_or(2),
        minute: parse_env("RETENTION_SCHEDULE_MINUTE")?.unwrap_or(0),
        enabled: bool_from_env("RETENTION_SCHEDULER_ENABLED").unwrap_or(true),
    };

    Ok(AppConfig {
        host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: parse_env("PORT")?.unwrap_or(8080),
        database,
        storage,
        queue,
        jwt_secret,
        jwt_access_ttl_secs: parse_env("JWT_EXPIRES_IN")?,
        jwt_refresh_ttl_secs: parse_env("JWT_REFRESH_EXPIRES_IN")?,
        rate_limit,
        cors_origins: env::var("CORS_ORIGINS")
            .ok()
            .map(|value| parse_list(&value))
            .unwrap_or_default(),
        retention_schedule,
        request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECONDS")?.unwrap_or(30),
        shutdown_grace_secs: parse_env("SHUTDOWN_GRACE_SECONDS")?.unwrap_or(30),
        notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        notification_webhook_bearer: env::var("NOTIFICATION_WEBHOOK_BEARER")
            .ok()
            .and_then(|value| normalize_optional(&value)),
    })
}

fn load_storage_config() -> Result<StorageConfig> {
    let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
    match backend.trim().to_ascii_lowercase().as_str() {
        "local" => Ok(StorageConfig::Local {
            base_dir: env::var("STORAGE_BASE_DIR").unwrap_or_else(|_| "./data/storage".to_string()),
            base_url: env::var("STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/storage".to_string()),
        }),
        "s3" => Ok(StorageConfig::S3 {
            endpoint: env::var("S3_ENDPOINT").ok().and_then(|v| normalize_optional(&v)),
            region: env::var("S3_REGION").context("S3_REGION must be set for s3 backend")?,
            bucket: env::var("S3_BUCKET").context("S3_BUCKET must be set for s3 backend")?,
            access_key_id: env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID must be set for s3 backend")?,
            secret_access_key: env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY must be set for s3 backend")?,
            force_path_style: bool_from_env("S3_FORCE_PATH_STYLE").unwrap_or(false),
            sse: env::var("S3_SSE").ok().and_then(|v| normalize_optional(&v)),
            sse_kms_key_id: env::var("S3_SSE_KMS_KEY_ID")
                .ok()
                .and_then(|v| normalize_optional(&v)),
            storage_class: env::var("S3_STORAGE_CLASS")
                .ok()
                .and_then(|v| normalize_optional(&v)),
        }),
        other => Err(anyhow!(
            "Unsupported STORAGE_BACKEND '{other}'. Use 'local' or 's3'."
        )),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<T>()
                .map(Some)
                .map_err(|err| anyhow!("Failed to parse {key}='{trimmed}': {err}"))
        }
        Err(_) => Ok(None),
    }
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_drops_empties() {
        let origins = parse_list("http://a.example, http://b.example,,");
        assert_eq!(origins, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn bool_from_env_parses() {
        env::set_var("CONFIG_TEST_BOOL_ON", "on");
        env::set_var("CONFIG_TEST_BOOL_OFF", "no");
        assert_eq!(bool_from_env("CONFIG_TEST_BOOL_ON"), Some(true));
        assert_eq!(bool_from_env("CONFIG_TEST_BOOL_OFF"), Some(false));
        assert_eq!(bool_from_env("CONFIG_TEST_BOOL_MISSING"), None);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        env::set_var("CONFIG_TEST_PORT", "not-a-port");
        assert!(parse_env::<u16>("CONFIG_TEST_PORT").is_err());
        env::set_var("CONFIG_TEST_PORT", "8080");
        assert_eq!(parse_env::<u16>("CONFIG_TEST_PORT").unwrap(), Some(8080));
    }
}
