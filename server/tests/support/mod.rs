#![allow(dead_code)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bugspotter_server::app::AppState;
use bugspotter_server::config::{
    AppConfig, DbConfig, QueueConfig, RateLimitConfig, RetentionScheduleConfig, StorageConfig,
};
use bugspotter_server::db::audit_logs::PgAuditSink;
use bugspotter_server::db::{self, Database};
use bugspotter_server::metrics::ServerMetrics;
use bugspotter_server::queue::JobQueue;
use bugspotter_server::rate_limiter::InMemoryRateLimiter;
use bugspotter_server::retention::RetentionEngine;
use bugspotter_server::storage::local::LocalStorage;
use common_audit::{AuditPipeline, PipelineConfig};
use common_auth::{hash_password, JwtConfig, JwtSigner, JwtVerifier, Role};
use tempfile::TempDir;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// External services for integration tests come from the environment,
/// mirroring how deployments are configured. Tests that need them are
/// ignored unless the `integration` feature is on.
pub struct TestApp {
    pub state: AppState,
    pub db: Database,
    #[allow(dead_code)]
    storage_dir: TempDir,
}

impl TestApp {
    pub async fn bootstrap() -> Result<Option<Self>> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping integration test");
            return Ok(None);
        };
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let db_config = DbConfig {
            url: database_url,
            pool_min: 1,
            pool_max: 5,
            connect_timeout_ms: 5_000,
            idle_timeout_ms: 60_000,
            query_timeout_ms: 10_000,
        };
        let db = Database::connect(&db_config).await.context("connect test db")?;
        db::migrations::run(db.pool()).await.context("run migrations")?;

        let storage_dir = tempfile::tempdir()?;
        let storage = Arc::new(
            LocalStorage::init(
                storage_dir.path().to_str().unwrap(),
                "http://localhost:8080/storage",
            )
            .await
            .context("init local storage")?,
        );

        let queue = JobQueue::connect(&redis_url, 3).await.context("connect redis")?;

        let jwt_config = JwtConfig::new(TEST_JWT_SECRET).expect("test secret is long enough");
        let jwt_signer = Arc::new(JwtSigner::new(&jwt_config));
        let jwt_verifier = Arc::new(JwtVerifier::new(&jwt_config));

        let (audit, _drain) = AuditPipeline::spawn(
            Arc::new(PgAuditSink::new(db.clone())),
            PipelineConfig::default(),
        );

        let retention = Arc::new(RetentionEngine::new(
            db.clone(),
            storage.clone(),
            queue.clone(),
            audit.clone(),
            TEST_JWT_SECRET.to_string(),
        ));

        let config = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database: db_config,
            storage: StorageConfig::Local {
                base_dir: storage_dir.path().to_string_lossy().to_string(),
                base_url: "http://localhost:8080/storage".to_string(),
            },
            queue: QueueConfig {
                redis_url,
                backpressure_limit: 1_000,
                job_timeout_secs: 60,
                default_max_attempts: 3,
                replay_chunk_events: 500,
            },
            jwt_secret: TEST_JWT_SECRET.to_string(),
            jwt_access_ttl_secs: None,
            jwt_refresh_ttl_secs: None,
            rate_limit: RateLimitConfig { max: 1_000, window_secs: 60 },
            cors_origins: Vec::new(),
            retention_schedule: RetentionScheduleConfig { hour: 2, minute: 0, enabled: false },
            request_timeout_secs: 30,
            shutdown_grace_secs: 5,
            notification_webhook_url: None,
            notification_webhook_bearer: None,
        };

        let state = AppState {
            db: db.clone(),
            storage,
            queue,
            jwt_verifier,
            jwt_signer,
            jwt_config: Arc::new(jwt_config),
            rate_limiter: Arc::new(InMemoryRateLimiter::new(60)),
            audit,
            retention,
            metrics: Arc::new(ServerMetrics::new()?),
            config: Arc::new(config),
            started_at: Instant::now(),
        };

        Ok(Some(Self { state, db, storage_dir }))
    }

    /// Seed a user and return (id, email, password).
    pub async fn seed_user(&self, role: Role) -> Result<(Uuid, String, String)> {
        let email = format!("{}-{}@test.example", role.as_str(), Uuid::new_v4());
        let password = "correct-horse-battery".to_string();
        let user = db::users::create(
            &self.db,
            db::users::NewUser {
                email: email.clone(),
                name: format!("{role} fixture"),
                role,
                credential: db::users::Credential::Password {
                    hash: hash_password(&password)?,
                },
            },
        )
        .await?;
        Ok((user.id, email, password))
    }

    pub async fn seed_project(&self, owner: Option<Uuid>) -> Result<db::projects::Project> {
        let project = db::projects::create(
            &self.db,
            db::projects::NewProject {
                name: format!("project-{}", Uuid::new_v4()),
                owner_id: owner,
                settings: None,
            },
        )
        .await?;
        Ok(project)
    }

    pub fn access_token(&self, user_id: Uuid, role: Role) -> String {
        self.state
            .jwt_signer
            .issue_access_token(user_id, role)
            .expect("sign test token")
            .token
    }
}
