//! Test harness with testcontainers for integration testing.
//!
//! A single Postgres container and migration run are shared across the
//! whole test binary; each test gets its own connection pool and `AppState`
//! but reuses the database underneath.

use std::sync::Arc;

use anyhow::{Context, Result};
use creditworks_core::common::state::AppState;
use creditworks_core::config::Config;
use creditworks_core::incidents::alert::NoopAlertSink;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedTestInfra {
    db_url: String,
    // Keeps the container alive for the entire test run.
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default().start().await.context("failed to start postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url).await.context("failed to connect for migrations")?;
        sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
        pool.close().await;

        Ok(Self { db_url, _postgres: postgres })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA.get_or_init(|| async { Self::init().await.expect("failed to init shared test infra") }).await
    }
}

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        port: 0,
        stripe_webhook_secret: "whsec_test".to_string(),
        stripe_secret_key: "sk_test".to_string(),
        stripe_credit_price_cents: 100,
        admin_token: "test-admin-token".to_string(),
        auth_session_days: 30,
        auth_login_max_attempts: 8,
        auth_login_window_seconds: 900,
        auth_login_lock_seconds: 900,
        auth_origin_allowlist: Vec::new(),
        mvp_worker_enabled: false,
        mvp_running_stale_seconds: 60,
        replicate_api_token: None,
        replicate_poll_timeout_seconds: 5,
        ops_alert_email: None,
        ops_slack_webhook_url: None,
    }
}

pub struct TestHarness {
    pub db: PgPool,
    pub state: AppState,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db = PgPool::connect(&infra.db_url).await.context("failed to connect test pool")?;
        let state = AppState::new(db.clone(), test_config(), Arc::new(NoopAlertSink));
        Ok(Self { db, state })
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("failed to create test harness")
    }

    async fn teardown(self) {
        self.db.close().await;
    }
}
