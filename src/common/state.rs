use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use sqlx::PgPool;

use crate::auth::LoginLimiter;
use crate::config::Config;
use crate::incidents::alert::AlertSink;

/// Shared axum state. One instance lives for the process and is cloned
/// (cheaply, via `Arc`/`PgPool`'s internal pool) into every request.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub alert_sink: Arc<dyn AlertSink>,
    pub login_limiter: Arc<LoginLimiter>,
    heartbeat: Arc<AtomicI64>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config, alert_sink: Arc<dyn AlertSink>) -> Self {
        let login_limiter = Arc::new(LoginLimiter::new(
            config.auth_login_window_seconds,
            config.auth_login_max_attempts,
            config.auth_login_lock_seconds,
        ));
        Self {
            db,
            config: Arc::new(config),
            alert_sink,
            login_limiter,
            heartbeat: Arc::new(AtomicI64::new(chrono::Utc::now().timestamp())),
        }
    }

    /// Called by the worker loop on every poll, successful or not.
    pub fn record_heartbeat(&self) {
        self.heartbeat.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Seconds since the worker last polled. Used by the readiness probe.
    pub fn heartbeat_age_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp() - self.heartbeat.load(Ordering::Relaxed)
    }
}
