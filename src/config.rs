use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    pub stripe_webhook_secret: String,
    pub stripe_secret_key: String,
    pub stripe_credit_price_cents: i64,

    pub admin_token: String,

    pub auth_session_days: i64,
    pub auth_login_max_attempts: u32,
    pub auth_login_window_seconds: i64,
    pub auth_login_lock_seconds: i64,
    pub auth_origin_allowlist: Vec<String>,

    pub mvp_worker_enabled: bool,
    pub mvp_running_stale_seconds: i64,

    pub replicate_api_token: Option<String>,
    pub replicate_poll_timeout_seconds: u64,

    pub ops_alert_email: Option<String>,
    pub ops_slack_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, falling back to `.env` in development.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env_or("PORT", "8080")?.parse().context("PORT must be a valid number")?,

            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .context("STRIPE_WEBHOOK_SECRET must be set")?,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .context("STRIPE_SECRET_KEY must be set")?,
            stripe_credit_price_cents: env_or("STRIPE_CREDIT_PRICE_CENTS", "100")?
                .parse()
                .context("STRIPE_CREDIT_PRICE_CENTS must be a valid number")?,

            admin_token: env::var("ADMIN_TOKEN").context("ADMIN_TOKEN must be set")?,

            auth_session_days: env_or("AUTH_SESSION_DAYS", "30")?
                .parse()
                .context("AUTH_SESSION_DAYS must be a valid number")?,
            auth_login_max_attempts: env_or("AUTH_LOGIN_MAX_ATTEMPTS", "8")?
                .parse()
                .context("AUTH_LOGIN_MAX_ATTEMPTS must be a valid number")?,
            auth_login_window_seconds: env_or("AUTH_LOGIN_WINDOW_SECONDS", "900")?
                .parse()
                .context("AUTH_LOGIN_WINDOW_SECONDS must be a valid number")?,
            auth_login_lock_seconds: env_or("AUTH_LOGIN_LOCK_SECONDS", "900")?
                .parse()
                .context("AUTH_LOGIN_LOCK_SECONDS must be a valid number")?,
            auth_origin_allowlist: env::var("AUTH_ORIGIN_ALLOWLIST")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            mvp_worker_enabled: env_or("MVP_WORKER_ENABLED", "true")?
                .parse()
                .context("MVP_WORKER_ENABLED must be true/false")?,
            mvp_running_stale_seconds: env_or("MVP_RUNNING_STALE_SECONDS", "120")?
                .parse()
                .context("MVP_RUNNING_STALE_SECONDS must be a valid number")?,

            replicate_api_token: env::var("REPLICATE_API_TOKEN").ok(),
            replicate_poll_timeout_seconds: env_or("REPLICATE_POLL_TIMEOUT_SECONDS", "180")?
                .parse()
                .context("REPLICATE_POLL_TIMEOUT_SECONDS must be a valid number")?,

            ops_alert_email: env::var("OPS_ALERT_EMAIL").ok(),
            ops_slack_webhook_url: env::var("OPS_SLACK_WEBHOOK_URL").ok(),
        })
    }
}

fn env_or(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}
