//! Application setup and server configuration.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::common::state::AppState;
use crate::config::Config;
use crate::incidents::alert::{AlertSink, LoggingAlertSink};
use crate::incidents::service as incident_service;
use crate::jobs::provider::{MockAdapter, ProviderAdapter, ReplicateAdapter};
use crate::jobs::worker::Worker;

use super::middleware::{
    admin_auth::require_admin_token,
    ip_extractor::extract_client_ip,
    origin_allowlist::enforce_origin_allowlist,
    request_log::log_requests,
    session_auth::session_auth_middleware,
};
use super::routes::{auth, billing, credits, health, incidents, jobs, ops};

fn provider_registry(config: &Config) -> HashMap<String, Arc<dyn ProviderAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert("mock".to_string(), Arc::new(MockAdapter));
    if let Some(token) = &config.replicate_api_token {
        adapters.insert(
            "replicate".to_string(),
            Arc::new(ReplicateAdapter::new(token.clone(), config.replicate_poll_timeout_seconds)),
        );
    }
    adapters
}

/// Builds the router and spawns the worker and incident-SLA background
/// loops. Returns the router together with the `CancellationToken` that
/// stops both loops, so the caller can cancel it on shutdown.
pub fn build_app(pool: PgPool, config: Config) -> (Router, CancellationToken) {
    let alert_sink: Arc<dyn AlertSink> = Arc::new(LoggingAlertSink);
    let state = AppState::new(pool.clone(), config, alert_sink.clone());
    let shutdown = CancellationToken::new();

    if state.config.mvp_worker_enabled {
        let worker = Worker::new(
            pool.clone(),
            state.clone(),
            provider_registry(&state.config),
            state.config.mvp_running_stale_seconds,
        );
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            worker.run(worker_shutdown).await;
        });
    }

    let sla_shutdown = shutdown.clone();
    tokio::spawn(async move {
        incident_service::run_sla_loop(pool, alert_sink, sla_shutdown).await;
    });

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/billing/stripe/webhook", post(billing::stripe_webhook))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness));

    let authenticated_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/credits/balance", get(credits::balance))
        .route("/credits/ledger", get(credits::ledger_history))
        .route("/billing/checkout-session", post(billing::checkout_session))
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job));

    let admin_routes = Router::new()
        .route("/ops/metrics", get(ops::metrics))
        .route("/ops/dead-letters", get(ops::dead_letters))
        .route("/ops/credits/adjust", post(ops::adjust_credits))
        .route("/admin/guardrails/incidents", get(incidents::list_open))
        .route("/admin/guardrails/tasks", get(incidents::list_tasks))
        .route("/admin/guardrails/tasks/:id/status", post(incidents::update_task_status))
        .route("/admin/guardrails/tasks/:id/audit", get(incidents::task_audit))
        .route("/admin/guardrails/tasks/batch/done", post(incidents::batch_done))
        .route("/admin/guardrails/tasks/batch/postpone", post(incidents::batch_postpone))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_token));

    let api = Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .merge(admin_routes);

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    #[cfg(not(debug_assertions))]
    let rate_limit_layer = {
        use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
        let rate_limit_config = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(20)
                .use_headers()
                .finish()
                .expect("rate limiter configuration is valid"),
        );
        GovernorLayer { config: rate_limit_config }
    };

    let router = Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(state.clone(), session_auth_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_origin_allowlist))
        .layer(middleware::from_fn(extract_client_ip))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    #[cfg(not(debug_assertions))]
    let router = router.layer(rate_limit_layer);

    (router.with_state(state), shutdown)
}
