use anyhow::{Context, Result};
use creditworks_core::{server::app::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,creditworks_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting creditworks API");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!("configuration loaded");

    tracing::info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("database connected");

    tracing::info!("running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
    tracing::info!("migrations complete");

    let port = config.port;
    let (app, shutdown) = build_app(pool, config);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind to address")?;

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
