use std::sync::Arc;

use redis::Client as RedisClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundportal_api::{config::Config, db, routes, services::metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    // Connections are opened per use; the login limiter fails open without Redis.
    let redis_client = RedisClient::open(config.redis_url.as_str())?;

    let state = AppState::new(pool.clone(), redis_client, config.clone());
    if state.email.is_some() {
        info!("SMTP email service configured");
    } else {
        info!("SMTP not configured, notification emails disabled");
    }

    metrics::start(pool);

    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Fund portal API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
