use std::time::Duration;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paylink_server::{
    config::ServerConfig, db::now_ms, db::Database, metrics::register_metrics, routes,
    state::AppState, validation::warn_insecure_webhooks,
};

const GRANT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting paylink-server on port {}", port);
    tracing::info!("Receiving address: {:#x}", config.receiving_address);
    tracing::info!("Network: {}", config.chain.network);
    tracing::info!("Facilitator URL: {}", config.facilitator_url);
    tracing::info!(
        content = %config.prices.content.display,
        download = %config.prices.download.display,
        profile_payment = %config.prices.profile_payment.display,
        "Prices"
    );
    warn_insecure_webhooks(&config.webhook_urls);

    let db = match Database::new(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize database at {}: {e}", config.db_path);
            std::process::exit(1);
        }
    };
    tracing::info!("Database initialized at: {}", config.db_path);

    register_metrics();

    let state = match AppState::new(config, db) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to build application state: {e}");
            std::process::exit(1);
        }
    };

    // Expired grants no longer need their redemption marker.
    let grants = state.grants.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GRANT_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = grants.purge_expired(now_ms());
            if purged > 0 {
                tracing::debug!("Purged {purged} expired grant redemptions");
            }
        }
    });

    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid rate limiter config"))?;

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(paylink_server::cors::build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
