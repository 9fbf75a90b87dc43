use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

use pqrserver::auth::ensure_bootstrap_admin;
use pqrserver::core::config::AppConfig;
use pqrserver::core::shared::state::AppState;
use pqrserver::core::shared::utils::{create_conn, redact_database_url, run_migrations};
use pqrserver::email::{Notifier, PgNotificationStore, SmtpMailer};
use pqrserver::main_module::run_axum_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    info!(
        "Starting pqrserver {} (database {})",
        env!("CARGO_PKG_VERSION"),
        redact_database_url(&config.database_url)
    );

    let pool = create_conn(&config.database_url).map_err(|e| {
        error!("Failed to create database pool: {e}");
        anyhow::anyhow!("Database pool error: {e}")
    })?;
    run_migrations(&pool)?;
    info!("Database migrations applied");

    match ensure_bootstrap_admin(&pool, &config) {
        Ok(true) => info!("Bootstrap administrator created"),
        Ok(false) => {}
        Err(e) => warn!("Could not create bootstrap administrator: {e}"),
    }

    if let Err(e) = config.email.validate() {
        warn!("Email notifications will fail until configuration is fixed: {e}");
    }
    let mailer = SmtpMailer::from_config(&config.email)?;
    let notifier = Notifier::new(
        Arc::new(PgNotificationStore::new(pool.clone())),
        Arc::new(mailer),
        config.email.clone(),
        config.uploads.clone(),
    );

    let state = Arc::new(AppState::new(pool, config, Arc::new(notifier)));
    run_axum_server(state).await?;

    info!("pqrserver stopped");
    Ok(())
}
