mod acquire;
mod auth;
mod broker;
mod catalog;
mod error;
mod http;
mod library;
mod rate_limit;
mod session;
mod store;
#[cfg(test)]
mod testing;

use deck_proto::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::acquire::AcquisitionPipeline;
use crate::auth::Authenticator;
use crate::broker::HttpBroker;
use crate::catalog::SpotifyCatalog;
use crate::library::Library;
use crate::rate_limit::RateLimiter;
use crate::session::SessionManager;
use crate::store::{JsonStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = deck_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,deck_daemon=debug")),
        )
        .init();

    eprintln!("deckd logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    if config.catalog.client_id.is_empty() || config.catalog.client_secret.is_empty() {
        warn!("Catalog credentials are not configured; downloads and search will fail");
    }
    if config.users.is_empty() {
        warn!("No users configured; every request will be rejected");
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("deckd/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let store: Arc<dyn Store> = Arc::new(JsonStore::open(config.daemon.store_file.clone())?);
    info!("Store: {:?}", config.daemon.store_file);

    let sessions = Arc::new(SessionManager::from_config(&config.broker));
    let catalog = Arc::new(SpotifyCatalog::new(client.clone(), config.catalog.clone()));
    let broker = Arc::new(HttpBroker::new(client, &config.broker));
    let pipeline = Arc::new(AcquisitionPipeline::new(
        catalog.clone(),
        broker,
        sessions.clone(),
        store.clone(),
    ));
    let library = Arc::new(Library::new(store.clone(), pipeline.clone()));

    let interval = Duration::from_secs(config.rate_limit.interval_secs);
    let state = http::AppState {
        pipeline,
        library,
        catalog,
        store,
        auth: Arc::new(Authenticator::new(&config.users)),
        play_limiter: Arc::new(RateLimiter::new(interval, config.rate_limit.unique_tokens)),
        download_limiter: Arc::new(RateLimiter::new(interval, config.rate_limit.unique_tokens)),
        limits: config.rate_limit.clone(),
    };

    if !config.http.enabled {
        warn!("HTTP API disabled in config; nothing to serve");
        return Ok(());
    }
    let server = http::start_server(config.http.bind_address.clone(), config.http.port, state);

    info!("Daemon initialised");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        _ = server => warn!("HTTP server stopped"),
    }
    sessions.close().await;

    Ok(())
}
