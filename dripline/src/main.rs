//! Dripline server - tracking endpoints, send triggers and the sequence
//! scheduler in one process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dripline::html::TrackingUrls;
use dripline::tracking::{GeoLookup, NoGeoLookup, TableGeoLookup};
use dripline::{
    build_router, AppState, BulkSender, CampaignSender, Clock, Config, DeliveryClient,
    MemoryStore, ResendTransport, SequenceService, SequenceWorker, Snapshot, Store, SystemClock,
    TrackingService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("dripline_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        public_base_url = %config.public_base_url,
        resend_api_key_set = !config.resend_api_key.is_empty(),
        batch_size = config.send_batch_size,
        batch_pause_ms = config.send_batch_pause_ms,
        tick_interval_secs = config.sequence_tick_interval_secs,
        page_size = config.sequence_page_size,
        admin_token_set = config.admin_token.is_some(),
        webhook_secret_set = config.webhook_signing_secret.is_some(),
        seed_file = config.seed_file.as_deref().unwrap_or("-"),
        "config_loaded"
    );

    let store: Arc<dyn Store> = Arc::new(load_store(&config)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let geo = load_geo(&config)?;

    let client = Client::builder()
        .pool_max_idle_per_host(100)
        .build()
        .context("Failed to create HTTP client")?;
    let transport = Arc::new(ResendTransport::new(
        client,
        &config.resend_api_url,
        config.resend_api_key.clone(),
    ));
    let delivery = DeliveryClient::new(
        transport,
        store.clone(),
        clock.clone(),
        config.delivery_timeout(),
    );
    let urls = TrackingUrls::new(&config.public_base_url);

    let bulk = BulkSender::new(
        store.clone(),
        delivery.clone(),
        urls.clone(),
        clock.clone(),
        config.bulk_send_settings(),
    );
    let worker = Arc::new(SequenceWorker::new(
        store.clone(),
        delivery,
        urls,
        clock.clone(),
        config.scheduler_settings(),
    ));
    let scheduler = worker.start();

    let port = config.port;
    let state = AppState::new(
        config,
        CampaignSender::new(store.clone(), bulk, clock.clone()),
        SequenceService::new(store.clone(), clock.clone()),
        TrackingService::new(store, geo, clock),
    );
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(address = %addr, "web_server_listening");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    scheduler.stop().await;

    info!("dripline_shutdown_complete");

    Ok(())
}

fn load_store(config: &Config) -> Result<MemoryStore> {
    let Some(path) = config.seed_file.as_deref() else {
        return Ok(MemoryStore::new());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {path}"))?;
    let snapshot: Snapshot =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse seed file {path}"))?;
    let (contacts, campaigns, sequences) = (
        snapshot.contacts.len(),
        snapshot.campaigns.len(),
        snapshot.sequences.len(),
    );
    let store = MemoryStore::from_snapshot(snapshot).context("Failed to load seed data")?;

    info!(
        contacts = contacts,
        campaigns = campaigns,
        sequences = sequences,
        "seed_loaded"
    );
    Ok(store)
}

fn load_geo(config: &Config) -> Result<Arc<dyn GeoLookup>> {
    match config.geoip_table_path.as_deref() {
        Some(path) => {
            let table = TableGeoLookup::load(path)
                .with_context(|| format!("Failed to load geo table {path}"))?;
            info!(prefixes = table.len(), "geo_table_loaded");
            Ok(Arc::new(table))
        }
        None => Ok(Arc::new(NoGeoLookup)),
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("dripline_shutting_down");
}
