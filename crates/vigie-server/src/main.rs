//! Vigie server binary — weather-vigilance alert subscriptions over HTTP.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, a background vigilance poll loop, and graceful shutdown
//! on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use vigie_broadcast::{BrevoChannel, BrevoConfig, Broadcaster, DemoChannel, NotificationChannel};
use vigie_payments::{PaymentGate, StripeConfig, StripeGateway};
use vigie_server::feed::VigilanceFeed;
use vigie_server::scheduler::{run_poll_loop, Pipeline};
use vigie_server::{app, config, AppState};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("VIGIE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Builds the notification channel from config: Brevo when an API key is
/// present, demo mode otherwise.
fn build_channel(notifier: &config::NotifierConfig) -> Arc<dyn NotificationChannel> {
    if notifier.api_key.is_empty() {
        tracing::warn!("no notifier API key configured, running in demo mode");
        return Arc::new(DemoChannel::new());
    }

    match BrevoChannel::new(BrevoConfig {
        api_key: notifier.api_key.clone(),
        sms_sender: notifier.sms_sender.clone(),
        email_sender_name: notifier.email_sender_name.clone(),
        email_sender_address: notifier.email_sender_address.clone(),
        base_url: notifier.base_url.clone(),
    }) {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            tracing::error!(error = %e, "failed to build notifier client, falling back to demo mode");
            Arc::new(DemoChannel::new())
        }
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = vigie_db::create_pool(
        &config.database.path,
        vigie_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = vigie_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Notification channel and payment gateway
    let channel = build_channel(&config.notifier);
    let broadcaster = Broadcaster::new(pool.clone(), channel);

    if config.gateway.secret_key.is_empty() {
        tracing::warn!("no payment gateway secret key configured, checkout will fail upstream");
    }
    let gateway = StripeGateway::new(StripeConfig {
        secret_key: config.gateway.secret_key.clone(),
        base_url: config.gateway.base_url.clone(),
    })
    .expect("failed to build payment gateway client");
    let gate = PaymentGate::new(pool.clone(), Arc::new(gateway));

    // Background poll loop
    let feed = VigilanceFeed::new(
        &config.feed.base_url,
        &config.feed.region,
        Duration::from_secs(config.feed.timeout_secs),
    )
    .expect("failed to build vigilance feed client");
    let pipeline = Arc::new(Pipeline::new(
        pool.clone(),
        broadcaster.clone(),
        Arc::new(feed),
    ));
    tokio::spawn(run_poll_loop(
        pipeline,
        Duration::from_secs(config.feed.poll_interval_secs),
    ));

    // Build application
    let state = AppState {
        pool,
        broadcaster,
        gate,
        webhook_secret: config.gateway.webhook_secret.clone(),
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting vigie server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("vigie server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
