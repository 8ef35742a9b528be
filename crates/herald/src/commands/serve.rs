//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use herald::background::BackgroundTasks;
use herald::build_info;
use herald::config::Config;
use herald::notify::{FanoutSink, LogSink, WebhookSink};
use herald::server::{self, DEFAULT_MAX_CONNECTIONS, RuntimeServices};
use herald::session::SubprocessConnector;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let background_tasks = BackgroundTasks::new();

    // Lifecycle sinks: always log, optionally POST to a webhook
    let mut sinks = FanoutSink::new().with(Arc::new(LogSink));
    if let Some(url) = config.notify.webhook_url.as_deref() {
        let webhook = WebhookSink::new(url, background_tasks.clone())
            .context("Failed to build webhook client")?;
        info!(url = %webhook.url(), "Webhook notifications enabled");
        sinks = sinks.with(Arc::new(webhook));
    }

    let driver = config.session.driver_config();
    info!(command = %driver.command, "Using session driver");
    let connector = Arc::new(SubprocessConnector::new(driver));

    let services = RuntimeServices::new(
        connector,
        sinks,
        config.session.manager_config(),
        config.delivery.retry_policy(),
        config.session.send_timeout(),
    );

    if config.notify.admin_recipient.is_none() {
        warn!("No admin recipient configured; messages must name a recipient");
    }

    // Create shutdown channel for HTTP-triggered shutdown
    let (shutdown_tx, shutdown_rx) = server::shutdown_channel();

    let state = server::AppState {
        services: services.clone(),
        admin_recipient: config.notify.admin_recipient.clone(),
        send_wait: config.server.send_wait(),
        expose_errors: !config.server.is_production(),
        admin_token: config.server.admin_token.clone(),
        max_connections: DEFAULT_MAX_CONNECTIONS,
        background_tasks: background_tasks.clone(),
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid host '{}'", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        addr = %addr,
        environment = %config.server.environment,
        version = %build_info::version_string(),
        "Starting server"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_rx))
    .await?;

    // Tear the session down (driver told to shut down)
    if services.session.destroy().await {
        info!("Session destroyed");
    }

    // Wait for webhook deliveries and other background tasks
    background_tasks.shutdown().await;

    let stats = services.queue.stats();
    if stats.queued > 0 || stats.in_flight > 0 {
        warn!(
            queued = stats.queued,
            in_flight = stats.in_flight,
            "Undelivered messages dropped at shutdown"
        );
    }

    info!(
        sent = stats.sent_total,
        failed = stats.failed_total,
        "Server stopped"
    );
    Ok(())
}

/// Stop a running server by calling the shutdown endpoint.
pub async fn stop(config_path: &str, port_override: Option<u16>) -> Result<()> {
    let config = Config::load(config_path).await?;
    let port = port_override.unwrap_or(config.server.port);

    let mut client = herald::client::HeraldClient::new(&format!("http://127.0.0.1:{}", port));
    if let Some(token) = config.server.admin_token {
        client = client.with_admin_token(token);
    }

    // Check if server is running
    if client.health().await.is_err() {
        anyhow::bail!("No server running on port {}", port);
    }

    // Call shutdown endpoint
    client.shutdown().await.context("Failed to stop server")?;

    println!("Shutdown initiated for server on port {}", port);
    Ok(())
}

async fn shutdown_signal(http_shutdown: tokio::sync::oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = http_shutdown => info!("Received shutdown request via HTTP, shutting down..."),
    }
}
