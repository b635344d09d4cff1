use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use appointd::app::App;
use appointd::clock::SystemClock;
use appointd::config::Config;
use appointd::notify::LogNotifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    appointd::observability::init(config.metrics_port)?;

    let app = App::open(&config, Arc::new(LogNotifier), Arc::new(SystemClock))?;
    let shutdown = CancellationToken::new();
    let background = app.spawn_background(&config, shutdown.clone());

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("appointd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  timezone: {}", config.zone.name());
    info!(
        "  business hours: {:02}:00-{:02}:00, {} minute appointments",
        config.hours.start_hour, config.hours.end_hour, config.appointment_minutes
    );
    info!("  public url: {}", config.public_url);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    if config.api_key.is_none() {
        warn!("APPOINTD_API_KEY is not set; protected routes will refuse every request");
    }

    let token = shutdown.clone();
    axum::serve(listener, app.router(&config))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await?;

    // In-flight requests are drained; stop the sweep and compactor too.
    shutdown.cancel();
    futures::future::join_all(background).await;
    info!("appointd stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM ({e}); ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
