use std::time::Duration;

use anyhow::Context;

use eventhall_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env().context("invalid configuration")?;
    eventhall_observability::init(config.log_format);

    let app = eventhall_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout))
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolve on Ctrl-C / SIGTERM, then arm a hard deadline for draining connections.
async fn shutdown_signal(drain_timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(
        drain_timeout_secs = drain_timeout.as_secs(),
        "shutdown signal received, draining connections"
    );

    tokio::spawn(async move {
        tokio::time::sleep(drain_timeout).await;
        tracing::warn!("drain timeout elapsed, exiting");
        std::process::exit(0);
    });
}
