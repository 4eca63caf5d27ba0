mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use fileserver::{FileServerApi, ServerState};
use tagstore::TagStore;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, Settings};

/// Time given to open HTTPS connections after a shutdown signal
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn resolve_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address found for {}:{}", host, port))
}

async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = Settings::load(cli).context("Invalid configuration")?;

    let tags = TagStore::load(&settings.tags_file)
        .with_context(|| format!("Failed to load tags from {}", settings.tags_file.display()))?;

    let state = ServerState::new(settings.server.clone(), Arc::new(tags))
        .context("Failed to open media root")?;
    tracing::info!("Serving media from {}", state.root().path().display());
    if state.transcoder().is_some() {
        tracing::info!("Transcoding for mobile clients is enabled");
    }
    let api = FileServerApi::new(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tls_handle = axum_server::Handle::new();
    {
        let tls_handle = tls_handle.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received, stopping servers");
            let _ = shutdown_tx.send(true);
            tls_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });
    }

    let http_addr = resolve_addr(&settings.host, settings.http_port).await?;
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", http_addr))?;
    let mut http_shutdown = shutdown_rx;
    let http = api.clone().serve(listener, async move {
        let _ = http_shutdown.wait_for(|stop| *stop).await;
    });

    let tls = if settings.tls_available() {
        let config = RustlsConfig::from_pem_file(&settings.tls_cert, &settings.tls_key)
            .await
            .context("Failed to load TLS certificate or key")?;
        Some((resolve_addr(&settings.host, settings.https_port).await?, config))
    } else {
        tracing::warn!(
            "TLS certificate {} or key {} not found, HTTPS disabled",
            settings.tls_cert.display(),
            settings.tls_key.display()
        );
        None
    };

    let router = api.router();
    let https = async move {
        match tls {
            Some((addr, config)) => {
                tracing::info!("HTTPS server listening on https://{}", addr);
                axum_server::bind_rustls(addr, config)
                    .handle(tls_handle)
                    .serve(router.into_make_service())
                    .await
            }
            None => Ok(()),
        }
    };

    tokio::try_join!(http, https).context("Server error")?;
    tracing::info!("Servers stopped");
    Ok(())
}
