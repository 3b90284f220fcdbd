use std::future::IntoFuture;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::ServiceExt;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use unregistry_containerd::{ContainerdClient, ContainerdRegistry};
use unregistry_http::RegistryService;

use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal before
/// the server is torn down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The registry server: the containerd-backed storage behind the v2
/// dispatcher, plus process lifecycle.
pub struct RegistryServer {
    config: Config,
    service: RegistryService,
}

impl RegistryServer {
    /// Connect to containerd and assemble the service. Fails fast when
    /// containerd is unreachable.
    pub async fn new(config: Config) -> Result<Self> {
        let client = ContainerdClient::connect(&config.sock, config.namespace.clone())
            .await
            .with_context(|| {
                format!("connect to containerd at '{}'", config.sock.display())
            })?;
        let service = unregistry_http::service(ContainerdRegistry::new(client));
        Ok(Self { config, service })
    }

    /// Serve until SIGINT or SIGTERM, then drain connections and stop.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind to {addr}"))?;
        info!(%addr, namespace = self.config.namespace, "starting registry server");

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                warn!("failed to install signal handlers: {e}");
                return;
            }
            info!("shutting down server, draining connections for {DRAIN_TIMEOUT:?}");
            let _ = shutdown_tx.send(true);
        });

        let mut drain_rx = shutdown_rx.clone();
        let server = axum::serve(
            listener,
            ServiceExt::<Request>::into_make_service(self.service),
        )
        .with_graceful_shutdown(async move {
            let _ = drain_rx.wait_for(|&stop| stop).await;
        });

        let mut server = tokio::spawn(server.into_future());
        tokio::select! {
            // The server stopped on its own, necessarily an error.
            result = &mut server => {
                result.context("registry server panicked")??;
                anyhow::bail!("registry server stopped unexpectedly");
            }
            _ = shutdown_rx.wait_for(|&stop| stop) => {
                match tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await {
                    Ok(result) => {
                        result.context("registry server panicked")??;
                        info!("registry server stopped gracefully");
                    }
                    Err(_) => {
                        server.abort();
                        warn!("registry server forced to shut down after drain timeout");
                    }
                }
            }
        }

        Ok(())
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}
