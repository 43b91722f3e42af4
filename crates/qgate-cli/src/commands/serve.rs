use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::shutdown_signal;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1:8080", env = "QGATE_ADDRESS")]
    pub address: String,

    /// Path to the YAML configuration file
    #[arg(long, env = "QGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not run the embedded job consumer
    #[arg(long)]
    pub no_worker: bool,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = GatewayConfig::load(self.config.as_deref())?;
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(config))
    }

    async fn run(self, config: GatewayConfig) -> anyhow::Result<()> {
        let gateway = Gateway::build(config).await?;
        let cancel = CancellationToken::new();

        let worker = match gateway.consumer() {
            Some(consumer) if !self.no_worker => {
                let token = cancel.clone();
                Some(tokio::spawn(async move { consumer.run(token).await }))
            }
            Some(_) => {
                warn!("Embedded worker disabled; queued jobs wait for a separate worker");
                None
            }
            None => None,
        };

        let app = qgate_api::router(Arc::new(gateway.app_state()));
        let listener = tokio::net::TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("failed to bind {}", self.address))?;
        info!("Query gateway listening on {}", self.address);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel.clone()))
            .await;
        cancel.cancel();

        if let Some(handle) = worker {
            match handle.await {
                Ok(Ok(())) => info!("Embedded worker stopped"),
                Ok(Err(e)) => error!("Embedded worker failed: {}", e),
                Err(e) => error!("Embedded worker panicked: {}", e),
            }
        }
        gateway.close().await;

        served.context("HTTP server failed")
    }
}
