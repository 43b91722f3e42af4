use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::shutdown_signal;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;

#[derive(Args)]
pub struct WorkerCommand {
    /// Path to the YAML configuration file
    #[arg(long, env = "QGATE_CONFIG")]
    pub config: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = GatewayConfig::load(self.config.as_deref())?;
        config.ensure_shared_backends()?;
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(run(config))
    }
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let gateway = Gateway::build(config).await?;
    let consumer = gateway
        .consumer()
        .context("no queue configured; the worker has nothing to consume")?;

    let cancel = CancellationToken::new();
    let signal = tokio::spawn(shutdown_signal(cancel.clone()));

    info!("Job worker started");
    let result = consumer.run(cancel.clone()).await;
    cancel.cancel();
    signal.abort();
    gateway.close().await;

    result.context("job consumer failed")?;
    info!("Job worker stopped");
    Ok(())
}
