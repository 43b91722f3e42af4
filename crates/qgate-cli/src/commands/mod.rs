pub mod serve;
pub mod worker;

pub use serve::ServeCommand;
pub use worker::WorkerCommand;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolve on Ctrl+C and cancel `cancel`
pub(crate) async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                cancel.cancelled().await;
            }
        },
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
