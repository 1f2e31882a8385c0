pub mod ant;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod messages;
pub mod mqtt;
pub mod registry;
pub mod scanner;
pub mod session;

use log::{error, info};
use tokio::signal::unix::{SignalKind, signal};

/// Resolves on Ctrl-C or SIGTERM, whichever comes first.
pub async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            error!("Cannot listen for SIGTERM: {}", err);
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", err);
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}
