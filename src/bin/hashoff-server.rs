//! hashoff-server: computes a digest for every chunk a client sends.

use hashoff::config::ServerConfig;
use hashoff::logging;
use hashoff::server::Server;
use std::process::ExitCode;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failure: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let (config, log_level) = ServerConfig::load()?;

    // Initialize logging
    logging::init(&log_level);

    info!(
        host = %config.host,
        port = config.port,
        salted = !config.salt.is_empty(),
        engine_mode = %config.engine_mode,
        max_connections = config.max_connections,
        "Starting hashoff server"
    );

    let server: Server = Server::new(config);
    server.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
