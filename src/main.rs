//! lpframe: a TCP server for length-prefixed binary frames
//!
//! Each frame on the wire is a 2-byte little-endian length followed by that
//! many payload bytes (fewer than 256). Every connection gets its own task
//! and its own decoder; completed frames are handed to a pluggable sink.
//!
//! Features:
//! - Frames reassembled correctly regardless of how reads split the stream
//! - Oversized frames close the offending connection only
//! - Optional idle timeout per connection
//! - Graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod server;
mod shutdown;

use config::Config;
use protocols::frame::MAX_DATA_LENGTH;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = ?config.workers,
        max_connections = config.max_connections,
        read_buffer_size = config.read_buffer_size,
        idle_timeout_secs = ?config.idle_timeout.map(|t| t.as_secs()),
        max_data_length = MAX_DATA_LENGTH,
        "Starting lpframe server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(async {
        let server = Server::bind(&config).await?;
        server.run(shutdown_signal()).await
    })?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C. If the handler can't be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
