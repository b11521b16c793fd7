//! benchserver: a minimal target for load generators
//!
//! Brings up exactly one endpoint, selected by `--type`:
//! - `http`: every request gets a fixed-size filler body
//! - `tcp`: every read is answered with the filler payload
//! - `udp`: every datagram is logged, nothing is sent back
//! - anything else: a raw IP packet sink on that network (e.g. `ip4:icmp`)
//!
//! HTTP and TCP log a throughput counter once per report interval.
//! Configuration via CLI arguments or TOML file.

mod config;
mod error;
mod net;
mod packet;
mod payload;
mod reporter;
mod responders;
mod server;

use config::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (logging is not up yet, report on stderr)
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("benchserver: {e}");
            std::process::exit(2);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        server_type = %config.server_type,
        listen = %config.listen,
        size = config.response_size,
        report_interval = ?config.report_interval,
        on_io_error = ?config.on_io_error,
        workers = ?config.workers,
        "starting server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    // Never cancelled here; the responders run until the process is killed
    let shutdown = CancellationToken::new();

    if let Err(e) = runtime.block_on(server::run(config, shutdown)) {
        error!(error = %e, "fatal: could not start responder");
        std::process::exit(1);
    }

    Ok(())
}
