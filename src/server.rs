//! Mode selector.
//!
//! Brings up exactly one responder for the configured server type and runs
//! it until it returns. `http`, `tcp` and `udp` select their responders;
//! every other type string is treated as a raw packet network.

use tokio_util::sync::CancellationToken;

use crate::config::{Config, ServerType};
use crate::error::ServeError;
use crate::responders::{http, ip, tcp, udp};

/// Run the responder selected by `config.server_type`.
///
/// Returns `Err` only for failures that should end the process: a TCP, UDP
/// or raw responder that cannot bind. An HTTP bind failure is logged by the
/// responder and reported as `Ok`.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), ServeError> {
    match &config.server_type {
        ServerType::Http => http::run(&config, shutdown).await,
        ServerType::Tcp => tcp::run(&config, shutdown).await,
        ServerType::Udp => udp::run(&config, shutdown).await,
        ServerType::Raw(network) => ip::run(network, &config, shutdown).await,
    }
}
