//! TCP responder.
//!
//! Each accepted connection runs its own read loop: every successful read
//! adds its byte count to the shared counter and is answered with exactly
//! one write of the filler payload. What happens after a failed read or
//! write is governed by [`IoErrorPolicy`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{Config, IoErrorPolicy};
use crate::error::ServeError;
use crate::net::{create_tcp_listener, resolve_listen_addr};
use crate::payload::Filler;
use crate::reporter::{Counter, ReportKind, ReportSummary, Reporter};
use crate::responders::READ_BUFFER_SIZE;

/// A bound TCP responder.
#[derive(Debug)]
pub struct TcpResponder {
    listener: TcpListener,
    filler: Filler,
    bytes_read: Counter,
    policy: IoErrorPolicy,
}

impl TcpResponder {
    pub async fn bind(
        listen: &str,
        filler: Filler,
        policy: IoErrorPolicy,
    ) -> Result<Self, ServeError> {
        let addr = resolve_listen_addr(listen).await?;
        let listener = create_tcp_listener(addr).map_err(|source| ServeError::Bind {
            addr: listen.to_string(),
            source,
        })?;

        Ok(TcpResponder {
            listener: TcpListener::from_std(listener)?,
            filler,
            bytes_read: Counter::new(),
            policy,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the bytes-read counter.
    pub fn bytes_read(&self) -> Counter {
        self.bytes_read.clone()
    }

    /// Accept connections until `shutdown` is cancelled, then wait for the
    /// connection loops and the reporter to finish.
    pub async fn serve(
        self,
        report_interval: Duration,
        shutdown: CancellationToken,
    ) -> ReportSummary {
        let reporter = Reporter::new(
            ReportKind::Bytes,
            self.bytes_read.clone(),
            Instant::now(),
            report_interval,
        )
        .spawn(shutdown.clone());

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!(peer = %peer, "New connection");
                        connections.spawn(serve_connection(
                            stream,
                            self.filler.clone(),
                            self.bytes_read.clone(),
                            self.policy,
                            shutdown.clone(),
                        ));
                    }
                    // The listener stays usable; skip and accept again
                    Err(e) => debug!(error = %e, "Failed to accept connection"),
                },
            }
        }

        while connections.join_next().await.is_some() {}
        reporter.await.unwrap_or_default()
    }
}

/// Read/echo loop for one connection. The stream is closed when this returns.
async fn serve_connection(
    mut stream: TcpStream,
    filler: Filler,
    bytes_read: Counter,
    policy: IoErrorPolicy,
    shutdown: CancellationToken,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => return,
            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                trace!("Connection closed by peer");
                if policy == IoErrorPolicy::Close {
                    return;
                }
                continue;
            }
            Ok(n) => bytes_read.add(n as u64),
            Err(e) => {
                trace!(error = %e, "Read failed");
                if policy == IoErrorPolicy::Close {
                    return;
                }
                continue;
            }
        }

        let written = tokio::select! {
            _ = shutdown.cancelled() => return,
            written = stream.write_all(filler.as_ref()) => written,
        };

        if let Err(e) = written {
            trace!(error = %e, "Write failed");
            if policy == IoErrorPolicy::Close {
                return;
            }
        }
    }
}

/// Run the TCP responder for `config`. Resolve and bind failures are
/// returned to the caller as fatal.
pub async fn run(config: &Config, shutdown: CancellationToken) -> Result<(), ServeError> {
    let filler = Filler::new(config.response_size);
    let responder = TcpResponder::bind(&config.listen, filler, config.on_io_error).await?;

    info!(
        addr = %config.listen,
        bound = ?responder.local_addr().ok(),
        size = config.response_size,
        on_io_error = ?config.on_io_error,
        "starting TCP server"
    );
    let bytes_read = responder.bytes_read();
    let summary = responder.serve(config.report_interval, shutdown).await;
    info!(bytes = bytes_read.get(), reports = summary.reports, "TCP server stopped");
    Ok(())
}
