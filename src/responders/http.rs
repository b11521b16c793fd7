//! HTTP responder.
//!
//! Every request, whatever its method or path, gets the filler payload as
//! its body. A reporter logs the number of requests handled.

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ServeError;
use crate::net::{create_tcp_listener, resolve_listen_addr};
use crate::payload::Filler;
use crate::reporter::{Counter, ReportKind, ReportSummary, Reporter};

/// A bound HTTP responder.
#[derive(Debug)]
pub struct HttpResponder {
    listener: TcpListener,
    filler: Filler,
    requests: Counter,
}

impl HttpResponder {
    pub async fn bind(listen: &str, filler: Filler) -> Result<Self, ServeError> {
        let addr = resolve_listen_addr(listen).await?;
        let listener = create_tcp_listener(addr).map_err(|source| ServeError::Bind {
            addr: listen.to_string(),
            source,
        })?;

        Ok(HttpResponder {
            listener: TcpListener::from_std(listener)?,
            filler,
            requests: Counter::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the requests-handled counter.
    pub fn requests(&self) -> Counter {
        self.requests.clone()
    }

    /// Accept and serve connections until `shutdown` is cancelled. Returns
    /// what the reporter logged.
    pub async fn serve(
        self,
        report_interval: Duration,
        shutdown: CancellationToken,
    ) -> ReportSummary {
        let reporter = Reporter::new(
            ReportKind::Requests,
            self.requests.clone(),
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
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.filler.clone(),
                            self.requests.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        while connections.join_next().await.is_some() {}
        reporter.await.unwrap_or_default()
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    filler: Filler,
    requests: Counter,
    shutdown: CancellationToken,
) {
    let service = service_fn(move |_req: Request<Incoming>| {
        // Counted once per request, whether or not the write succeeds
        requests.add(1);
        let mut response = Response::new(Full::new(filler.bytes()));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        async move { Ok::<Response<Full<Bytes>>, Infallible>(response) }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        if !e.is_incomplete_message() {
            error!(peer = %peer, error = %e, "error writing response");
        }
    }
}

/// Run the HTTP responder for `config`.
///
/// A bind failure is logged and the responder returns normally; it is not
/// fatal for HTTP.
pub async fn run(config: &Config, shutdown: CancellationToken) -> Result<(), ServeError> {
    let filler = Filler::new(config.response_size);
    info!(addr = %config.listen, size = filler.len(), "starting HTTP server");

    let responder = match HttpResponder::bind(&config.listen, filler).await {
        Ok(responder) => responder,
        Err(e) => {
            error!(error = %e, "server error");
            return Ok(());
        }
    };

    if let Ok(bound) = responder.local_addr() {
        debug!(bound = %bound, "HTTP listener bound");
    }
    let requests = responder.requests();
    let summary = responder.serve(config.report_interval, shutdown).await;
    info!(requests = requests.get(), reports = summary.reports, "HTTP server stopped");
    Ok(())
}
