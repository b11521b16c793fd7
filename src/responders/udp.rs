//! UDP responder.
//!
//! Receive-and-log only: every datagram is logged with its sender, size and
//! contents. Nothing is ever sent back.

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ServeError;
use crate::net::{create_udp_socket, resolve_listen_addr};
use crate::responders::READ_BUFFER_SIZE;

/// A bound UDP responder.
#[derive(Debug)]
pub struct UdpResponder {
    socket: UdpSocket,
}

impl UdpResponder {
    pub async fn bind(listen: &str) -> Result<Self, ServeError> {
        let addr = resolve_listen_addr(listen).await?;
        let socket = create_udp_socket(addr).map_err(|source| ServeError::Bind {
            addr: listen.to_string(),
            source,
        })?;

        Ok(UdpResponder {
            socket: UdpSocket::from_std(socket)?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Log datagrams until `shutdown` is cancelled. Returns how many were
    /// received.
    pub async fn serve(self, shutdown: CancellationToken) -> u64 {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut received = 0u64;

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => result,
            };

            match result {
                Ok((n, peer)) => {
                    received += 1;
                    info!(peer = %peer, size = n, data = ?&buf[..n], "udp packet received");
                }
                // Transient (e.g. ICMP port unreachable); keep receiving
                Err(e) => debug!(error = %e, "Failed to receive datagram"),
            }
        }

        received
    }
}

/// Run the UDP responder for `config`. Resolve and bind failures are fatal.
pub async fn run(config: &Config, shutdown: CancellationToken) -> Result<(), ServeError> {
    let responder = UdpResponder::bind(&config.listen).await?;

    info!(
        addr = %config.listen,
        bound = ?responder.local_addr().ok(),
        "starting UDP server"
    );
    responder.serve(shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responders::test_util::SHORT_WAIT;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_never_replies() {
        let responder = UdpResponder::bind("127.0.0.1:0").await.unwrap();
        let addr = responder.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(responder.serve(shutdown.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for i in 0..5u8 {
            client.send_to(&[i; 32], addr).await.unwrap();
        }

        let mut buf = [0u8; 64];
        assert!(timeout(SHORT_WAIT, client.recv_from(&mut buf)).await.is_err());

        shutdown.cancel();
        let received = timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_truncated_not_fatal() {
        let responder = UdpResponder::bind("127.0.0.1:0").await.unwrap();
        let addr = responder.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(responder.serve(shutdown.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[9u8; 4000], addr).await.unwrap();
        client.send_to(b"small", addr).await.unwrap();
        tokio::time::sleep(SHORT_WAIT).await;

        shutdown.cancel();
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bind_in_use_is_error() {
        let held = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = held.local_addr().unwrap();
        let err = UdpResponder::bind(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, ServeError::Bind { .. }));
    }
}
