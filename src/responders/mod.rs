//! Responder implementations.
//!
//! Each responder binds one endpoint and serves it until the shutdown token
//! is cancelled:
//! - `http`: answers every request with the filler payload, reports requests
//! - `tcp`: writes the filler payload back on every read, reports bytes read
//! - `udp`: logs every datagram, never replies
//! - `ip`: decodes and logs every frame from a raw IP socket

pub mod http;
pub mod ip;
pub mod tcp;
pub mod udp;

/// Size of the per-read buffer used by the TCP, UDP and raw IP responders.
pub const READ_BUFFER_SIZE: usize = 1024;

#[cfg(test)]
pub(crate) mod test_util {
    use std::net::SocketAddr;
    use std::time::Duration;

    /// A free loopback address that is currently held by a listener.
    pub fn occupied_tcp_addr() -> (std::net::TcpListener, SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    pub const SHORT_WAIT: Duration = Duration::from_millis(200);
}
