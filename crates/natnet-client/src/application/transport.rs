//! The port through which a session reaches the network.
//!
//! [`ClientSession`](super::session::ClientSession) only ever talks to a
//! [`Transport`].  The production implementation is
//! `infrastructure::network::Connection` (two UDP sockets); tests use
//! `infrastructure::network::fake::FakeTransport`, a simulated server on a
//! virtual clock.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Errors a transport can report.  All of them end the session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A socket operation failed.
    #[error("socket {operation} failed: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// `send` was called before the server address was set.
    #[error("no server address to send to")]
    NoServerAddress,
}

impl TransportError {
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }
}

/// A datagram as handed to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Local monotonic time of reception, in seconds.
    pub received_at: f64,
    pub source: SocketAddr,
}

/// Result of one wait on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Packet(Packet),
    /// Nothing arrived within the timeout.
    Timeout,
    /// No packet will ever arrive again (replayed or simulated streams).
    EndOfStream,
}

/// Datagram I/O for a NatNet session.
///
/// Commands go out on a single socket to the server's command port.
/// Replies may come back on that socket; frames arrive on a multicast data
/// socket once [`join_multicast`](Transport::join_multicast) succeeds.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Sends one datagram to the server's command port.
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Blocks until a datagram arrives on any socket, or until `timeout`
    /// passes.  `None` waits indefinitely.
    ///
    /// When several sockets are ready, the command socket is read first.
    fn wait_for_packet(&mut self, timeout: Option<Duration>) -> Result<Received, TransportError>;

    /// Opens the data socket on `port` and joins multicast `group`.
    fn join_multicast(&mut self, group: Ipv4Addr, port: u16) -> Result<(), TransportError>;

    /// Directs subsequent [`send`](Transport::send) calls at `address`.
    fn set_server_address(&mut self, address: SocketAddr);

    /// The local monotonic clock that timestamps received packets, in seconds.
    fn now(&self) -> f64;
}
