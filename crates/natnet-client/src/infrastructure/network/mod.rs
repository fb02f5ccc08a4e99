//! UDP transport for the client.
//!
//! Architecture:
//! - The **command socket** is bound to an ephemeral port with broadcast
//!   enabled.  Every outgoing packet leaves through it, addressed to the
//!   server's command port (or the broadcast address during discovery).
//! - The **data socket** is created by `join_multicast`, bound to the data
//!   port and joined to the server's multicast group.  Frames arrive here.
//! - Both sockets are non-blocking and registered with one `mio::Poll`, so a
//!   single wait covers both.  The command socket is always read first.
//!
//! Sockets are owned by [`Connection`] and closed when it is dropped.

pub mod fake;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::application::session::{ClientSession, SessionConfig, SessionError};
use crate::application::transport::{Packet, Received, Transport, TransportError};

const COMMAND: Token = Token(0);
const DATA: Token = Token(1);

/// Largest UDP payload.
const MAX_DATAGRAM: usize = 65_536;

/// Kernel receive buffer requested for the data socket; frames arrive in bursts.
const DATA_RECV_BUFFER: usize = 1 << 20;

/// Two-socket UDP transport driven by `mio`.
pub struct Connection {
    poll: Poll,
    events: Events,
    command: UdpSocket,
    data: Option<UdpSocket>,
    server: Option<SocketAddr>,
    epoch: Instant,
    buffer: Vec<u8>,
}

impl Connection {
    /// Opens the command socket on an ephemeral port of every interface.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot be created or bound.
    pub fn open() -> Result<Self, TransportError> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    /// Opens the command socket on `local`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot be created or bound.
    pub fn bind(local: SocketAddr) -> Result<Self, TransportError> {
        let socket = new_udp_socket().map_err(|e| TransportError::io("create", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::io("enable broadcast", e))?;
        socket
            .bind(&local.into())
            .map_err(|e| TransportError::io("bind command socket", e))?;
        let mut command = UdpSocket::from_std(socket.into());

        let poll = Poll::new().map_err(|e| TransportError::io("create poll", e))?;
        poll.registry()
            .register(&mut command, COMMAND, Interest::READABLE)
            .map_err(|e| TransportError::io("register command socket", e))?;

        debug!(local = ?command.local_addr().ok(), "command socket open");
        Ok(Self {
            poll,
            events: Events::with_capacity(8),
            command,
            data: None,
            server: None,
            epoch: Instant::now(),
            buffer: vec![0; MAX_DATAGRAM],
        })
    }

    /// Local address of the command socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.command
            .local_addr()
            .map_err(|e| TransportError::io("query local address", e))
    }

    /// Local address of the data socket, once joined.
    pub fn data_addr(&self) -> Option<SocketAddr> {
        self.data.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server
    }

    /// Reads one datagram from `socket` if one is queued.
    fn try_recv(
        socket: &UdpSocket,
        buffer: &mut [u8],
        epoch: Instant,
    ) -> Result<Option<Packet>, TransportError> {
        loop {
            match socket.recv_from(buffer) {
                Ok((len, source)) => {
                    return Ok(Some(Packet {
                        data: buffer[..len].to_vec(),
                        received_at: epoch.elapsed().as_secs_f64(),
                        source,
                    }))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::io("receive", e)),
            }
        }
    }

    /// Surfaces the pending error of whichever socket `token` names.
    fn socket_error(&self, token: Token) -> TransportError {
        let socket = match token {
            DATA => self.data.as_ref().unwrap_or(&self.command),
            _ => &self.command,
        };
        let error = match socket.take_error() {
            Ok(Some(e)) => e,
            Ok(None) => io::Error::new(io::ErrorKind::Other, "socket reported an error event"),
            Err(e) => e,
        };
        TransportError::io("poll", error)
    }
}

impl Transport for Connection {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let server = self.server.ok_or(TransportError::NoServerAddress)?;
        loop {
            match self.command.send_to(packet, server) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A full send buffer clears quickly; block on it rather than drop a command.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) => return Err(TransportError::io("send", e)),
            }
        }
    }

    fn wait_for_packet(&mut self, timeout: Option<Duration>) -> Result<Received, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // mio is edge-triggered: always drain before polling again.
            if let Some(packet) = Self::try_recv(&self.command, &mut self.buffer, self.epoch)? {
                return Ok(Received::Packet(packet));
            }
            if let Some(data) = &self.data {
                if let Some(packet) = Self::try_recv(data, &mut self.buffer, self.epoch)? {
                    return Ok(Received::Packet(packet));
                }
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Received::Timeout);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            match self.poll.poll(&mut self.events, remaining) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::io("poll", e)),
            }
            if let Some(token) = self
                .events
                .iter()
                .find(|event| event.is_error())
                .map(|event| event.token())
            {
                return Err(self.socket_error(token));
            }
        }
    }

    fn join_multicast(&mut self, group: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        let socket = new_udp_socket().map_err(|e| TransportError::io("create", e))?;
        if let Err(e) = socket.set_recv_buffer_size(DATA_RECV_BUFFER) {
            warn!(error = %e, "could not enlarge data socket receive buffer");
        }
        socket
            .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())
            .map_err(|e| TransportError::io("bind data socket", e))?;
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| TransportError::io("join multicast group", e))?;
        let mut data = UdpSocket::from_std(socket.into());

        if let Some(mut previous) = self.data.take() {
            self.poll
                .registry()
                .deregister(&mut previous)
                .map_err(|e| TransportError::io("deregister data socket", e))?;
        }
        self.poll
            .registry()
            .register(&mut data, DATA, Interest::READABLE)
            .map_err(|e| TransportError::io("register data socket", e))?;
        self.data = Some(data);

        info!(%group, port, "joined multicast group");
        Ok(())
    }

    fn set_server_address(&mut self, address: SocketAddr) {
        debug!(%address, "server address set");
        self.server = Some(address);
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// A non-blocking IPv4 UDP socket with `SO_REUSEADDR`.
fn new_udp_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Opens a [`Connection`] and runs the handshake over it.
///
/// # Errors
///
/// Returns [`SessionError::Transport`] if the command socket cannot be
/// opened, or any error from [`ClientSession::connect`].
pub fn connect(config: SessionConfig) -> Result<ClientSession<Connection>, SessionError> {
    let mut session = ClientSession::new(Connection::open()?, config);
    session.connect()?;
    Ok(session)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
