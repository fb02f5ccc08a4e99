//! ClientSession: the NatNet client state machine.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──▶ SyncingClocks ──▶ Ready ──▶ Stopped
//!                                 │                 │              │
//!                                 └── handshake failure ───────────┤
//!                                                   transport error ┘
//! ```
//!
//! `connect` runs the whole handshake:
//!
//! 1. Send Connect (or broadcast Discovery when no server address is
//!    configured) until a ServerInfo arrives, for a bounded number of attempts.
//! 2. Join the multicast group the server announced, or the one configured.
//! 3. Exchange a burst of echoes to establish the clock sync baseline.
//! 4. Request the model definitions and build the rigid body name map.
//!
//! After that, each [`ClientSession::run_once`] call waits for one packet,
//! dispatches it, and sends a clock sync echo if one is due.  Everything runs
//! on the caller's thread; callbacks are invoked synchronously from
//! `run_once`.
//!
//! # Failure semantics
//!
//! A packet that fails to decode is reported to the diagnostic sink and
//! dropped; the loop carries on.  A transport error, or a handshake step that
//! exhausts its attempts, ends the session with an error.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use natnet_core::domain::clock_sync::{ClockSynchronizer, EchoOutcome, INITIAL_SYNC_ECHOES};
use natnet_core::domain::timing::TimestampAndLatency;
use natnet_core::protocol::messages::connect::CLIENT_VERSION;
use natnet_core::protocol::messages::{
    ConnectMessage, FrameOfDataMessage, LabelledMarker, MarkerSetDescription,
    ModelDefinitionsMessage, RigidBody, RigidBodyDescription, ServerInfoMessage,
    SkeletonDescription,
};
use natnet_core::protocol::{
    decode_payload, encode_message, split_header, MessageId, NatNetMessage, ProtocolError,
    Version,
};
use thiserror::Error;

use crate::application::diagnostics::{DiagnosticSink, TracingSink};
use crate::application::transport::{Packet, Received, Transport, TransportError};

/// Default server command port.
pub const DEFAULT_COMMAND_PORT: u16 = 1510;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that end a session (or prevent it from starting).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The server did not complete the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An outgoing message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// `run_once` or `spin` was called on a session that is not `Ready`.
    #[error("session is not connected (state {0:?})")]
    NotConnected(SessionState),
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Everything a session needs to know before connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Server to connect to.  `None` broadcasts a discovery request instead.
    pub server_address: Option<IpAddr>,
    pub command_port: u16,
    /// Overrides the multicast group announced by the server.
    pub multicast_group: Option<Ipv4Addr>,
    /// Overrides the data port announced by the server.
    pub data_port: Option<u16>,
    /// Connect and model request attempts before giving up.
    pub handshake_attempts: u32,
    /// How long each handshake attempt waits for its reply.
    pub handshake_timeout: Duration,
    pub initial_sync_echoes: usize,
    /// How long each initial sync echo waits for its response.
    pub echo_timeout: Duration,
    /// Reject packets whose declared length or content has leftover bytes.
    pub strict: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            command_port: DEFAULT_COMMAND_PORT,
            multicast_group: None,
            data_port: None,
            handshake_attempts: 5,
            handshake_timeout: Duration::from_secs(1),
            initial_sync_echoes: INITIAL_SYNC_ECHOES,
            echo_timeout: Duration::from_millis(100),
            strict: false,
        }
    }
}

// ── Session types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    SyncingClocks,
    Ready,
    /// Terminal: stopped on request, by end of stream, or by a fatal error.
    Stopped,
}

/// What a single [`ClientSession::run_once`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The packet was decoded and handled.
    Dispatched(MessageId),
    /// A valid packet of a kind the session does not act on.
    Ignored(MessageId),
    /// The packet failed to decode and was discarded.
    Dropped,
    TimedOut,
    /// The transport will deliver nothing more; the session is now stopped.
    EndOfStream,
}

/// Called for every frame with its rigid bodies, labelled markers and timing.
///
/// Timing is `None` when the frame carries no hardware timestamps or the
/// clock is not synchronised.
pub type FrameCallback =
    Box<dyn FnMut(&[RigidBody], &[LabelledMarker], Option<&TimestampAndLatency>)>;

/// Called for every model definitions message, handshake included.
pub type ModelCallback = Box<
    dyn FnMut(&[&RigidBodyDescription], &[&SkeletonDescription], &[&MarkerSetDescription]),
>;

// ── ClientSession ─────────────────────────────────────────────────────────────

pub struct ClientSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    sink: Arc<dyn DiagnosticSink>,
    state: SessionState,
    server_info: Option<ServerInfoMessage>,
    /// Protocol version used for every decode after ServerInfo.
    version: Version,
    clock: Option<ClockSynchronizer>,
    rigid_body_names: HashMap<u32, String>,
    frame_callback: Option<FrameCallback>,
    model_callback: Option<ModelCallback>,
    stop: Arc<AtomicBool>,
}

impl<T: Transport> ClientSession<T> {
    /// Creates a disconnected session that reports to a [`TracingSink`].
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_sink(transport, config, Arc::new(TracingSink))
    }

    /// Creates a disconnected session that reports to `sink`.
    pub fn with_sink(transport: T, config: SessionConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            transport,
            config,
            sink,
            state: SessionState::Disconnected,
            server_info: None,
            version: CLIENT_VERSION,
            clock: None,
            rigid_body_names: HashMap::new(),
            frame_callback: None,
            model_callback: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_frame_callback(
        &mut self,
        callback: impl FnMut(&[RigidBody], &[LabelledMarker], Option<&TimestampAndLatency>)
            + 'static,
    ) {
        self.frame_callback = Some(Box::new(callback));
    }

    pub fn set_model_callback(
        &mut self,
        callback: impl FnMut(&[&RigidBodyDescription], &[&SkeletonDescription], &[&MarkerSetDescription])
            + 'static,
    ) {
        self.model_callback = Some(Box::new(callback));
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The ServerInfo received during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfoMessage> {
        self.server_info.as_ref()
    }

    /// Negotiated protocol version; the client's own until ServerInfo arrives.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Rigid body streaming id to name, from the latest model definitions.
    pub fn rigid_body_names(&self) -> &HashMap<u32, String> {
        &self.rigid_body_names
    }

    pub fn rigid_body_name(&self, id: u32) -> Option<&str> {
        self.rigid_body_names.get(&id).map(String::as_str)
    }

    /// The clock synchroniser, once the server's clock frequency is known.
    pub fn clock(&self) -> Option<&ClockSynchronizer> {
        self.clock.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// A flag that makes [`spin`](Self::spin) return once set.
    ///
    /// Safe to set from another thread or a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    /// Runs the handshake and leaves the session `Ready`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Handshake`] if the server does not answer within the
    ///   configured attempts, streams unicast, or never answers an echo.
    /// - [`SessionError::Transport`] on socket failure.
    ///
    /// On error the session is `Stopped`.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Connecting;
        match self.handshake() {
            Ok(()) => {
                self.state = SessionState::Ready;
                self.sink.info(&format!(
                    "session ready: {} rigid bodies known",
                    self.rigid_body_names.len()
                ));
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Stopped;
                self.sink.fatal(&e.to_string());
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<(), SessionError> {
        let info = self.request_server_info()?;
        self.sink.info(&format!(
            "connected to {} {} (NatNet {})",
            info.app_name, info.app_version, info.natnet_version
        ));
        self.version = info.natnet_version;

        let (group, port) = self.resolve_multicast(&info)?;
        self.transport.join_multicast(group, port)?;
        self.sink
            .debug(&format!("joined multicast group {group} on port {port}"));

        match info.high_resolution_clock_frequency {
            Some(frequency) => {
                let clock = ClockSynchronizer::new(frequency)
                    .map_err(|e| SessionError::Handshake(e.to_string()))?;
                self.clock = Some(clock);
                self.state = SessionState::SyncingClocks;
                self.initial_sync()?;
            }
            None => self.sink.info(&format!(
                "NatNet {} server has no clock frequency; frames will carry no latency",
                info.natnet_version
            )),
        }
        self.server_info = Some(info);

        self.request_model_definitions()
    }

    /// Sends Connect (or Discovery) until a ServerInfo arrives.
    fn request_server_info(&mut self) -> Result<ServerInfoMessage, SessionError> {
        let (request, discovering) = match self.config.server_address {
            Some(ip) => {
                self.transport
                    .set_server_address(SocketAddr::new(ip, self.config.command_port));
                (NatNetMessage::Connect(ConnectMessage::default()), false)
            }
            None => {
                self.transport.set_server_address(SocketAddr::from((
                    Ipv4Addr::BROADCAST,
                    self.config.command_port,
                )));
                (NatNetMessage::Discovery(ConnectMessage::default()), true)
            }
        };
        let packet = encode_message(&request, CLIENT_VERSION)?;

        let attempts = self.config.handshake_attempts;
        for attempt in 1..=attempts {
            self.transport.send(&packet)?;
            let deadline = self.deadline(self.config.handshake_timeout);
            if let Some((NatNetMessage::ServerInfo(info), packet)) =
                self.await_message(MessageId::ServerInfo, deadline)?
            {
                if discovering {
                    self.sink
                        .info(&format!("discovered server at {}", packet.source));
                    self.transport.set_server_address(packet.source);
                }
                return Ok(info);
            }
            self.sink.warning(&format!(
                "no ServerInfo reply (attempt {attempt}/{attempts})"
            ));
        }
        Err(SessionError::Handshake(format!(
            "no ServerInfo after {attempts} attempts"
        )))
    }

    /// Picks the data group and port: configured values win over announced ones.
    fn resolve_multicast(&self, info: &ServerInfoMessage) -> Result<(Ipv4Addr, u16), SessionError> {
        let announced = info.connection_info.filter(|c| c.multicast);
        let group = self
            .config
            .multicast_group
            .or(announced.map(|c| c.multicast_address));
        let port = self.config.data_port.or(announced.map(|c| c.data_port));

        match (group, port) {
            (Some(group), Some(port)) => Ok((group, port)),
            _ => match info.connection_info {
                Some(c) if !c.multicast => Err(SessionError::Handshake(format!(
                    "server streams unicast to port {}, which is not supported",
                    c.data_port
                ))),
                _ => Err(SessionError::Handshake(
                    "server announced no multicast group; configure one for servers older than 3.0"
                        .to_string(),
                )),
            },
        }
    }

    /// Exchanges the initial echo burst.  At least one echo must be answered.
    fn initial_sync(&mut self) -> Result<(), SessionError> {
        let echoes = self.config.initial_sync_echoes;
        let mut answered = 0usize;

        for _ in 0..echoes {
            let Some(clock) = self.clock.as_mut() else {
                return Ok(());
            };
            let request = clock.request_echo(self.transport.now());
            self.send_message(&NatNetMessage::EchoRequest(request))?;

            let deadline = self.deadline(self.config.echo_timeout);
            while let Some((msg, packet)) = self.await_message(MessageId::EchoResponse, deadline)? {
                if self.handle_echo_response(&msg, &packet) {
                    answered += 1;
                    break;
                }
            }
        }

        match &self.clock {
            Some(clock) if clock.is_synchronised() => {
                self.sink.info(&format!(
                    "clock sync: {answered}/{echoes} echoes answered, min RTT {:.3} ms",
                    clock.min_rtt() * 1e3
                ));
                Ok(())
            }
            _ => Err(SessionError::Handshake(format!(
                "none of {echoes} clock sync echoes was answered"
            ))),
        }
    }

    /// Requests model definitions until they arrive.
    fn request_model_definitions(&mut self) -> Result<(), SessionError> {
        let attempts = self.config.handshake_attempts;
        for attempt in 1..=attempts {
            self.send_message(&NatNetMessage::RequestModelDefinitions)?;
            let deadline = self.deadline(self.config.handshake_timeout);
            if let Some((NatNetMessage::ModelDefinitions(defs), _)) =
                self.await_message(MessageId::ModelDef, deadline)?
            {
                self.apply_model_definitions(&defs);
                return Ok(());
            }
            self.sink.warning(&format!(
                "no ModelDefinitions reply (attempt {attempt}/{attempts})"
            ));
        }
        Err(SessionError::Handshake(format!(
            "no ModelDefinitions after {attempts} attempts"
        )))
    }

    fn deadline(&self, timeout: Duration) -> f64 {
        self.transport.now() + timeout.as_secs_f64()
    }

    /// Waits until `deadline` for a message of kind `wanted`, discarding others.
    ///
    /// Returns `None` once the deadline passes.
    fn await_message(
        &mut self,
        wanted: MessageId,
        deadline: f64,
    ) -> Result<Option<(NatNetMessage, Packet)>, SessionError> {
        loop {
            let remaining = deadline - self.transport.now();
            if remaining <= 0.0 {
                return Ok(None);
            }
            let packet = match self
                .transport
                .wait_for_packet(Some(Duration::from_secs_f64(remaining)))?
            {
                Received::Packet(packet) => packet,
                Received::Timeout => return Ok(None),
                Received::EndOfStream => {
                    return Err(SessionError::Handshake(format!(
                        "stream ended while waiting for {wanted:?}"
                    )))
                }
            };

            let (id, mut cursor) = match split_header(&packet.data, self.config.strict) {
                Ok(split) => split,
                Err(e) => {
                    self.sink
                        .warning(&format!("dropping packet from {}: {e}", packet.source));
                    continue;
                }
            };
            if id != wanted {
                self.sink
                    .debug(&format!("ignoring {id:?} while waiting for {wanted:?}"));
                continue;
            }
            match decode_payload(id, &mut cursor, self.version, self.config.strict) {
                Ok(msg) => return Ok(Some((msg, packet))),
                Err(e) => self
                    .sink
                    .warning(&format!("dropping {id:?} from {}: {e}", packet.source)),
            }
        }
    }

    // ── Receive loop ──────────────────────────────────────────────────────────

    /// Waits up to `timeout` for one packet and dispatches it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] unless the session is `Ready`.
    /// - [`SessionError::Transport`] on socket failure; the session stops.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<RunOutcome, SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotConnected(self.state));
        }
        let result = self.receive_and_dispatch(timeout);
        match &result {
            Ok(RunOutcome::EndOfStream) => {
                self.sink.info("end of stream");
                self.state = SessionState::Stopped;
            }
            Ok(_) => {}
            Err(e) => {
                self.sink.fatal(&e.to_string());
                self.state = SessionState::Stopped;
            }
        }
        result
    }

    fn receive_and_dispatch(&mut self, timeout: Option<Duration>) -> Result<RunOutcome, SessionError> {
        let outcome = match self.transport.wait_for_packet(timeout)? {
            Received::Packet(packet) => self.dispatch(&packet)?,
            Received::Timeout => {
                self.sink.debug("no packet before timeout");
                RunOutcome::TimedOut
            }
            Received::EndOfStream => return Ok(RunOutcome::EndOfStream),
        };
        self.send_echo_if_due()?;
        Ok(outcome)
    }

    /// Calls [`run_once`](Self::run_once) until stopped or the stream ends.
    ///
    /// # Errors
    ///
    /// Returns the first error from `run_once`.
    pub fn spin(&mut self, timeout: Option<Duration>) -> Result<(), SessionError> {
        while !self.stop.load(Ordering::Relaxed) {
            if self.run_once(timeout)? == RunOutcome::EndOfStream {
                return Ok(());
            }
        }
        self.sink.info("stop requested");
        self.state = SessionState::Stopped;
        Ok(())
    }

    fn dispatch(&mut self, packet: &Packet) -> Result<RunOutcome, SessionError> {
        let (id, mut cursor) = match split_header(&packet.data, self.config.strict) {
            Ok(split) => split,
            Err(e) => {
                self.sink
                    .warning(&format!("dropping packet from {}: {e}", packet.source));
                return Ok(RunOutcome::Dropped);
            }
        };
        if !matches!(
            id,
            MessageId::FrameOfData | MessageId::ModelDef | MessageId::EchoResponse
        ) {
            self.sink
                .info(&format!("unhandled message type {id:?} from {}", packet.source));
            return Ok(RunOutcome::Ignored(id));
        }

        let msg = match decode_payload(id, &mut cursor, self.version, self.config.strict) {
            Ok(msg) => msg,
            Err(e) => {
                self.sink
                    .warning(&format!("dropping {id:?} from {}: {e}", packet.source));
                return Ok(RunOutcome::Dropped);
            }
        };

        match msg {
            NatNetMessage::FrameOfData(frame) => self.handle_frame(&frame, packet)?,
            NatNetMessage::ModelDefinitions(defs) => self.apply_model_definitions(&defs),
            echo @ NatNetMessage::EchoResponse(_) => {
                if self.clock.is_none() {
                    return Ok(RunOutcome::Ignored(id));
                }
                self.handle_echo_response(&echo, packet);
            }
            other => {
                self.sink
                    .info(&format!("unhandled message type {:?}", other.message_id()));
                return Ok(RunOutcome::Ignored(id));
            }
        }
        Ok(RunOutcome::Dispatched(id))
    }

    fn handle_frame(
        &mut self,
        frame: &FrameOfDataMessage,
        packet: &Packet,
    ) -> Result<(), SessionError> {
        let now = self.transport.now();
        let timing = self.clock.as_ref().and_then(|clock| {
            TimestampAndLatency::calculate(&frame.timing_info, packet.received_at, now, clock)
        });
        if timing.is_none() {
            self.sink.debug(&format!(
                "frame {} has no latency: hardware timestamps or clock sync missing",
                frame.frame_number
            ));
        }

        if let Some(callback) = self.frame_callback.as_mut() {
            callback(&frame.rigid_bodies, &frame.labelled_markers, timing.as_ref());
        }

        if frame.tracked_models_changed() {
            self.sink.info(&format!(
                "frame {} reports tracked models changed; requesting model definitions",
                frame.frame_number
            ));
            self.send_message(&NatNetMessage::RequestModelDefinitions)?;
        }
        Ok(())
    }

    /// Feeds an echo response to the clock.  Returns whether it was accepted
    /// as the answer to the outstanding request.
    fn handle_echo_response(&mut self, msg: &NatNetMessage, packet: &Packet) -> bool {
        let (NatNetMessage::EchoResponse(response), Some(clock)) = (msg, self.clock.as_mut())
        else {
            return false;
        };
        match clock.handle_echo_response(response, packet.received_at) {
            Ok(outcome) => {
                let message = match outcome {
                    EchoOutcome::Initialised { rtt } => {
                        format!("clock sync initialised, RTT {:.3} ms", rtt * 1e3)
                    }
                    EchoOutcome::Accepted { rtt, correction } => format!(
                        "echo accepted, RTT {:.3} ms, correction {:.3} us",
                        rtt * 1e3,
                        correction * 1e6
                    ),
                    EchoOutcome::Rejected { rtt, threshold } => format!(
                        "echo rejected, RTT {:.3} ms above {:.3} ms",
                        rtt * 1e3,
                        threshold * 1e3
                    ),
                };
                self.sink.debug(&message);
                true
            }
            Err(e) => {
                self.sink.warning(&e.to_string());
                false
            }
        }
    }

    fn send_echo_if_due(&mut self) -> Result<(), SessionError> {
        let now = self.transport.now();
        let request = match self.clock.as_mut() {
            Some(clock) if clock.echo_due(now) => clock.request_echo(now),
            _ => return Ok(()),
        };
        self.send_message(&NatNetMessage::EchoRequest(request))
    }

    fn send_message(&mut self, msg: &NatNetMessage) -> Result<(), SessionError> {
        let packet = encode_message(msg, self.version)?;
        self.transport.send(&packet)?;
        Ok(())
    }

    /// Replaces the rigid body name map and notifies the model callback.
    fn apply_model_definitions(&mut self, defs: &ModelDefinitionsMessage) {
        let mut names = HashMap::new();
        for body in defs.rigid_bodies() {
            let Some(name) = &body.name else {
                continue;
            };
            if let Some(previous) = names.insert(body.id, name.clone()) {
                if previous != *name {
                    self.sink.warning(&format!(
                        "rigid body id {} is used by both {previous:?} and {name:?}; keeping {name:?}",
                        body.id
                    ));
                }
            }
        }

        if names != self.rigid_body_names {
            self.sink.info(&format!(
                "model definitions updated: {} rigid bodies",
                names.len()
            ));
            self.rigid_body_names = names;
        }

        if let Some(callback) = self.model_callback.as_mut() {
            let rigid_bodies: Vec<_> = defs.rigid_bodies().collect();
            let skeletons: Vec<_> = defs.skeletons().collect();
            let marker_sets: Vec<_> = defs.marker_sets().collect();
            callback(&rigid_bodies, &skeletons, &marker_sets);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
