//! In-memory transport with a simulated NatNet server.
//!
//! # Why a fake transport?
//!
//! A real session needs a motion-capture server on the network, and its
//! timing depends on the wall clock.  [`FakeTransport`] replaces both:
//!
//! - Time is virtual.  It only moves when a packet is delivered or a wait
//!   times out, so a hundred clock sync echoes take no real time at all.
//! - An optional [`SimulatedServer`] answers Connect, Discovery, echo and
//!   model requests the way a server would, with a configurable one-way
//!   delay and a server clock that runs at its own offset and rate.
//! - Tests can queue arbitrary bytes, fail the next wait, or end the stream.
//!
//! # Usage in tests
//!
//! ```ignore
//! let transport = FakeTransport::with_server(SimulatedServer::motive_v3());
//! let mut session = ClientSession::new(transport, config);
//! session.connect()?;
//!
//! session.transport_mut().stream_frames(10, 1.0 / 120.0)?;
//! session.transport_mut().finish();
//! session.spin(Some(Duration::from_millis(100)))?;
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use glam::{Quat, Vec3};
use natnet_core::protocol::messages::connect::CLIENT_VERSION;
use natnet_core::protocol::messages::{
    ConnectionInfo, EchoResponseMessage, FrameOfDataMessage, FrameParams, LabelledMarker,
    MarkerOffset, MarkerParams, MarkerSetDescription, ModelDefinitionsMessage, ModelDescription,
    RigidBody, RigidBodyDescription, RigidBodyMarkers, RigidBodyParams, ServerInfoMessage,
    TimingInfo,
};
use natnet_core::protocol::version::fields;
use natnet_core::protocol::{
    decode_message, encode_message, MessageId, NatNetMessage, ProtocolError, Version,
};

use crate::application::transport::{Packet, Received, Transport, TransportError};

/// Clock frequency of the simulated server, matching a typical Motive host.
pub const SIMULATED_CLOCK_FREQUENCY: u64 = 3_312_787;

/// Streaming id of the simulated server's rigid body.
pub const SIMULATED_RIGID_BODY_ID: u32 = 2;

/// Camera mid-exposure precedes transmission by this long.
const SIMULATED_SYSTEM_LATENCY: f64 = 0.005;

// ── Simulated server ──────────────────────────────────────────────────────────

/// A NatNet server that answers requests sent through a [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct SimulatedServer {
    /// Address replies come from.
    pub address: SocketAddr,
    pub info: ServerInfoMessage,
    pub model_definitions: ModelDefinitionsMessage,
    /// Server seconds at local time zero.
    pub clock_offset: f64,
    /// Relative rate error of the server clock.
    pub clock_rate: f64,
    /// Delay of each direction, in seconds.
    pub one_way_delay: f64,
    pub answer_connect: bool,
    pub answer_echoes: bool,
    pub answer_model_requests: bool,
}

impl SimulatedServer {
    /// A protocol 3.0 Motive server with one rigid body named `RaceQuad`.
    pub fn motive_v3() -> Self {
        let body = RigidBodyDescription {
            name: Some("RaceQuad".to_string()),
            id: SIMULATED_RIGID_BODY_ID,
            parent_id: -1,
            offset_from_parent: Vec3::ZERO,
            markers: marker_layout()
                .into_iter()
                .map(|position| MarkerOffset {
                    position,
                    required_active_label: 0,
                })
                .collect(),
        };
        let marker_set = MarkerSetDescription {
            name: "RaceQuad".to_string(),
            marker_names: (1..=5).map(|i| format!("Marker{i}")).collect(),
        };

        Self {
            address: SocketAddr::from(([10, 0, 0, 5], 1510)),
            info: ServerInfoMessage {
                app_name: "Motive".to_string(),
                app_version: Version::release(2, 1),
                natnet_version: Version::release(3, 0),
                high_resolution_clock_frequency: Some(SIMULATED_CLOCK_FREQUENCY),
                connection_info: Some(ConnectionInfo {
                    data_port: 1511,
                    multicast: true,
                    multicast_address: Ipv4Addr::new(239, 255, 42, 99),
                }),
            },
            model_definitions: ModelDefinitionsMessage {
                models: vec![
                    ModelDescription::RigidBody(body),
                    ModelDescription::MarkerSet(marker_set),
                ],
            },
            clock_offset: 1000.0,
            clock_rate: 0.0,
            one_way_delay: 0.0002,
            answer_connect: true,
            answer_echoes: true,
            answer_model_requests: true,
        }
    }

    /// A Motive server speaking `natnet_version`, which must be older than 3.0.
    ///
    /// Such servers announce neither a clock frequency nor a multicast group,
    /// and their model definitions carry no rigid body marker offsets.
    pub fn motive_legacy(natnet_version: Version) -> Self {
        let mut server = Self::motive_v3();
        server.info.natnet_version = natnet_version;
        server.info.high_resolution_clock_frequency = None;
        server.info.connection_info = None;
        for model in &mut server.model_definitions.models {
            if let ModelDescription::RigidBody(body) = model {
                if !fields::rigid_body_description_markers(natnet_version) {
                    body.markers.clear();
                }
                if !fields::rigid_body_description_name(natnet_version) {
                    body.name = None;
                }
            }
        }
        server
    }

    pub fn version(&self) -> Version {
        self.info.natnet_version
    }

    /// Server clock reading, in seconds, at local time `local`.
    pub fn server_time(&self, local: f64) -> f64 {
        self.clock_offset + local * (1.0 + self.clock_rate)
    }

    /// Server clock reading, in ticks, at local time `local`.
    pub fn server_ticks(&self, local: f64) -> u64 {
        (self.server_time(local) * self.clock_frequency() as f64).round() as u64
    }

    fn clock_frequency(&self) -> u64 {
        self.info
            .high_resolution_clock_frequency
            .unwrap_or(SIMULATED_CLOCK_FREQUENCY)
    }

    /// Builds frame `frame_number` as transmitted at local time `transmit_at`.
    ///
    /// The rigid body circles the origin; every field the server's protocol
    /// version carries is filled in.
    pub fn make_frame(&self, frame_number: u32, transmit_at: f64) -> FrameOfDataMessage {
        let v = self.version();
        let angle = frame_number as f32 * 0.01;
        let position = Vec3::new(angle.cos(), 1.0, angle.sin());

        let markers: Vec<Vec3> = marker_layout().into_iter().map(|m| position + m).collect();
        let body = RigidBody {
            id: SIMULATED_RIGID_BODY_ID,
            position,
            orientation: Quat::from_rotation_y(angle),
            markers: fields::rigid_body_inline_markers(v).then(|| {
                let with_details = fields::rigid_body_marker_ids_and_sizes(v);
                RigidBodyMarkers {
                    positions: markers.clone(),
                    ids: with_details.then(|| (1..=markers.len() as u32).collect()),
                    sizes: with_details.then(|| vec![0.014; markers.len()]),
                    padding: 0,
                }
            }),
            mean_error: fields::rigid_body_mean_error(v).then_some(0.0005),
            params: fields::rigid_body_params(v)
                .then_some(RigidBodyParams(RigidBodyParams::TRACKING_VALID)),
        };

        let labelled_markers = if fields::labelled_markers(v) {
            markers
                .iter()
                .zip(1u16..)
                .map(|(&position, marker_id)| LabelledMarker {
                    model_id: SIMULATED_RIGID_BODY_ID as u16,
                    marker_id,
                    position,
                    size: 0.014,
                    params: fields::labelled_marker_params(v).then_some(MarkerParams(
                        MarkerParams::POINT_CLOUD_SOLVED | MarkerParams::HAS_MODEL,
                    )),
                    residual: fields::labelled_marker_residual(v).then_some(0.0001),
                })
                .collect()
        } else {
            Vec::new()
        };

        let hardware = fields::hardware_timestamps(v);
        let timestamp = self.server_time(transmit_at);
        FrameOfDataMessage {
            frame_number,
            marker_sets: Vec::new(),
            unlabelled_markers: markers,
            rigid_bodies: vec![body],
            skeletons: Vec::new(),
            labelled_markers,
            force_plates: Vec::new(),
            devices: Vec::new(),
            timing_info: TimingInfo {
                timecode: 0,
                timecode_subframe: 0,
                // Pre-2.7 servers send an f32; keep the value representable.
                timestamp: if fields::double_precision_timestamp(v) {
                    timestamp
                } else {
                    f64::from(timestamp as f32)
                },
                camera_mid_exposure_timestamp: hardware
                    .then(|| self.server_ticks(transmit_at - SIMULATED_SYSTEM_LATENCY)),
                camera_data_received_timestamp: hardware
                    .then(|| self.server_ticks(transmit_at - SIMULATED_SYSTEM_LATENCY / 2.0)),
                transmit_timestamp: hardware.then(|| self.server_ticks(transmit_at)),
            },
            params: FrameParams::default(),
            trailer: 0,
        }
    }

    /// The reply to `request`, sent at local time `sent_at`, if the server answers it.
    fn respond(&self, request: &NatNetMessage, sent_at: f64) -> Option<NatNetMessage> {
        match request {
            NatNetMessage::Connect(_) | NatNetMessage::Discovery(_) if self.answer_connect => {
                Some(NatNetMessage::ServerInfo(self.info.clone()))
            }
            NatNetMessage::EchoRequest(echo) if self.answer_echoes => {
                Some(NatNetMessage::EchoResponse(EchoResponseMessage {
                    request_timestamp: echo.timestamp,
                    received_timestamp: self.server_ticks(sent_at + self.one_way_delay),
                }))
            }
            NatNetMessage::RequestModelDefinitions if self.answer_model_requests => Some(
                NatNetMessage::ModelDefinitions(self.model_definitions.clone()),
            ),
            _ => None,
        }
    }

    /// Whether a packet sent to `target` reaches this server.
    fn listens_on(&self, target: SocketAddr) -> bool {
        target.port() == self.address.port()
            && (target.ip() == self.address.ip()
                || target.ip() == std::net::IpAddr::V4(Ipv4Addr::BROADCAST))
    }
}

/// Marker positions relative to the rigid body origin.
fn marker_layout() -> Vec<Vec3> {
    vec![
        Vec3::new(0.16, 0.035, -0.032),
        Vec3::new(-0.031, 0.04, -0.022),
        Vec3::new(0.188, -0.033, -0.016),
        Vec3::new(-0.188, 0.02, 0.012),
        Vec3::new(0.0, 0.05, 0.09),
    ]
}

// ── FakeTransport ─────────────────────────────────────────────────────────────

/// A [`Transport`] on a virtual clock, optionally backed by a [`SimulatedServer`].
#[derive(Debug, Default)]
pub struct FakeTransport {
    now: f64,
    /// Ordered by `received_at`; equal times keep insertion order.
    inbox: Vec<Packet>,
    sent: Vec<Vec<u8>>,
    server: Option<SimulatedServer>,
    server_address: Option<SocketAddr>,
    joined: Option<(Ipv4Addr, u16)>,
    finished: bool,
    pending_failure: Option<io::ErrorKind>,
}

impl FakeTransport {
    /// A transport with nobody on the other end.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(server: SimulatedServer) -> Self {
        Self {
            server: Some(server),
            ..Self::default()
        }
    }

    pub fn server(&self) -> Option<&SimulatedServer> {
        self.server.as_ref()
    }

    pub fn server_mut(&mut self) -> Option<&mut SimulatedServer> {
        self.server.as_mut()
    }

    /// Moves the virtual clock forward.
    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds;
    }

    /// Queues `data` to arrive `delay` seconds from now.
    pub fn deliver(&mut self, data: Vec<u8>, delay: f64) {
        let source = self
            .server
            .as_ref()
            .map_or(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)), |s| s.address);
        self.enqueue(Packet {
            data,
            received_at: self.now + delay,
            source,
        });
    }

    /// Encodes `msg` for the server's protocol version and queues it.
    ///
    /// # Errors
    ///
    /// Returns the encoding error if `msg` does not fit that version.
    pub fn deliver_message(&mut self, msg: &NatNetMessage, delay: f64) -> Result<(), ProtocolError> {
        let bytes = encode_message(msg, self.version())?;
        self.deliver(bytes, delay);
        Ok(())
    }

    /// Queues `count` frames from the simulated server, `interval` seconds apart.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if a generated frame does not fit the
    /// server's version.  Without a server nothing is queued.
    pub fn stream_frames(&mut self, count: u32, interval: f64) -> Result<(), ProtocolError> {
        let Some(server) = self.server.clone() else {
            return Ok(());
        };
        for i in 0..count {
            let transmit_at = self.now + f64::from(i + 1) * interval;
            let frame = server.make_frame(i, transmit_at);
            let msg = NatNetMessage::FrameOfData(Box::new(frame));
            let bytes = encode_message(&msg, server.version())?;
            self.enqueue(Packet {
                data: bytes,
                received_at: transmit_at + server.one_way_delay,
                source: server.address,
            });
        }
        Ok(())
    }

    /// After the queued packets, report end of stream instead of timing out.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Makes the next wait fail with an I/O error of `kind`.
    pub fn fail_next_wait(&mut self, kind: io::ErrorKind) {
        self.pending_failure = Some(kind);
    }

    /// Every packet passed to `send`, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Sent packets that decode, decoded at `version`.
    pub fn sent_messages(&self, version: Version) -> Vec<NatNetMessage> {
        self.sent
            .iter()
            .filter_map(|p| decode_message(p, version, false).ok())
            .collect()
    }

    /// Number of sent packets carrying message `id`.
    pub fn count_sent(&self, id: MessageId) -> usize {
        self.sent
            .iter()
            .filter(|p| p.len() >= 2 && u16::from_le_bytes([p[0], p[1]]) == id as u16)
            .count()
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.server_address
    }

    /// Multicast group and port of the last successful join.
    pub fn joined_group(&self) -> Option<(Ipv4Addr, u16)> {
        self.joined
    }

    fn version(&self) -> Version {
        self.server.as_ref().map_or(CLIENT_VERSION, SimulatedServer::version)
    }

    fn enqueue(&mut self, packet: Packet) {
        let at = self
            .inbox
            .partition_point(|p| p.received_at <= packet.received_at);
        self.inbox.insert(at, packet);
    }
}

impl Transport for FakeTransport {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let target = self.server_address.ok_or(TransportError::NoServerAddress)?;
        self.sent.push(packet.to_vec());

        let Some(server) = self.server.as_ref().filter(|s| s.listens_on(target)) else {
            return Ok(());
        };
        let reply = decode_message(packet, server.version(), false)
            .ok()
            .and_then(|request| server.respond(&request, self.now));
        if let Some(reply) = reply {
            let version = server.version();
            let delay = 2.0 * server.one_way_delay;
            let bytes = encode_message(&reply, version).map_err(|e| {
                TransportError::io("simulate reply", io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            self.deliver(bytes, delay);
        }
        Ok(())
    }

    fn wait_for_packet(&mut self, timeout: Option<Duration>) -> Result<Received, TransportError> {
        if let Some(kind) = self.pending_failure.take() {
            return Err(TransportError::io("poll", io::Error::from(kind)));
        }

        let limit = timeout.map(|t| self.now + t.as_secs_f64());
        if let Some(first) = self.inbox.first() {
            if limit.map_or(true, |limit| first.received_at <= limit) {
                let packet = self.inbox.remove(0);
                self.now = self.now.max(packet.received_at);
                return Ok(Received::Packet(packet));
            }
        }

        match limit {
            Some(_) if self.finished && self.inbox.is_empty() => Ok(Received::EndOfStream),
            Some(limit) => {
                self.now = limit;
                Ok(Received::Timeout)
            }
            // Waiting forever on a silent fake would hang.
            None => Ok(Received::EndOfStream),
        }
    }

    fn join_multicast(&mut self, group: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        if !group.is_multicast() {
            return Err(TransportError::io(
                "join multicast group",
                io::Error::new(io::ErrorKind::InvalidInput, format!("{group} is not multicast")),
            ));
        }
        self.joined = Some((group, port));
        Ok(())
    }

    fn set_server_address(&mut self, address: SocketAddr) {
        self.server_address = Some(address);
    }

    fn now(&self) -> f64 {
        self.now
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
