//! Integration tests for the client session against a simulated server.
//!
//! # Purpose
//!
//! These tests drive `ClientSession` through its public API over a
//! `FakeTransport`, the same way the binary drives it over UDP.  They verify:
//!
//! - The handshake: Connect or Discovery, multicast join, initial clock
//!   sync, model definitions and the rigid body name map.
//! - The receive loop: frame dispatch with latency, model re-requests,
//!   steady-state echoes, and what happens to packets that do not decode.
//! - Failure paths: a silent server, a unicast server, a failing socket and
//!   the end of the stream.
//!
//! # Virtual time
//!
//! `FakeTransport` runs on a virtual clock that only moves when a packet is
//! delivered or a wait times out.  The simulated server's clock reads
//! `1000 s + local time`, and every request takes 0.2 ms each way, so every
//! expected latency below follows from those two numbers.

use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use natnet_client::application::diagnostics::{RecordingSink, Severity};
use natnet_client::application::session::{
    ClientSession, RunOutcome, SessionConfig, SessionError, SessionState,
};
use natnet_client::application::transport::Transport;
use natnet_client::infrastructure::network::fake::{
    FakeTransport, SimulatedServer, SIMULATED_RIGID_BODY_ID,
};
use natnet_core::protocol::messages::{
    EchoResponseMessage, FrameParams, ModelDescription, RigidBodyDescription,
};
use natnet_core::protocol::{encode_message, MessageId, NatNetMessage, Version};
use natnet_core::TimestampAndLatency;

const WAIT: Option<Duration> = Some(Duration::from_millis(100));
const FRAME_INTERVAL: f64 = 1.0 / 120.0;

/// Rigid body ids and timing of every frame the callback saw.
type FrameLog = Rc<RefCell<Vec<(Vec<u32>, Option<TimestampAndLatency>)>>>;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn config_for(server: &SimulatedServer) -> SessionConfig {
    SessionConfig {
        server_address: Some(server.address.ip()),
        initial_sync_echoes: 10,
        ..SessionConfig::default()
    }
}

fn session_with(
    server: SimulatedServer,
    config: SessionConfig,
) -> (ClientSession<FakeTransport>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let session = ClientSession::with_sink(FakeTransport::with_server(server), config, sink.clone());
    (session, sink)
}

/// A session that has completed the handshake with a 3.0 server.
fn ready_session() -> (ClientSession<FakeTransport>, Arc<RecordingSink>) {
    let server = SimulatedServer::motive_v3();
    let config = config_for(&server);
    let (mut session, sink) = session_with(server, config);
    session.connect().expect("handshake");
    (session, sink)
}

fn record_frames<T: Transport>(session: &mut ClientSession<T>) -> FrameLog {
    let log: FrameLog = Rc::default();
    let sink = Rc::clone(&log);
    session.set_frame_callback(move |rigid_bodies, _markers, timing| {
        let ids = rigid_bodies.iter().map(|b| b.id).collect();
        sink.borrow_mut().push((ids, timing.copied()));
    });
    log
}

fn run_until_end(session: &mut ClientSession<FakeTransport>) -> Vec<RunOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = session.run_once(WAIT).expect("run_once");
        outcomes.push(outcome);
        if outcome == RunOutcome::EndOfStream {
            return outcomes;
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

#[test]
fn test_handshake_with_v3_server() {
    // Arrange
    let server = SimulatedServer::motive_v3();
    let config = config_for(&server);
    let (mut session, sink) = session_with(server, config);

    // Act
    session.connect().expect("handshake");

    // Assert
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.version(), Version::release(3, 0));
    assert_eq!(
        session.transport().joined_group(),
        Some((Ipv4Addr::new(239, 255, 42, 99), 1511))
    );
    assert!(session.clock().is_some_and(|c| c.is_synchronised()));
    assert_eq!(session.rigid_body_name(SIMULATED_RIGID_BODY_ID), Some("RaceQuad"));
    assert_eq!(session.rigid_body_names().len(), 1);
    assert_eq!(session.transport().count_sent(MessageId::Connect), 1);
    assert_eq!(session.transport().count_sent(MessageId::EchoRequest), 10);
    assert_eq!(session.transport().count_sent(MessageId::RequestModelDef), 1);
    assert!(sink.contains(Severity::Info, "connected to Motive"));
    assert!(sink.messages(Severity::Fatal).is_empty());
}

#[test]
fn test_model_callback_runs_during_handshake() {
    let server = SimulatedServer::motive_v3();
    let config = config_for(&server);
    let (mut session, _sink) = session_with(server, config);
    let seen: Rc<RefCell<Vec<(usize, usize, usize)>>> = Rc::default();
    let recorder = Rc::clone(&seen);
    session.set_model_callback(move |bodies, skeletons, marker_sets| {
        recorder
            .borrow_mut()
            .push((bodies.len(), skeletons.len(), marker_sets.len()));
    });

    session.connect().expect("handshake");

    assert_eq!(*seen.borrow(), vec![(1, 0, 1)]);
}

#[test]
fn test_discovery_retargets_to_responding_server() {
    // Arrange
    let server = SimulatedServer::motive_v3();
    let address = server.address;
    let config = SessionConfig {
        server_address: None,
        initial_sync_echoes: 5,
        ..SessionConfig::default()
    };
    let (mut session, sink) = session_with(server, config);

    // Act
    session.connect().expect("handshake");

    // Assert
    assert_eq!(session.transport().server_address(), Some(address));
    assert_eq!(session.transport().count_sent(MessageId::Discovery), 1);
    assert_eq!(session.transport().count_sent(MessageId::Connect), 0);
    assert!(sink.contains(Severity::Info, "discovered server at 10.0.0.5:1510"));
}

#[test]
fn test_silent_server_fails_after_configured_attempts() {
    // Arrange
    let mut server = SimulatedServer::motive_v3();
    server.answer_connect = false;
    let config = SessionConfig {
        handshake_attempts: 3,
        ..config_for(&server)
    };
    let (mut session, sink) = session_with(server, config);

    // Act
    let result = session.connect();

    // Assert
    assert!(matches!(result, Err(SessionError::Handshake(_))));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.transport().count_sent(MessageId::Connect), 3);
    assert_eq!(sink.messages(Severity::Warning).len(), 3);
    assert!(sink.contains(Severity::Fatal, "no ServerInfo after 3 attempts"));
}

#[test]
fn test_unanswered_echoes_fail_the_handshake() {
    let mut server = SimulatedServer::motive_v3();
    server.answer_echoes = false;
    let config = SessionConfig {
        initial_sync_echoes: 4,
        ..config_for(&server)
    };
    let (mut session, sink) = session_with(server, config);

    let result = session.connect();

    assert!(matches!(result, Err(SessionError::Handshake(_))));
    assert_eq!(session.transport().count_sent(MessageId::EchoRequest), 4);
    assert!(sink.contains(Severity::Fatal, "none of 4 clock sync echoes"));
}

#[test]
fn test_unanswered_model_request_fails_the_handshake() {
    let mut server = SimulatedServer::motive_v3();
    server.answer_model_requests = false;
    let config = SessionConfig {
        handshake_attempts: 2,
        ..config_for(&server)
    };
    let (mut session, sink) = session_with(server, config);

    let result = session.connect();

    assert!(matches!(result, Err(SessionError::Handshake(_))));
    assert_eq!(session.transport().count_sent(MessageId::RequestModelDef), 2);
    assert!(sink.contains(Severity::Fatal, "no ModelDefinitions"));
}

#[test]
fn test_unicast_server_is_rejected() {
    // Arrange
    let mut server = SimulatedServer::motive_v3();
    if let Some(connection) = server.info.connection_info.as_mut() {
        connection.multicast = false;
    }
    let config = config_for(&server);
    let (mut session, sink) = session_with(server, config);

    // Act
    let result = session.connect();

    // Assert
    assert!(matches!(result, Err(SessionError::Handshake(ref m)) if m.contains("unicast")));
    assert_eq!(session.transport().joined_group(), None);
    assert!(sink.contains(Severity::Fatal, "unicast"));
}

#[test]
fn test_configured_multicast_overrides_announced_group() {
    let server = SimulatedServer::motive_v3();
    let config = SessionConfig {
        multicast_group: Some(Ipv4Addr::new(239, 1, 2, 3)),
        data_port: Some(9000),
        ..config_for(&server)
    };
    let (mut session, _sink) = session_with(server, config);

    session.connect().expect("handshake");

    assert_eq!(
        session.transport().joined_group(),
        Some((Ipv4Addr::new(239, 1, 2, 3), 9000))
    );
}

#[test]
fn test_legacy_server_needs_configured_multicast() {
    let server = SimulatedServer::motive_legacy(Version::release(2, 9));
    let config = config_for(&server);
    let (mut session, sink) = session_with(server, config);

    let result = session.connect();

    assert!(matches!(result, Err(SessionError::Handshake(_))));
    assert!(sink.contains(Severity::Fatal, "configure one"));
}

#[test]
fn test_legacy_server_streams_frames_without_timing() {
    // Arrange
    let server = SimulatedServer::motive_legacy(Version::release(2, 9));
    let config = SessionConfig {
        multicast_group: Some(Ipv4Addr::new(239, 255, 42, 99)),
        data_port: Some(1511),
        ..config_for(&server)
    };
    let (mut session, sink) = session_with(server, config);
    let frames = record_frames(&mut session);

    // Act
    session.connect().expect("handshake");
    session
        .transport_mut()
        .stream_frames(3, FRAME_INTERVAL)
        .expect("frames");
    session.transport_mut().finish();
    let outcomes = run_until_end(&mut session);

    // Assert
    assert_eq!(session.version(), Version::release(2, 9));
    assert!(session.clock().is_none());
    assert_eq!(session.transport().count_sent(MessageId::EchoRequest), 0);
    assert!(sink.contains(Severity::Info, "no clock frequency"));
    assert_eq!(
        outcomes,
        vec![
            RunOutcome::Dispatched(MessageId::FrameOfData),
            RunOutcome::Dispatched(MessageId::FrameOfData),
            RunOutcome::Dispatched(MessageId::FrameOfData),
            RunOutcome::EndOfStream,
        ]
    );
    let frames = frames.borrow();
    assert_eq!(frames.len(), 3);
    assert!(frames
        .iter()
        .all(|(ids, timing)| *ids == [SIMULATED_RIGID_BODY_ID] && timing.is_none()));
}

// ── Receive loop ──────────────────────────────────────────────────────────────

#[test]
fn test_frames_are_dispatched_with_latency() {
    // Arrange
    let (mut session, _sink) = ready_session();
    let frames = record_frames(&mut session);
    let start = session.transport().now();

    // Act
    session
        .transport_mut()
        .stream_frames(5, FRAME_INTERVAL)
        .expect("frames");
    for _ in 0..5 {
        let outcome = session.run_once(WAIT).expect("run_once");
        assert_eq!(outcome, RunOutcome::Dispatched(MessageId::FrameOfData));
    }

    // Assert
    let frames = frames.borrow();
    assert_eq!(frames.len(), 5);
    for (i, (ids, timing)) in frames.iter().enumerate() {
        assert_eq!(*ids, [SIMULATED_RIGID_BODY_ID]);
        let timing = timing.expect("v3 frames carry timing once synchronised");
        let transmit_at = start + (i + 1) as f64 * FRAME_INTERVAL;
        assert!((timing.system_latency - 0.005).abs() < 1e-5, "{timing:?}");
        assert!((timing.transit_latency - 0.0002).abs() < 1e-5, "{timing:?}");
        assert!(timing.processing_latency.abs() < 1e-9);
        assert!((timing.timestamp - (transmit_at - 0.005)).abs() < 1e-5);
        assert!((timing.latency() - 0.0052).abs() < 2e-5);
    }
}

#[test]
fn test_steady_state_echoes_keep_clock_synchronised() {
    // Arrange
    let (mut session, _sink) = ready_session();
    session.transport_mut().clear_sent();
    let echoes_before = session.clock().map_or(0, |c| c.echo_count());

    // Act: two seconds of frames
    session
        .transport_mut()
        .stream_frames(240, FRAME_INTERVAL)
        .expect("frames");
    session.transport_mut().finish();
    let outcomes = run_until_end(&mut session);

    // Assert
    let echo_requests = session.transport().count_sent(MessageId::EchoRequest);
    assert!((3..=5).contains(&echo_requests), "{echo_requests} echoes sent");
    let echo_replies = outcomes
        .iter()
        .filter(|o| **o == RunOutcome::Dispatched(MessageId::EchoResponse))
        .count();
    assert_eq!(echo_replies, echo_requests);
    let clock = session.clock().expect("clock");
    assert!(clock.is_synchronised());
    assert_eq!(clock.echo_count(), echoes_before + echo_requests as u64);
}

#[test]
fn test_tracked_models_change_requests_definitions_again() {
    // Arrange
    let (mut session, sink) = ready_session();
    session.transport_mut().clear_sent();
    sink.clear();
    let now = session.transport().now();
    let mut frame = session
        .transport()
        .server()
        .expect("server")
        .make_frame(1, now + 0.001);
    frame.params = FrameParams(FrameParams::TRACKED_MODELS_CHANGED);
    session
        .transport_mut()
        .deliver_message(&NatNetMessage::FrameOfData(Box::new(frame)), 0.0012)
        .expect("encode");

    // Act
    let first = session.run_once(WAIT).expect("frame");
    let second = session.run_once(WAIT).expect("definitions");

    // Assert
    assert_eq!(first, RunOutcome::Dispatched(MessageId::FrameOfData));
    assert_eq!(second, RunOutcome::Dispatched(MessageId::ModelDef));
    assert_eq!(session.transport().count_sent(MessageId::RequestModelDef), 1);
    // Same definitions as before: the name map is left alone.
    assert!(!sink.contains(Severity::Info, "model definitions updated"));
    assert_eq!(session.rigid_body_name(SIMULATED_RIGID_BODY_ID), Some("RaceQuad"));
}

#[test]
fn test_changed_definitions_replace_name_map() {
    // Arrange
    let (mut session, sink) = ready_session();
    let mut defs = session
        .transport()
        .server()
        .expect("server")
        .model_definitions
        .clone();
    defs.models.push(ModelDescription::RigidBody(RigidBodyDescription {
        name: Some("Wand".to_string()),
        id: 7,
        parent_id: -1,
        offset_from_parent: glam::Vec3::ZERO,
        markers: Vec::new(),
    }));
    session
        .transport_mut()
        .deliver_message(&NatNetMessage::ModelDefinitions(defs), 0.001)
        .expect("encode");

    // Act
    let outcome = session.run_once(WAIT).expect("run_once");

    // Assert
    assert_eq!(outcome, RunOutcome::Dispatched(MessageId::ModelDef));
    assert_eq!(session.rigid_body_name(7), Some("Wand"));
    assert_eq!(session.rigid_body_names().len(), 2);
    assert!(sink.contains(Severity::Info, "model definitions updated: 2 rigid bodies"));
}

#[test]
fn test_duplicate_rigid_body_id_keeps_last_name() {
    // Arrange
    let mut server = SimulatedServer::motive_v3();
    server
        .model_definitions
        .models
        .push(ModelDescription::RigidBody(RigidBodyDescription {
            name: Some("Impostor".to_string()),
            id: SIMULATED_RIGID_BODY_ID,
            parent_id: -1,
            offset_from_parent: glam::Vec3::ZERO,
            markers: Vec::new(),
        }));
    let config = config_for(&server);
    let (mut session, sink) = session_with(server, config);

    // Act
    session.connect().expect("handshake");

    // Assert
    assert_eq!(session.rigid_body_name(SIMULATED_RIGID_BODY_ID), Some("Impostor"));
    assert!(sink.contains(Severity::Warning, "is used by both"));
}

#[test]
fn test_malformed_packets_are_dropped_and_loop_continues() {
    // Arrange
    let (mut session, sink) = ready_session();
    let frames = record_frames(&mut session);
    sink.clear();
    let transport = session.transport_mut();
    transport.deliver(vec![0xff, 0xff, 0, 0], 0.001); // unknown id
    transport.deliver(vec![7, 0, 200, 0, 1, 2], 0.002); // truncated frame
    transport.deliver(vec![7], 0.003); // truncated header
    transport.stream_frames(1, 0.01).expect("frame");

    // Act
    let outcomes: Vec<_> = (0..4)
        .map(|_| session.run_once(WAIT).expect("run_once"))
        .collect();

    // Assert
    assert_eq!(
        outcomes,
        vec![
            RunOutcome::Dropped,
            RunOutcome::Dropped,
            RunOutcome::Dropped,
            RunOutcome::Dispatched(MessageId::FrameOfData),
        ]
    );
    assert_eq!(sink.messages(Severity::Warning).len(), 3);
    assert_eq!(frames.borrow().len(), 1);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_strict_mode_drops_padded_packets() {
    // Arrange: one frame followed by two bytes of padding, once per mode
    let mut outcomes = Vec::new();
    for strict in [false, true] {
        let server = SimulatedServer::motive_v3();
        let config = SessionConfig {
            strict,
            ..config_for(&server)
        };
        let (mut session, _sink) = session_with(server, config);
        session.connect().expect("handshake");
        let now = session.transport().now();
        let frame = session
            .transport()
            .server()
            .expect("server")
            .make_frame(1, now);
        let mut bytes = encode_message(
            &NatNetMessage::FrameOfData(Box::new(frame)),
            Version::release(3, 0),
        )
        .expect("encode");
        bytes.extend_from_slice(&[0, 0]);
        session.transport_mut().deliver(bytes, 0.001);

        // Act
        outcomes.push(session.run_once(WAIT).expect("run_once"));
    }

    // Assert
    assert_eq!(
        outcomes,
        vec![
            RunOutcome::Dispatched(MessageId::FrameOfData),
            RunOutcome::Dropped,
        ]
    );
}

#[test]
fn test_unhandled_message_is_ignored() {
    let (mut session, sink) = ready_session();
    let info = session.server_info().expect("server info").clone();
    session
        .transport_mut()
        .deliver_message(&NatNetMessage::ServerInfo(info), 0.001)
        .expect("encode");

    let outcome = session.run_once(WAIT).expect("run_once");

    assert_eq!(outcome, RunOutcome::Ignored(MessageId::ServerInfo));
    assert!(sink.contains(Severity::Info, "unhandled message type ServerInfo"));
}

#[test]
fn test_mismatched_echo_response_is_reported() {
    // Arrange
    let (mut session, sink) = ready_session();
    sink.clear();
    let stray = EchoResponseMessage {
        request_timestamp: 12_345,
        received_timestamp: 0,
    };
    session
        .transport_mut()
        .deliver_message(&NatNetMessage::EchoResponse(stray), 0.001)
        .expect("encode");

    // Act
    let outcome = session.run_once(WAIT).expect("run_once");

    // Assert
    assert_eq!(outcome, RunOutcome::Dispatched(MessageId::EchoResponse));
    assert!(sink.contains(Severity::Warning, "does not match outstanding request"));
    assert!(session.clock().is_some_and(|c| c.is_synchronised()));
}

#[test]
fn test_timeout_leaves_session_ready() {
    let (mut session, _sink) = ready_session();
    let before = session.transport().now();

    let outcome = session.run_once(WAIT).expect("run_once");

    assert_eq!(outcome, RunOutcome::TimedOut);
    assert_eq!(session.state(), SessionState::Ready);
    assert!((session.transport().now() - before - 0.1).abs() < 1e-9);
}

#[test]
fn test_end_of_stream_stops_session() {
    // Arrange
    let (mut session, sink) = ready_session();
    session.transport_mut().finish();

    // Act
    let outcome = session.run_once(WAIT).expect("run_once");
    let after = session.run_once(WAIT);

    // Assert
    assert_eq!(outcome, RunOutcome::EndOfStream);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(matches!(
        after,
        Err(SessionError::NotConnected(SessionState::Stopped))
    ));
    assert!(sink.contains(Severity::Info, "end of stream"));
}

#[test]
fn test_spin_returns_at_end_of_stream() {
    let (mut session, _sink) = ready_session();
    let frames = record_frames(&mut session);
    session
        .transport_mut()
        .stream_frames(12, FRAME_INTERVAL)
        .expect("frames");
    session.transport_mut().finish();

    session.spin(WAIT).expect("spin");

    assert_eq!(frames.borrow().len(), 12);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_transport_failure_stops_session() {
    // Arrange
    let (mut session, sink) = ready_session();
    session
        .transport_mut()
        .fail_next_wait(io::ErrorKind::ConnectionReset);

    // Act
    let result = session.run_once(WAIT);

    // Assert
    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(sink.messages(Severity::Fatal).len(), 1);
}

#[test]
fn test_server_on_other_port_is_not_reached() {
    let server = SimulatedServer::motive_v3();
    let config = SessionConfig {
        server_address: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))),
        command_port: 1600,
        handshake_attempts: 1,
        ..SessionConfig::default()
    };
    let (mut session, _sink) = session_with(server, config);

    let result = session.connect();

    assert!(matches!(result, Err(SessionError::Handshake(_))));
    assert_eq!(
        session.transport().server_address().map(|a| a.port()),
        Some(1600)
    );
}
