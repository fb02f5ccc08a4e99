//! natnet-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does natnet-client do? (for beginners)
//!
//! A motion-capture server (such as Motive) tracks reflective markers with
//! its cameras and streams the result over UDP.  This crate is the receiving
//! end:
//!
//! 1. Finds the server (by address, or by broadcast discovery) and asks for
//!    its `ServerInfo`: protocol version, clock frequency and multicast group.
//! 2. Joins the multicast group the frames are streamed to.
//! 3. Bounces echo packets off the server to learn how its clock relates to
//!    ours, so frame timestamps can be turned into local times and latencies.
//! 4. Fetches the model definitions to learn the names of the rigid bodies.
//! 5. Hands every decoded frame to a callback, on the caller's thread.
//!
//! The wire format and clock arithmetic live in `natnet-core`; this crate
//! adds sockets, the session state machine and configuration.

/// Application layer: the session state machine and its ports.
pub mod application;

/// Infrastructure layer: UDP transport, simulated transport and config file.
pub mod infrastructure;

pub use application::diagnostics::{DiagnosticSink, RecordingSink, TracingSink};
pub use application::session::{
    ClientSession, RunOutcome, SessionConfig, SessionError, SessionState,
};
pub use application::transport::{Packet, Received, Transport, TransportError};
pub use infrastructure::network::{connect, Connection};
