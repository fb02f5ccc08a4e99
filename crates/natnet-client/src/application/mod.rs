//! Application layer of the client.
//!
//! # What lives here?
//!
//! - **`session`** – The `ClientSession` state machine: handshake, clock
//!   sync scheduling and the receive-dispatch loop.  It depends only on the
//!   two ports below, never on concrete sockets.
//!
//! - **`transport`** – The `Transport` trait the session sends and receives
//!   datagrams through.  Implementations live in the infrastructure layer.
//!
//! - **`diagnostics`** – The `DiagnosticSink` trait the session reports to,
//!   with a `tracing`-backed default and an in-memory recorder for tests.

pub mod diagnostics;
pub mod session;
pub mod transport;
