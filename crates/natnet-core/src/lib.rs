//! # natnet-core
//!
//! Shared library for NatNet motion-capture clients containing the
//! versioned wire codec and the server clock synchronisation logic.
//!
//! It has no dependencies on sockets, threads, or OS clocks; the
//! `natnet-client` crate supplies all of those.
//!
//! # Architecture overview (for beginners)
//!
//! A motion-capture server streams what its cameras see (marker positions,
//! rigid-body poses, skeletons) as UDP packets in the NatNet format.  The
//! exact layout of a frame depends on the protocol version the server
//! announced when the client connected, so every decode takes a
//! [`Version`] alongside the bytes.
//!
//! This crate defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Every packet is a
//!   4-byte header (message id + payload length) followed by a payload that is
//!   decoded into a typed Rust struct and can be encoded back byte for byte.
//!
//! - **`domain`** – Estimating the server's clock from echo round trips, and
//!   turning frame timestamps into local times and latencies.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `natnet_core::ClockSynchronizer` instead of the full module path.
pub use domain::clock_sync::{ClockSyncError, ClockSynchronizer, EchoOutcome, SyncPoint};
pub use domain::timing::TimestampAndLatency;
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::{MessageId, NatNetMessage};
pub use protocol::version::Version;
