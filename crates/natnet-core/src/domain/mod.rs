//! Time-keeping for a NatNet client.
//!
//! This module contains pure logic with no sockets and no clock reads.
//!
//! # Why does a client need its own notion of server time? (for beginners)
//!
//! The motion-capture server stamps every frame with ticks of its own
//! high-resolution counter.  Those ticks mean nothing on the client machine
//! until we know how the two clocks relate.  [`clock_sync`] estimates that
//! relation from echo round trips, and [`timing`] uses it to turn a frame's
//! tick stamps into a local capture time plus a latency breakdown.
//!
//! Every function here takes local times as plain `f64` seconds, so the
//! estimates can be tested with invented clocks and no network at all.

/// Cristian-style offset and skew estimation from echo round trips.
///
/// See [`clock_sync::ClockSynchronizer`] for the main type.
pub mod clock_sync;

/// Local capture timestamps and latency breakdown for frames.
pub mod timing;
