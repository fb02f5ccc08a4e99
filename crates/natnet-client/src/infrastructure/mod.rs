//! Infrastructure layer for the client.
//!
//! Contains the OS-facing adapters behind the application layer's ports.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `natnet_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – `Connection`, the two-socket UDP transport (command
//!   socket plus multicast data socket) multiplexed with `mio`, and
//!   `network::fake`, an in-memory transport with a simulated server.
//!
//! - **`config`** – The TOML configuration file and its conversion into a
//!   `SessionConfig`.

pub mod config;
pub mod network;
