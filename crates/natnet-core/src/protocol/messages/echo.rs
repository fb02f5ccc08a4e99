//! Echo request/response pair used for clock synchronisation.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::cursor::{PacketWriter, ParseCursor};
use crate::protocol::version::Version;

/// Sent by the client; `timestamp` is the local send time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequestMessage {
    pub timestamp: u64,
}

/// The server's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponseMessage {
    /// Copied from the request.
    pub request_timestamp: u64,
    /// Server clock, in high-resolution ticks, when the request arrived.
    pub received_timestamp: u64,
}

impl EchoRequestMessage {
    pub fn decode(cursor: &mut ParseCursor<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            timestamp: cursor.read_u64()?,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter, _version: Version) -> Result<(), ProtocolError> {
        writer.write_u64(self.timestamp);
        Ok(())
    }
}

impl EchoResponseMessage {
    pub fn decode(cursor: &mut ParseCursor<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Self {
            request_timestamp: cursor.read_u64()?,
            received_timestamp: cursor.read_u64()?,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter, _version: Version) -> Result<(), ProtocolError> {
        writer.write_u64(self.request_timestamp);
        writer.write_u64(self.received_timestamp);
        Ok(())
    }
}
