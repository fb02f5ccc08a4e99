//! ServerInfo: the server's reply to Connect and Discovery.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::cursor::{PacketWriter, ParseCursor};
use crate::protocol::messages::connect::APP_NAME_WIDTH;
use crate::protocol::version::{fields, Version};

/// Where and how the server streams frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub data_port: u16,
    pub multicast: bool,
    pub multicast_address: Ipv4Addr,
}

impl ConnectionInfo {
    fn decode(cursor: &mut ParseCursor<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            data_port: cursor.read_u16()?,
            multicast: cursor.read_bool()?,
            multicast_address: Ipv4Addr::from(cursor.read_fixed::<4>()?),
        })
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u16(self.data_port);
        writer.write_bool(self.multicast);
        writer.write_bytes(&self.multicast_address.octets());
    }
}

/// The server's self-description.
///
/// A client decodes this before any version has been negotiated, so the
/// optional fields are gated on both the decode version and the
/// `natnet_version` the message itself announces.  A 3.0 client can
/// therefore read the shorter reply of an older server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfoMessage {
    pub app_name: String,
    pub app_version: Version,
    pub natnet_version: Version,
    /// Ticks per second of the server's high-resolution clock (protocol 3+).
    pub high_resolution_clock_frequency: Option<u64>,
    /// Protocol 3+.
    pub connection_info: Option<ConnectionInfo>,
}

fn has_clock_and_connection(version: Version, natnet_version: Version) -> bool {
    fields::server_clock_and_connection(version)
        && fields::server_clock_and_connection(natnet_version)
}

impl ServerInfoMessage {
    pub fn decode(cursor: &mut ParseCursor<'_>, version: Version) -> Result<Self, ProtocolError> {
        let app_name = cursor.read_cstr(Some(APP_NAME_WIDTH))?;
        let app_version = Version::read(cursor)?;
        let natnet_version = Version::read(cursor)?;

        let (high_resolution_clock_frequency, connection_info) =
            if has_clock_and_connection(version, natnet_version) {
                (
                    Some(cursor.read_u64()?),
                    Some(ConnectionInfo::decode(cursor)?),
                )
            } else {
                (None, None)
            };

        Ok(Self {
            app_name,
            app_version,
            natnet_version,
            high_resolution_clock_frequency,
            connection_info,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter, version: Version) -> Result<(), ProtocolError> {
        writer.write_fixed_str(&self.app_name, APP_NAME_WIDTH)?;
        self.app_version.write(writer);
        self.natnet_version.write(writer);

        if has_clock_and_connection(version, self.natnet_version) {
            match (self.high_resolution_clock_frequency, &self.connection_info) {
                (Some(frequency), Some(info)) => {
                    writer.write_u64(frequency);
                    info.encode(writer);
                }
                _ => {
                    return Err(ProtocolError::Malformed(format!(
                        "protocol {version} ServerInfo requires clock frequency and connection info"
                    )))
                }
            }
        }
        Ok(())
    }
}
